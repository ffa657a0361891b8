pub mod models;

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::{Duration, Instant};

use crate::config::DbConfig;

pub async fn init_pool(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Initializing database connection pool...");
    tracing::debug!(
        "Database target: {}:{}/{}",
        config.host,
        config.port,
        config.database
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect_with(config.connect_options()?)
        .await?;

    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    tracing::info!("Database connection pool initialized successfully");

    Ok(pool)
}

/// Round-trip latency of a trivial query.
pub async fn health_check(pool: Option<&PgPool>) -> Result<Duration, sqlx::Error> {
    let pool =
        pool.ok_or_else(|| sqlx::Error::Configuration("Database pool not initialized".into()))?;

    let start = Instant::now();
    sqlx::query("SELECT 1").fetch_one(pool).await?;

    Ok(start.elapsed())
}

/// Tables reported by the debug endpoint, in creation order.
pub const TABLES: &[&str] = &[
    "admin_users",
    "admin_refresh_tokens",
    "media_files",
    "page_versions",
    "pages",
    "sections",
    "section_media",
    "blog_posts",
    "countries",
    "services",
    "country_services",
    "consultations",
    "advertisements",
    "settings",
];

// Each entry is one statement; the extended protocol rejects batches.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS admin_users (
        user_id SERIAL PRIMARY KEY,
        username TEXT UNIQUE NOT NULL,
        email TEXT,
        full_name TEXT,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'editor' CHECK (role IN ('admin', 'editor', 'viewer')),
        is_active BOOLEAN NOT NULL DEFAULT true,
        last_login TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS admin_refresh_tokens (
        id BIGSERIAL PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES admin_users(user_id) ON DELETE CASCADE,
        token_hash TEXT NOT NULL UNIQUE,
        expires_at TIMESTAMPTZ NOT NULL,
        revoked BOOLEAN NOT NULL DEFAULT false,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_admin_refresh_tokens_expires_at ON admin_refresh_tokens(expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS media_files (
        file_version_id SERIAL PRIMARY KEY,
        file_name TEXT NOT NULL,
        original_name TEXT NOT NULL,
        file_path TEXT NOT NULL,
        file_type TEXT NOT NULL CHECK (file_type IN ('image', 'video', 'document')),
        mime_type TEXT NOT NULL,
        file_size BIGINT NOT NULL,
        alt_text TEXT,
        uploaded_by INTEGER REFERENCES admin_users(user_id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_media_files_type ON media_files(file_type)",
    "CREATE SEQUENCE IF NOT EXISTS page_family_seq",
    "CREATE SEQUENCE IF NOT EXISTS post_family_seq",
    r#"
    CREATE TABLE IF NOT EXISTS page_versions (
        page_version_id SERIAL PRIMARY KEY,
        kind TEXT NOT NULL CHECK (kind IN ('page', 'post')),
        family_id INTEGER NOT NULL,
        version INTEGER NOT NULL,
        created_by INTEGER REFERENCES admin_users(user_id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (kind, family_id, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pages (
        id BIGSERIAL PRIMARY KEY,
        page_id INTEGER NOT NULL,
        version INTEGER NOT NULL,
        page_version_id INTEGER NOT NULL REFERENCES page_versions(page_version_id) ON DELETE CASCADE,
        url TEXT NOT NULL,
        title TEXT NOT NULL,
        meta_title TEXT,
        meta_description TEXT,
        meta_keywords TEXT,
        parent_id INTEGER,
        display_order INTEGER NOT NULL DEFAULT 0,
        is_published BOOLEAN NOT NULL DEFAULT false,
        created_by INTEGER REFERENCES admin_users(user_id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (page_id, version)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_pages_url ON pages(url)",
    r#"
    CREATE TABLE IF NOT EXISTS sections (
        section_id BIGSERIAL PRIMARY KEY,
        page_version_id INTEGER NOT NULL REFERENCES page_versions(page_version_id) ON DELETE CASCADE,
        section_type TEXT NOT NULL,
        name TEXT,
        content JSONB NOT NULL DEFAULT '{}'::jsonb,
        display_order INTEGER NOT NULL,
        is_published BOOLEAN NOT NULL DEFAULT true
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sections_page_version ON sections(page_version_id, display_order)",
    r#"
    CREATE TABLE IF NOT EXISTS section_media (
        section_id BIGINT NOT NULL REFERENCES sections(section_id) ON DELETE CASCADE,
        file_version_id INTEGER NOT NULL REFERENCES media_files(file_version_id) ON DELETE CASCADE,
        display_order INTEGER NOT NULL,
        PRIMARY KEY (section_id, file_version_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS blog_posts (
        id BIGSERIAL PRIMARY KEY,
        post_id INTEGER NOT NULL,
        version INTEGER NOT NULL,
        page_version_id INTEGER NOT NULL REFERENCES page_versions(page_version_id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        url_slug TEXT NOT NULL,
        summary TEXT,
        content TEXT,
        category TEXT,
        tags TEXT[] NOT NULL DEFAULT '{}',
        author TEXT,
        featured_image_id INTEGER REFERENCES media_files(file_version_id) ON DELETE SET NULL,
        is_published BOOLEAN NOT NULL DEFAULT false,
        publish_date TIMESTAMPTZ,
        created_by INTEGER REFERENCES admin_users(user_id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (post_id, version)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_blog_posts_slug ON blog_posts(url_slug)",
    "CREATE INDEX IF NOT EXISTS idx_blog_posts_tags ON blog_posts USING GIN(tags)",
    r#"
    CREATE TABLE IF NOT EXISTS countries (
        country_id SERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        url_slug TEXT UNIQUE NOT NULL,
        description TEXT,
        content JSONB NOT NULL DEFAULT '{}'::jsonb,
        flag_image_id INTEGER REFERENCES media_files(file_version_id) ON DELETE SET NULL,
        meta_title TEXT,
        meta_description TEXT,
        display_order INTEGER NOT NULL DEFAULT 0,
        is_active BOOLEAN NOT NULL DEFAULT true,
        is_published BOOLEAN NOT NULL DEFAULT false,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS services (
        service_id SERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        url_slug TEXT UNIQUE NOT NULL,
        description TEXT,
        content JSONB NOT NULL DEFAULT '{}'::jsonb,
        icon_image_id INTEGER REFERENCES media_files(file_version_id) ON DELETE SET NULL,
        meta_title TEXT,
        meta_description TEXT,
        display_order INTEGER NOT NULL DEFAULT 0,
        is_active BOOLEAN NOT NULL DEFAULT true,
        is_published BOOLEAN NOT NULL DEFAULT false,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS country_services (
        country_id INTEGER NOT NULL REFERENCES countries(country_id) ON DELETE CASCADE,
        service_id INTEGER NOT NULL REFERENCES services(service_id) ON DELETE CASCADE,
        PRIMARY KEY (country_id, service_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS consultations (
        consultation_id SERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        phone TEXT,
        country TEXT,
        service TEXT,
        message TEXT,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'in-progress', 'completed', 'rejected')),
        reply TEXT,
        replied_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_consultations_status ON consultations(status, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS advertisements (
        ad_id SERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT,
        file_version_id INTEGER REFERENCES media_files(file_version_id) ON DELETE SET NULL,
        link_url TEXT,
        position TEXT NOT NULL DEFAULT 'sidebar',
        start_date TIMESTAMPTZ,
        end_date TIMESTAMPTZ,
        is_active BOOLEAN NOT NULL DEFAULT true,
        display_order INTEGER NOT NULL DEFAULT 0,
        click_count BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        setting_key TEXT PRIMARY KEY,
        setting_value JSONB NOT NULL,
        is_public BOOLEAN NOT NULL DEFAULT false,
        description TEXT,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Running database migrations...");

    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!(
        statements = SCHEMA.len(),
        "Database migrations completed successfully"
    );

    Ok(())
}
