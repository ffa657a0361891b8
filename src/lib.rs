//! Consultancy CMS - content API library (router, stores, configuration)

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod logging;
pub mod query;
pub mod routes;
pub mod state;
pub mod store;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use std::net::SocketAddr;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};

use crate::config::{AppConfig, ConfigError};
use crate::error::AppError;
use crate::state::AppState;

/// Body cap for every route except the media upload.
const JSON_BODY_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// CORS for the configured frontend origins. Unparseable entries are skipped.
pub fn configure_cors(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

async fn not_found() -> AppError {
    AppError::NotFound("Route not found".into())
}

fn api_routes() -> Router<AppState> {
    use routes::{
        advertisements, auth, blog, consultations, countries, debug, health, media, pages, rss,
        services, settings, users,
    };

    Router::new()
        // Auth
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/change-password", put(auth::change_password))
        // Pages
        .route("/api/pages", get(pages::list_pages).post(pages::create_page))
        .route("/api/pages/resolve", get(pages::resolve_page))
        .route(
            "/api/pages/{id}",
            get(pages::get_page)
                .put(pages::update_page)
                .delete(pages::delete_page),
        )
        .route("/api/pages/{id}/versions", get(pages::list_versions))
        // Blog
        .route("/api/blog", get(blog::list_posts).post(blog::create_post))
        .route("/api/blog/rss.xml", get(rss::rss_feed))
        .route("/api/blog/slug/{slug}", get(blog::get_post_by_slug))
        .route(
            "/api/blog/{id}",
            get(blog::get_post)
                .put(blog::update_post)
                .delete(blog::delete_post),
        )
        .route("/api/blog/{id}/versions", get(blog::list_versions))
        // Media metadata
        .route("/api/media", get(media::list_media))
        .route(
            "/api/media/{id}",
            get(media::get_media)
                .put(media::update_media)
                .delete(media::delete_media),
        )
        // Countries & services
        .route(
            "/api/countries",
            get(countries::list_countries).post(countries::create_country),
        )
        .route(
            "/api/countries/{key}",
            get(countries::get_country)
                .put(countries::update_country)
                .delete(countries::delete_country),
        )
        .route(
            "/api/services",
            get(services::list_services).post(services::create_service),
        )
        .route(
            "/api/services/{key}",
            get(services::get_service)
                .put(services::update_service)
                .delete(services::delete_service),
        )
        // Consultations
        .route(
            "/api/consultations",
            get(consultations::list).post(consultations::submit),
        )
        .route("/api/consultations/stats", get(consultations::stats))
        .route(
            "/api/consultations/{id}",
            get(consultations::get).delete(consultations::delete),
        )
        .route(
            "/api/consultations/{id}/status",
            patch(consultations::update_status),
        )
        // Advertisements
        .route(
            "/api/advertisements",
            get(advertisements::list_ads).post(advertisements::create_ad),
        )
        .route(
            "/api/advertisements/{id}",
            get(advertisements::get_ad)
                .put(advertisements::update_ad)
                .delete(advertisements::delete_ad),
        )
        .route(
            "/api/advertisements/{id}/click",
            post(advertisements::record_click),
        )
        // Settings & users
        .route(
            "/api/settings",
            get(settings::list_settings).put(settings::upsert_settings),
        )
        .route(
            "/api/settings/{key}",
            get(settings::get_setting).delete(settings::delete_setting),
        )
        .route("/api/users", get(users::list_users).post(users::create_user))
        .route(
            "/api/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        // Status & debug
        .route("/api/status", get(debug::status))
        .route("/api/debug/tables", get(debug::tables))
        .route("/api/debug/mime", get(debug::mime))
        .route("/api/debug/mime-types", get(debug::mime_types))
        // Health
        .route("/health", get(health::health_ping))
        .route("/health/ready", get(health::health_ready))
        .route("/health/database", get(health::health_database))
        .layer(RequestBodyLimitLayer::new(JSON_BODY_LIMIT))
}

fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/api/media/upload", post(routes::media::upload_file))
        .layer(DefaultBodyLimit::max(routes::media::UPLOAD_BODY_LIMIT))
        .layer(RequestBodyLimitLayer::new(routes::media::UPLOAD_BODY_LIMIT))
}

/// Create and configure the application router.
pub fn create_app(state: AppState) -> Router {
    let cors = configure_cors(&state.config);
    // Uploaded bytes are served with the type their stored extension names.
    let uploads = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .service(ServeDir::new(&state.config.upload_dir));

    Router::new()
        .merge(api_routes())
        .merge(upload_routes())
        .nest_service("/uploads", uploads)
        .fallback(not_found)
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(logging::middleware::log_request))
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

/// Connect to PostgreSQL and migrate, or fall back to in-memory stores when
/// `ALLOW_DB_FAIL` is set.
async fn build_state(config: AppConfig) -> Result<AppState, StartupError> {
    let connected = match db::init_pool(&config.database).await {
        Ok(pool) => db::run_migrations(&pool).await.map(|_| pool),
        Err(e) => Err(e),
    };

    match connected {
        Ok(pool) => Ok(AppState::postgres(config, pool)),
        Err(e) if config.allow_db_fail => {
            tracing::warn!(
                "Database unavailable ({}). ALLOW_DB_FAIL is set: serving pages, blog, \
                 media and consultations from memory; other resources return 503.",
                e
            );
            Ok(AppState::in_memory(config))
        }
        Err(e) => Err(e.into()),
    }
}

/// Run the server (used by main).
pub async fn run() -> Result<(), StartupError> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    error::set_production(config.is_production());

    // Dropping the guards stops the background log writers.
    let _log_guards = logging::init(&config);
    tracing::info!(?config, "Configuration loaded");
    if config.fallback_admin.is_some() && config.is_production() {
        tracing::warn!("SECURITY: fallback admin credentials are configured in production");
    }

    if let Err(e) = tokio::fs::create_dir_all(&config.upload_dir).await {
        tracing::warn!("Could not create upload directory {:?}: {}", config.upload_dir, e);
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state = build_state(config).await?;
    let app = create_app(state);

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(StartupError::Serve)
}
