//! Shared application state handed to every handler.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::store::memory::MemoryStore;
use crate::store::postgres::PgStore;
use crate::store::{BlogStore, ConsultationStore, MediaStore, PageStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// `None` when running without a database.
    pub db: Option<PgPool>,
    pub pages: Arc<dyn PageStore>,
    pub blog: Arc<dyn BlogStore>,
    pub consultations: Arc<dyn ConsultationStore>,
    pub media: Arc<dyn MediaStore>,
    pub login_limiter: Arc<LoginLimiter>,
    pub refresh_tokens: Arc<RefreshTokens>,
    pub started_at: Instant,
}

impl AppState {
    pub fn postgres(config: AppConfig, pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        Self::build(
            config,
            Some(pool),
            store.clone(),
            store.clone(),
            store.clone(),
            store,
        )
    }

    /// Versioned content, consultations and media live in process memory;
    /// SQL-only resources answer 503.
    pub fn in_memory(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(config, None, store.clone(), store.clone(), store.clone(), store)
    }

    fn build(
        config: AppConfig,
        db: Option<PgPool>,
        pages: Arc<dyn PageStore>,
        blog: Arc<dyn BlogStore>,
        consultations: Arc<dyn ConsultationStore>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        let login_limiter = LoginLimiter::new(config.login_max_attempts, config.login_window_secs);
        Self {
            config: Arc::new(config),
            db,
            pages,
            blog,
            consultations,
            media,
            login_limiter: Arc::new(login_limiter),
            refresh_tokens: Arc::new(RefreshTokens::default()),
            started_at: Instant::now(),
        }
    }

    pub fn pool(&self) -> Result<&PgPool, AppError> {
        self.db.as_ref().ok_or(AppError::Unavailable)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

// ============================================================================
// Login rate limiting
// ============================================================================

/// Fixed-window attempt counter per client IP.
#[derive(Debug)]
pub struct LoginLimiter {
    max_attempts: u32,
    window_secs: i64,
    attempts: RwLock<HashMap<String, (u32, i64)>>,
}

impl LoginLimiter {
    pub fn new(max_attempts: u32, window_secs: i64) -> Self {
        Self {
            max_attempts,
            window_secs,
            attempts: RwLock::new(HashMap::new()),
        }
    }

    /// Record an attempt. Returns false once the IP is over its budget.
    pub async fn check(&self, ip: &str) -> bool {
        self.check_at(ip, Utc::now().timestamp()).await
    }

    async fn check_at(&self, ip: &str, now: i64) -> bool {
        let mut attempts = self.attempts.write().await;

        // Keep the map proportional to active IPs.
        attempts.retain(|_, (_, started)| now - *started < self.window_secs);

        let entry = attempts.entry(ip.to_string()).or_insert((0, now));
        entry.0 += 1;
        entry.0 <= self.max_attempts
    }

    /// Forget an IP after a successful login.
    pub async fn reset(&self, ip: &str) {
        self.attempts.write().await.remove(ip);
    }
}

// ============================================================================
// Refresh tokens
// ============================================================================

#[derive(Debug, Clone)]
pub struct RefreshTokenData {
    pub user_id: i32,
    pub username: String,
    pub role: crate::db::models::Role,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

/// In-memory refresh tokens keyed by SHA-256 hash. Used when there is no
/// database; with one, `admin_refresh_tokens` is authoritative.
#[derive(Debug, Default)]
pub struct RefreshTokens {
    tokens: RwLock<HashMap<String, RefreshTokenData>>,
}

impl RefreshTokens {
    pub async fn insert(&self, hash: String, data: RefreshTokenData) {
        let now = Utc::now();
        let mut tokens = self.tokens.write().await;
        tokens.retain(|_, t| t.expires_at > now);
        tokens.insert(hash, data);
    }

    pub async fn get(&self, hash: &str) -> Option<RefreshTokenData> {
        self.tokens.read().await.get(hash).cloned()
    }

    /// Take a live token, revoking it under the same lock.
    pub async fn consume(&self, hash: &str) -> Option<RefreshTokenData> {
        let mut tokens = self.tokens.write().await;
        let data = tokens.get_mut(hash)?;
        if data.revoked || data.expires_at <= Utc::now() {
            return None;
        }
        data.revoked = true;
        Some(data.clone())
    }

    pub async fn revoke(&self, hash: &str) {
        if let Some(data) = self.tokens.write().await.get_mut(hash) {
            data.revoked = true;
        }
    }

    pub async fn revoke_user(&self, user_id: i32) {
        for data in self.tokens.write().await.values_mut() {
            if data.user_id == user_id {
                data.revoked = true;
            }
        }
    }
}
