/**
 * Routes Module
 * API route handlers
 */

pub mod advertisements;
pub mod auth;
pub mod blog;
pub mod consultations;
pub mod countries;
pub mod debug;
pub mod health;
pub mod media;
pub mod pages;
pub mod rss;
pub mod services;
pub mod settings;
pub mod users;

use axum::Json;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::query::Pagination;

pub use crate::error::ErrorResponse;

lazy_static::lazy_static! {
    /// Lowercase words joined by single hyphens. Non-Latin letters are
    /// allowed so Arabic slugs work.
    static ref SLUG_RE: Regex =
        Regex::new(r"^[\p{Ll}\p{Lo}\p{N}]+(?:-[\p{Ll}\p{Lo}\p{N}]+)*$").unwrap();
}

/// Query parameters shared by the list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub published: Option<bool>,
    pub search: Option<String>,
}

impl ListParams {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit)
    }
}

/// `{ "success": true, "message": ..., <id_field>: id }`
pub fn write_ok(message: &str, id_field: &str, id: impl Serialize) -> Json<Value> {
    let mut body = json!({ "success": true, "message": message });
    body[id_field] = json!(id);
    Json(body)
}

pub fn validate_slug(slug: &str) -> Result<(), AppError> {
    if SLUG_RE.is_match(slug) {
        Ok(())
    } else {
        Err(AppError::Validation(
            "url_slug may only contain lowercase letters, digits and single hyphens".into(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Router-level helpers shared by the handler tests.

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::auth::{issue_token, AuthUser};
    use crate::config::AppConfig;
    use crate::db::models::Role;
    use crate::state::AppState;

    pub const TEST_SECRET: &str = "test-secret";

    pub fn test_config() -> AppConfig {
        AppConfig {
            jwt_secret: TEST_SECRET.to_string(),
            ..AppConfig::default()
        }
    }

    pub fn test_state() -> AppState {
        AppState::in_memory(test_config())
    }

    /// The full router as served, with a fixed peer address.
    pub fn app(state: AppState) -> Router {
        use axum::extract::connect_info::MockConnectInfo;
        use std::net::SocketAddr;
        crate::create_app(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 12345))))
    }

    static MIGRATED: tokio::sync::OnceCell<()> = tokio::sync::OnceCell::const_new();

    /// Postgres-backed state plus an admin token whose user row exists.
    /// `None` unless `TEST_DATABASE_URL` points at a disposable database.
    pub async fn pg_state() -> Option<(AppState, String)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let mut config = test_config();
        config.database.url = Some(url);
        config.database.min_connections = 0;
        let pool = crate::db::init_pool(&config.database).await.unwrap();
        MIGRATED
            .get_or_init(|| async {
                crate::db::run_migrations(&pool).await.unwrap();
            })
            .await;

        let user_id: i32 = sqlx::query_scalar(
            r#"INSERT INTO admin_users (username, password_hash, role)
               VALUES ('test-admin', 'unused', 'admin')
               ON CONFLICT (username) DO UPDATE SET is_active = true
               RETURNING user_id"#,
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        let admin = AuthUser {
            id: user_id,
            username: "test-admin".into(),
            role: Role::Admin,
        };
        let token = issue_token(TEST_SECRET, &admin, chrono::Duration::hours(1)).unwrap();
        Some((AppState::postgres(config, pool), token))
    }

    /// Run-unique suffix so shared-database tests never collide.
    pub fn unique(prefix: &str) -> String {
        use rand::Rng;
        let n: u32 = rand::rng().random_range(0..1_000_000);
        format!("{}-{}-{}", prefix, chrono::Utc::now().timestamp_micros(), n)
    }

    pub fn token(role: Role) -> String {
        let user = AuthUser {
            id: 1,
            username: role.as_str().to_string(),
            role,
        };
        issue_token(TEST_SECRET, &user, chrono::Duration::hours(1)).unwrap()
    }

    pub async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {}", token));
        }
        let req = match body {
            Some(json) => req
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_validation() {
        assert!(validate_slug("study-in-canada").is_ok());
        assert!(validate_slug("كندا-2025").is_ok());
        assert!(validate_slug("Study").is_err());
        assert!(validate_slug("a--b").is_err());
        assert!(validate_slug("-a").is_err());
        assert!(validate_slug("").is_err());
    }

    #[test]
    fn test_write_ok_shape() {
        let Json(body) = write_ok("Page created", "page_id", 3);
        assert_eq!(body["success"], true);
        assert_eq!(body["page_id"], 3);
        assert_eq!(body["message"], "Page created");
    }
}
