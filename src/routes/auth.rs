/**
 * Authentication Routes
 * JWT login, rotating refresh tokens, logout and password change
 */
use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    response::IntoResponse,
    Json,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Duration, Utc};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

use crate::auth::{bearer_token, issue_token, verify_token, AuthUser};
use crate::db::models::{AdminUser, Role};
use crate::error::AppError;
use crate::extractors::{required, ApiJson};
use crate::state::{AppState, RefreshTokenData};

pub const MIN_PASSWORD_LEN: usize = 8;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user: AuthUser,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn generate_refresh_token() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 64)
}

/// Refresh tokens are stored as SHA-256 digests only.
fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// bcrypt is CPU-bound; keep it off the async executor.
pub async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash(password, DEFAULT_COST))
        .await
        .map_err(|e| AppError::Internal(format!("hash task failed: {}", e)))?
        .map_err(|e| AppError::Internal(format!("failed to hash password: {}", e)))
}

async fn verify_password(password: String, password_hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify(password, &password_hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

fn invalid_credentials() -> AppError {
    AppError::Unauthorized("Invalid credentials".into())
}

/// Issue an access token and persist a fresh refresh token for `user`.
async fn issue_session(state: &AppState, user: AuthUser) -> Result<LoginResponse, AppError> {
    let ttl = Duration::hours(state.config.jwt_expires_hours);
    let token = issue_token(&state.config.jwt_secret, &user, ttl)
        .map_err(|e| AppError::Internal(format!("failed to create token: {}", e)))?;

    let refresh_token = generate_refresh_token();
    let token_hash = hash_refresh_token(&refresh_token);
    let expires_at = Utc::now() + Duration::days(state.config.refresh_token_days);

    match &state.db {
        Some(pool) => {
            sqlx::query(
                "INSERT INTO admin_refresh_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
            )
            .bind(user.id)
            .bind(&token_hash)
            .bind(expires_at)
            .execute(pool)
            .await?;
        }
        None => {
            state
                .refresh_tokens
                .insert(
                    token_hash,
                    RefreshTokenData {
                        user_id: user.id,
                        username: user.username.clone(),
                        role: user.role,
                        expires_at,
                        revoked: false,
                    },
                )
                .await;
        }
    }

    Ok(LoginResponse {
        success: true,
        token,
        refresh_token,
        expires_in: ttl.num_seconds(),
        user,
    })
}

async fn authenticate_db(
    state: &AppState,
    username: &str,
    password: String,
) -> Result<AuthUser, AppError> {
    let pool = state.pool()?;
    let row: Option<(i32, String, String, Role, bool)> = sqlx::query_as(
        r#"SELECT user_id, username, password_hash, role, is_active
           FROM admin_users
           WHERE LOWER(username) = LOWER($1)"#,
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    let Some((user_id, username, password_hash, role, is_active)) = row else {
        tracing::warn!("Login attempt for unknown user: {}", username);
        return Err(invalid_credentials());
    };

    if !verify_password(password, password_hash).await {
        tracing::warn!("Failed login attempt for: {}", username);
        return Err(invalid_credentials());
    }

    if !is_active {
        return Err(AppError::Forbidden("Account is disabled".into()));
    }

    sqlx::query("UPDATE admin_users SET last_login = now() WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(AuthUser {
        id: user_id,
        username,
        role,
    })
}

/// Environment-configured admin, used only when there is no database.
async fn authenticate_fallback(
    state: &AppState,
    username: &str,
    password: String,
) -> Result<AuthUser, AppError> {
    let admin = state
        .config
        .fallback_admin
        .as_ref()
        .ok_or_else(invalid_credentials)?;

    let name_matches = admin.username.eq_ignore_ascii_case(username);
    let password_ok = verify_password(password, admin.password_hash.clone()).await;
    if !name_matches || !password_ok {
        tracing::warn!("Failed fallback login attempt for: {}", username);
        return Err(invalid_credentials());
    }

    Ok(AuthUser {
        id: 0,
        username: admin.username.clone(),
        role: Role::Admin,
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = addr.ip().to_string();

    if !state.login_limiter.check(&ip).await {
        tracing::warn!(%ip, "login rate limit exceeded");
        return Err(AppError::TooManyRequests(
            "Too many login attempts. Please try again later.".into(),
        ));
    }

    let username = required(payload.username.as_deref(), "username")?;
    let password = payload
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("password is required".into()))?;

    let user = if state.db.is_some() {
        authenticate_db(&state, &username, password).await?
    } else {
        authenticate_fallback(&state, &username, password).await?
    };

    state.login_limiter.reset(&ip).await;
    let session = issue_session(&state, user).await?;
    tracing::info!("Successful login for user: {}", session.user.username);

    Ok(Json(session))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let Some(pool) = &state.db else {
        return Ok(Json(json!({ "user": user })));
    };

    let row: Option<AdminUser> = sqlx::query_as(
        r#"SELECT user_id, username, email, full_name, role, is_active, last_login, created_at
           FROM admin_users WHERE user_id = $1"#,
    )
    .bind(user.id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(account) if account.is_active => Ok(Json(json!({ "user": account }))),
        _ => Err(AppError::Unauthorized("Account no longer exists".into())),
    }
}

/// POST /api/auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let refresh_token = required(payload.refresh_token.as_deref(), "refresh_token")?;
    let token_hash = hash_refresh_token(&refresh_token);

    // Check and revoke in one step: the presented token is single-use even
    // under concurrent refreshes.
    let data: Option<RefreshTokenData> = match &state.db {
        Some(pool) => {
            let row: Option<(i32, String, Role, DateTime<Utc>)> = sqlx::query_as(
                r#"UPDATE admin_refresh_tokens t
                   SET revoked = true
                   FROM admin_users u
                   WHERE t.token_hash = $1
                     AND NOT t.revoked
                     AND t.expires_at > now()
                     AND u.user_id = t.user_id
                     AND u.is_active
                   RETURNING u.user_id, u.username, u.role, t.expires_at"#,
            )
            .bind(&token_hash)
            .fetch_optional(pool)
            .await?;
            row.map(|(user_id, username, role, expires_at)| RefreshTokenData {
                user_id,
                username,
                role,
                expires_at,
                revoked: true,
            })
        }
        None => state.refresh_tokens.consume(&token_hash).await,
    };

    let data = data.ok_or_else(|| {
        AppError::Unauthorized("Invalid or expired refresh token".into())
    })?;

    let session = issue_session(
        &state,
        AuthUser {
            id: data.user_id,
            username: data.username,
            role: data.role,
        },
    )
    .await?;
    Ok(Json(session))
}

/// POST /api/auth/logout
///
/// Revokes the given refresh token, and every refresh token of the bearer
/// when a valid access token is sent. Always succeeds.
pub async fn logout(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let payload: LogoutRequest = if body.is_empty() {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::Validation(e.to_string()))?
    };

    if let Some(refresh_token) = payload.refresh_token {
        let token_hash = hash_refresh_token(&refresh_token);
        match &state.db {
            Some(pool) => {
                sqlx::query("UPDATE admin_refresh_tokens SET revoked = true WHERE token_hash = $1")
                    .bind(&token_hash)
                    .execute(pool)
                    .await?;
            }
            None => state.refresh_tokens.revoke(&token_hash).await,
        }
    }

    let claims = bearer_token(&headers).and_then(|t| verify_token(&state.config.jwt_secret, t).ok());
    if let Some(claims) = claims {
        revoke_all(&state, claims.id).await?;
    }

    Ok(Json(json!({ "success": true, "message": "Logged out" })))
}

async fn revoke_all(state: &AppState, user_id: i32) -> Result<(), AppError> {
    match &state.db {
        Some(pool) => {
            sqlx::query("UPDATE admin_refresh_tokens SET revoked = true WHERE user_id = $1")
                .bind(user_id)
                .execute(pool)
                .await?;
        }
        None => state.refresh_tokens.revoke_user(user_id).await,
    }
    Ok(())
}

/// PUT /api/auth/change-password
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let current = payload
        .current_password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("current_password is required".into()))?;
    let new_password = payload.new_password.unwrap_or_default();
    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "new_password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let pool = state.pool()?;
    let stored: Option<String> =
        sqlx::query_scalar("SELECT password_hash FROM admin_users WHERE user_id = $1")
            .bind(user.id)
            .fetch_optional(pool)
            .await?;
    let stored = stored.ok_or_else(|| AppError::not_found("User"))?;

    if !verify_password(current, stored).await {
        return Err(AppError::Unauthorized("Current password is incorrect".into()));
    }

    let password_hash = hash_password(new_password).await?;
    sqlx::query("UPDATE admin_users SET password_hash = $1, updated_at = now() WHERE user_id = $2")
        .bind(&password_hash)
        .bind(user.id)
        .execute(pool)
        .await?;
    revoke_all(&state, user.id).await?;

    tracing::info!("Password changed for user: {}", user.username);
    Ok(Json(json!({ "success": true, "message": "Password changed successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackAdmin;
    use crate::routes::test_support::{app, send, test_config, token};
    use axum::http::StatusCode;
    use serde_json::Value;

    fn state_with_admin() -> AppState {
        let mut config = test_config();
        config.fallback_admin = Some(FallbackAdmin {
            username: "admin".into(),
            password_hash: bcrypt::hash("correct-horse", 4).unwrap(),
        });
        AppState::in_memory(config)
    }

    fn credentials(username: &str, password: &str) -> Option<Value> {
        Some(json!({ "username": username, "password": password }))
    }

    #[test]
    fn test_refresh_token_hash_is_stable_hex() {
        let a = hash_refresh_token("abc");
        assert_eq!(a, hash_refresh_token("abc"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_refresh_token("abd"));
    }

    #[tokio::test]
    async fn test_login_wrong_password_is_401() {
        let app = app(state_with_admin());
        let (status, body) =
            send(&app, "POST", "/api/auth/login", None, credentials("admin", "wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": true, "message": "Invalid credentials" }));
    }

    #[tokio::test]
    async fn test_login_missing_fields_is_400() {
        let app = app(state_with_admin());
        let (status, body) =
            send(&app, "POST", "/api/auth/login", None, Some(json!({ "password": "x" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "username is required");
    }

    #[tokio::test]
    async fn test_login_me_refresh_logout_flow() {
        let app = app(state_with_admin());
        let (status, session) =
            send(&app, "POST", "/api/auth/login", None, credentials("admin", "correct-horse")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["user"]["role"], "admin");
        let access = session["token"].as_str().unwrap().to_string();
        let refresh = session["refresh_token"].as_str().unwrap().to_string();

        let (status, me) = send(&app, "GET", "/api/auth/me", Some(&access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["user"]["username"], "admin");

        let (status, rotated) = send(
            &app,
            "POST",
            "/api/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let next = rotated["refresh_token"].as_str().unwrap().to_string();

        // The old token was rotated out.
        let (status, _) = send(
            &app,
            "POST",
            "/api/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, "POST", "/api/auth/logout", Some(&access), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            &app,
            "POST",
            "/api/auth/refresh",
            None,
            Some(json!({ "refresh_token": next })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_rotation() {
        let app = app(state_with_admin());
        let (_, session) =
            send(&app, "POST", "/api/auth/login", None, credentials("admin", "correct-horse")).await;
        let body = Some(json!({ "refresh_token": session["refresh_token"] }));

        let (a, b) = tokio::join!(
            send(&app, "POST", "/api/auth/refresh", None, body.clone()),
            send(&app, "POST", "/api/auth/refresh", None, body.clone()),
        );
        let mut statuses = vec![a.0, b.0];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::UNAUTHORIZED]);
    }

    #[tokio::test]
    async fn test_me_requires_valid_token() {
        let app = app(state_with_admin());
        let (status, body) = send(&app, "GET", "/api/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.get("user").is_none());
        let (status, _) = send(&app, "GET", "/api/auth/me", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_is_rate_limited() {
        let mut config = test_config();
        config.login_max_attempts = 2;
        let app = app(AppState::in_memory(config));
        for _ in 0..2 {
            let (status, _) =
                send(&app, "POST", "/api/auth/login", None, credentials("a", "b")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
        let (status, _) = send(&app, "POST", "/api/auth/login", None, credentials("a", "b")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_change_password_without_database_is_503() {
        let app = app(state_with_admin());
        let admin = token(Role::Admin);
        let (status, _) = send(
            &app,
            "PUT",
            "/api/auth/change-password",
            Some(&admin),
            Some(json!({ "current_password": "correct-horse", "new_password": "longer-secret" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = send(
            &app,
            "PUT",
            "/api/auth/change-password",
            Some(&admin),
            Some(json!({ "current_password": "x", "new_password": "short" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
