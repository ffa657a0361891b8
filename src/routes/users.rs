/**
 * User Routes
 * Admin management of back-office accounts
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::auth::RequireAdmin;
use crate::db::models::{AdminUser, Role};
use crate::error::AppError;
use crate::extractors::{optional, required, ApiJson, ApiPath, ApiQuery};
use crate::query::{fetch_paginated, Filter};
use crate::routes::auth::{hash_password, MIN_PASSWORD_LEN};
use crate::routes::{write_ok, ListParams};
use crate::state::AppState;

const USER_COLUMNS: &str = r#"
    SELECT user_id, username, email, full_name, role, is_active, last_login, created_at
"#;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    /// Resets the password when present.
    pub password: Option<String>,
}

fn parse_role(raw: Option<String>) -> Result<Option<Role>, AppError> {
    optional(raw)
        .map(|r| {
            r.parse()
                .map_err(|_| AppError::Validation(format!("Invalid role: {}", r)))
        })
        .transpose()
}

/// Passwords are taken byte for byte; only an empty one counts as absent.
fn new_password(raw: Option<String>) -> Option<String> {
    raw.filter(|p| !p.is_empty())
}

fn check_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn check_email(email: Option<&str>) -> Result<(), AppError> {
    match email {
        Some(e) if !e.contains('@') => Err(AppError::Validation("Invalid email address".into())),
        _ => Ok(()),
    }
}

fn username_conflict(err: sqlx::Error, username: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(format!("Username '{}' already exists", username))
        }
        _ => err.into(),
    }
}

/// GET /api/users
pub async fn list_users(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let filter = Filter::new().search(&["username", "email", "full_name"], params.search.as_deref());
    let result = fetch_paginated::<AdminUser>(
        pool,
        USER_COLUMNS,
        "FROM admin_users",
        &filter,
        "username",
        params.pagination(),
    )
    .await?;
    Ok(Json(json!({
        "users": result.items,
        "pagination": result.pagination,
    })))
}

/// GET /api/users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    ApiPath(user_id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let sql = format!("{} FROM admin_users WHERE user_id = $1", USER_COLUMNS);
    let user: AdminUser = sqlx::query_as(&sql)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    Ok(Json(json!({ "user": user })))
}

/// POST /api/users
pub async fn create_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(payload): ApiJson<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let username = required(payload.username.as_deref(), "username")?;
    let password = new_password(payload.password)
        .ok_or_else(|| AppError::Validation("password is required".into()))?;
    check_password(&password)?;
    let email = optional(payload.email);
    check_email(email.as_deref())?;
    let role = parse_role(payload.role)?.unwrap_or(Role::Editor);

    let pool = state.pool()?;
    let password_hash = hash_password(password).await?;
    let user_id: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO admin_users (username, email, full_name, password_hash, role, is_active)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING user_id
        "#,
    )
    .bind(&username)
    .bind(&email)
    .bind(optional(payload.full_name))
    .bind(password_hash)
    .bind(role.as_str())
    .bind(payload.is_active.unwrap_or(true))
    .fetch_one(pool)
    .await
    .map_err(|e| username_conflict(e, &username))?;

    tracing::info!(user_id, role = %role, by = %admin.username, "user created");
    Ok((
        StatusCode::CREATED,
        write_ok("User created successfully", "user_id", user_id),
    ))
}

/// PUT /api/users/{id}
pub async fn update_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(user_id): ApiPath<i32>,
    ApiJson(payload): ApiJson<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let role = parse_role(payload.role)?;
    if user_id == admin.id {
        if role.is_some_and(|r| r != Role::Admin) {
            return Err(AppError::Validation("You cannot change your own role".into()));
        }
        if payload.is_active == Some(false) {
            return Err(AppError::Validation("You cannot deactivate your own account".into()));
        }
    }
    let email = optional(payload.email);
    check_email(email.as_deref())?;
    let password = new_password(payload.password);
    if let Some(password) = &password {
        check_password(password)?;
    }

    let pool = state.pool()?;
    let password_hash = match password {
        Some(password) => Some(hash_password(password).await?),
        None => None,
    };

    let updated = sqlx::query(
        r#"
        UPDATE admin_users
        SET email = COALESCE($2, email),
            full_name = COALESCE($3, full_name),
            role = COALESCE($4, role),
            is_active = COALESCE($5, is_active),
            password_hash = COALESCE($6, password_hash),
            updated_at = now()
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(email)
    .bind(optional(payload.full_name))
    .bind(role.map(|r| r.as_str()))
    .bind(payload.is_active)
    .bind(password_hash.as_deref())
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("User"));
    }
    if payload.is_active == Some(false) || password_hash.is_some() {
        state.refresh_tokens.revoke_user(user_id).await;
        sqlx::query("UPDATE admin_refresh_tokens SET revoked = true WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await?;
    }

    tracing::info!(user_id, by = %admin.username, "user updated");
    Ok(write_ok("User updated successfully", "user_id", user_id))
}

/// DELETE /api/users/{id}
pub async fn delete_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(user_id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    if user_id == admin.id {
        return Err(AppError::Validation("You cannot delete your own account".into()));
    }
    let pool = state.pool()?;
    let deleted = sqlx::query("DELETE FROM admin_users WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::not_found("User"));
    }

    state.refresh_tokens.revoke_user(user_id).await;
    tracing::info!(user_id, by = %admin.username, "user deleted");
    Ok(write_ok("User deleted successfully", "user_id", user_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{app, send, test_state, token};

    #[test]
    fn test_role_parsing() {
        assert_eq!(parse_role(Some("Editor".into())).unwrap(), Some(Role::Editor));
        assert_eq!(parse_role(None).unwrap(), None);
        assert!(parse_role(Some("root".into())).is_err());
    }

    #[test]
    fn test_passwords_keep_surrounding_spaces() {
        assert_eq!(new_password(Some(" pass word ".into())).as_deref(), Some(" pass word "));
        assert_eq!(new_password(Some(String::new())), None);
        assert_eq!(new_password(None), None);
    }

    #[tokio::test]
    async fn test_users_are_admin_only() {
        let app = app(test_state());
        let (status, _) = send(&app, "GET", "/api/users", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, "GET", "/api/users", Some(&token(Role::Editor)), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_short_password_rejected() {
        let app = app(test_state());
        let (status, body) = send(
            &app,
            "POST",
            "/api/users",
            Some(&token(Role::Admin)),
            Some(json!({ "username": "sara", "password": "short" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "password must be at least 8 characters");
    }

    #[tokio::test]
    async fn test_admin_cannot_remove_or_demote_self() {
        let app = app(test_state());
        let admin = token(Role::Admin);
        // Test tokens carry user id 1.
        let (status, body) = send(&app, "DELETE", "/api/users/1", Some(&admin), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "You cannot delete your own account");

        let (status, _) = send(
            &app,
            "PUT",
            "/api/users/1",
            Some(&admin),
            Some(json!({ "role": "editor" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
