/**
 * Settings Routes
 * Key/value site settings; public keys are readable by anyone
 */
use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{MaybeUser, RequireAdmin};
use crate::db::models::Setting;
use crate::error::AppError;
use crate::extractors::{required, ApiJson, ApiPath};
use crate::state::AppState;

const SETTING_COLUMNS: &str =
    "SELECT setting_key, setting_value, is_public, description, updated_at FROM settings";

#[derive(Debug, Deserialize)]
pub struct SettingEntry {
    #[serde(alias = "setting_key")]
    pub key: Option<String>,
    #[serde(alias = "setting_value")]
    pub value: Option<Value>,
    pub is_public: Option<bool>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkSettings {
    #[serde(default)]
    pub settings: Vec<SettingEntry>,
}

fn validate_key(key: &str) -> Result<(), AppError> {
    let ok = key.len() <= 100
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid setting key: {}", key)))
    }
}

/// GET /api/settings
pub async fn list_settings(
    State(state): State<AppState>,
    user: MaybeUser,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let can_edit = user.role().is_some_and(|r| r.can_edit());
    let sql = format!(
        "{} WHERE ($1 OR is_public) ORDER BY setting_key",
        SETTING_COLUMNS
    );
    let settings: Vec<Setting> = sqlx::query_as(&sql).bind(can_edit).fetch_all(pool).await?;
    Ok(Json(json!({ "settings": settings })))
}

/// GET /api/settings/{key}
pub async fn get_setting(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiPath(key): ApiPath<String>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let can_edit = user.role().is_some_and(|r| r.can_edit());
    let sql = format!("{} WHERE setting_key = $1 AND ($2 OR is_public)", SETTING_COLUMNS);
    let setting: Setting = sqlx::query_as(&sql)
        .bind(&key)
        .bind(can_edit)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Setting"))?;
    Ok(Json(json!({ "setting": setting })))
}

/// PUT /api/settings
pub async fn upsert_settings(
    State(state): State<AppState>,
    RequireAdmin(user): RequireAdmin,
    ApiJson(payload): ApiJson<BulkSettings>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    if payload.settings.is_empty() {
        return Err(AppError::Validation("settings must not be empty".into()));
    }

    let mut entries = Vec::with_capacity(payload.settings.len());
    for (i, entry) in payload.settings.into_iter().enumerate() {
        let key = required(entry.key.as_deref(), &format!("settings[{}].key", i))?;
        validate_key(&key)?;
        entries.push((key, entry));
    }

    let mut tx = pool.begin().await?;
    for (key, entry) in &entries {
        sqlx::query(
            r#"
            INSERT INTO settings (setting_key, setting_value, is_public, description)
            VALUES ($1, $2, COALESCE($3, false), $4)
            ON CONFLICT (setting_key) DO UPDATE
            SET setting_value = EXCLUDED.setting_value,
                is_public = COALESCE($3, settings.is_public),
                description = COALESCE($4, settings.description),
                updated_at = now()
            "#,
        )
        .bind(key)
        .bind(entry.value.clone().unwrap_or(Value::Null))
        .bind(entry.is_public)
        .bind(&entry.description)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(count = entries.len(), by = %user.username, "settings saved");
    Ok(Json(json!({
        "success": true,
        "message": "Settings updated successfully",
        "updated": entries.len(),
    })))
}

/// DELETE /api/settings/{key}
pub async fn delete_setting(
    State(state): State<AppState>,
    RequireAdmin(user): RequireAdmin,
    ApiPath(key): ApiPath<String>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let deleted = sqlx::query("DELETE FROM settings WHERE setting_key = $1")
        .bind(&key)
        .execute(pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::not_found("Setting"));
    }
    tracing::info!(key = %key, by = %user.username, "setting deleted");
    Ok(crate::routes::write_ok("Setting deleted successfully", "setting_key", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;
    use crate::routes::test_support::{app, send, test_state, token};
    use axum::http::StatusCode;

    #[test]
    fn test_setting_keys() {
        assert!(validate_key("site.title").is_ok());
        assert!(validate_key("contact_email").is_ok());
        assert!(validate_key("bad key").is_err());
        assert!(validate_key("x'; DROP TABLE settings; --").is_err());
    }

    #[tokio::test]
    async fn test_bulk_update_is_admin_only() {
        let app = app(test_state());
        let body = Some(json!({ "settings": [{ "key": "site.title", "value": "Hi" }] }));
        let (status, _) = send(&app, "PUT", "/api/settings", Some(&token(Role::Editor)), body).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_reads_need_database() {
        let app = app(test_state());
        let (status, body) = send(&app, "GET", "/api/settings", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], true);
    }
}
