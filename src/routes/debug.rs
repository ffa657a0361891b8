/**
 * Status & Debug Routes
 * The debug endpoints disappear (404) in production
 */
use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppError;
use crate::extractors::ApiQuery;
use crate::routes::media::{is_allowed, resolve_mime, MediaKind, ALLOWED_MIME_TYPES};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MimeParams {
    pub filename: Option<String>,
    pub mime: Option<String>,
}

#[derive(Debug, Serialize)]
struct TableInfo {
    name: &'static str,
    exists: bool,
    rows: Option<i64>,
}

fn ensure_debug(state: &AppState) -> Result<(), AppError> {
    if state.config.is_production() {
        Err(AppError::NotFound("Not found".into()))
    } else {
        Ok(())
    }
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let database = match crate::db::health_check(state.db.as_ref()).await {
        Ok(_) => "connected",
        Err(_) if state.db.is_none() => "not configured",
        Err(_) => "disconnected",
    };
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "database": database,
        "uptime": state.uptime_secs(),
    }))
}

/// GET /api/debug/tables
pub async fn tables(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    ensure_debug(&state)?;
    let pool = state.pool()?;

    let mut tables = Vec::with_capacity(crate::db::TABLES.len());
    for &name in crate::db::TABLES {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(format!("public.{}", name))
            .fetch_one(pool)
            .await?;
        let rows = if exists {
            // Names come from a fixed list, never from the request.
            let sql = format!("SELECT COUNT(*) FROM {}", name);
            Some(sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await?)
        } else {
            None
        };
        tables.push(TableInfo { name, exists, rows });
    }

    Ok(Json(json!({ "tables": tables })))
}

/// GET /api/debug/mime?filename=...&mime=...
pub async fn mime(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<MimeParams>,
) -> Result<impl IntoResponse, AppError> {
    ensure_debug(&state)?;
    let filename = params.filename.unwrap_or_default();
    let resolved = resolve_mime(&filename, params.mime.as_deref());
    let allowed = resolved.as_deref().is_some_and(is_allowed);
    let category = resolved.as_deref().map(|m| MediaKind::from_mime(m).dir());

    Ok(Json(json!({
        "filename": filename,
        "declared": params.mime,
        "resolved": resolved,
        "allowed": allowed,
        "category": category,
    })))
}

/// GET /api/debug/mime-types
pub async fn mime_types(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    ensure_debug(&state)?;
    let grouped: Vec<_> = [MediaKind::Image, MediaKind::Video, MediaKind::Document]
        .into_iter()
        .map(|kind| {
            let types: Vec<&str> = ALLOWED_MIME_TYPES
                .iter()
                .copied()
                .filter(|m| MediaKind::from_mime(m) == kind)
                .collect();
            json!({ "category": kind.dir(), "mime_types": types })
        })
        .collect();
    Ok(Json(json!({
        "max_file_size": crate::routes::media::MAX_FILE_SIZE,
        "categories": grouped,
    })))
}

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::routes::test_support::{app, send, test_config, test_state};
    use crate::state::AppState;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_status_reports_missing_database() {
        let (status, body) = send(&app(test_state()), "GET", "/api/status", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "not configured");
    }

    #[tokio::test]
    async fn test_mime_lookup() {
        let app = app(test_state());
        let (status, body) = send(
            &app,
            "GET",
            "/api/debug/mime?filename=brochure.pdf&mime=application/octet-stream",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resolved"], "application/pdf");
        assert_eq!(body["allowed"], true);
        assert_eq!(body["category"], "documents");

        let (_, types) = send(&app, "GET", "/api/debug/mime-types", None, None).await;
        assert_eq!(types["categories"][0]["category"], "images");
    }

    #[tokio::test]
    async fn test_debug_hidden_in_production() {
        let config = AppConfig {
            environment: "production".to_string(),
            ..test_config()
        };
        let app = app(AppState::in_memory(config));
        for uri in ["/api/debug/mime-types", "/api/debug/mime?filename=a.png", "/api/debug/tables"] {
            let (status, _) = send(&app, "GET", uri, None, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
        let (status, _) = send(&app, "GET", "/api/status", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
