//! API error type and the `{ "error": true, "message": ... }` envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Set once from the loaded configuration; unset means development.
static PRODUCTION: OnceLock<bool> = OnceLock::new();

/// Record the environment so 500 responses stop carrying `detail` in
/// production. Only the first call has any effect.
pub fn set_production(is_production: bool) {
    let _ = PRODUCTION.set(is_production);
}

fn is_production() -> bool {
    PRODUCTION.get().copied().unwrap_or(false)
}

/// Error body shared by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    TooManyRequests(String),

    #[error("Database not available")]
    Unavailable,

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{} not found", what))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::Conflict("A record with the same unique value already exists".into());
            }
            if db_err.is_foreign_key_violation() {
                return Self::Validation("Referenced record does not exist".into());
            }
        }
        if matches!(err, sqlx::Error::RowNotFound) {
            return Self::NotFound("Record not found".into());
        }
        Self::Database(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.render(is_production())
    }
}

impl AppError {
    fn render(self, production: bool) -> Response {
        let status = self.status();

        let (message, detail) = match &self {
            Self::Database(_) | Self::Internal(_) => {
                tracing::error!(error = %self, "internal server error");
                let detail = (!production).then(|| self.to_string());
                ("Internal server error".to_string(), detail)
            }
            other => (other.to_string(), None),
        };

        (
            status,
            Json(ErrorResponse {
                error: true,
                message,
                detail,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(err: AppError) -> (StatusCode, ErrorResponse) {
        rendered(err, false).await
    }

    async fn rendered(err: AppError, production: bool) -> (StatusCode, ErrorResponse) {
        let res = err.render(production);
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_validation_maps_to_bad_request() {
        let (status, body) = body_of(AppError::Validation("Title is required".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error);
        assert_eq!(body.message, "Title is required");
        assert!(body.detail.is_none());
    }

    #[tokio::test]
    async fn test_internal_error_hides_message() {
        let (status, body) = body_of(AppError::Internal("disk on fire".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "Internal server error");
        assert_eq!(body.detail.as_deref(), Some("internal error: disk on fire"));
    }

    #[tokio::test]
    async fn test_production_drops_internal_detail() {
        let (status, body) = rendered(AppError::Internal("disk on fire".into()), true).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "Internal server error");
        assert!(body.detail.is_none());

        // Client errors read the same in every environment.
        let (_, body) = rendered(AppError::Conflict("Slug taken".into()), true).await;
        assert_eq!(body.message, "Slug taken");
    }

    #[test]
    fn test_row_not_found_maps_to_404() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::Unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
