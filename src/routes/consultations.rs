/**
 * Consultation Routes
 * Public lead submission plus the editor inbox
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::auth::{RequireAdmin, RequireEditor};
use crate::db::models::ConsultationStatus;
use crate::error::AppError;
use crate::extractors::{optional, required, ApiJson, ApiPath, ApiQuery};
use crate::query::Pagination;
use crate::routes::write_ok;
use crate::state::AppState;
use crate::store::{ConsultationQuery, NewConsultation};

#[derive(Debug, Deserialize)]
pub struct ConsultationRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub service: Option<String>,
    pub message: Option<String>,
}

impl ConsultationRequest {
    fn validate(self) -> Result<NewConsultation, AppError> {
        let name = required(self.name.as_deref(), "name")?;
        let email = required(self.email.as_deref(), "email")?;
        if !email.contains('@') {
            return Err(AppError::Validation("Invalid email address".into()));
        }
        Ok(NewConsultation {
            name,
            email,
            phone: optional(self.phone),
            country: optional(self.country),
            service: optional(self.service),
            message: optional(self.message),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ConsultationListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: Option<String>,
    pub reply: Option<String>,
}

fn parse_status(raw: &str) -> Result<ConsultationStatus, AppError> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("Invalid status: {}", raw)))
}

/// POST /api/consultations
pub async fn submit(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ConsultationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let new = payload.validate()?;
    let consultation = state.consultations.create(&new).await?;
    tracing::info!(
        consultation_id = consultation.consultation_id,
        "consultation request received"
    );

    Ok((
        StatusCode::CREATED,
        write_ok(
            "Consultation request submitted successfully",
            "consultation_id",
            consultation.consultation_id,
        ),
    ))
}

/// GET /api/consultations
pub async fn list(
    State(state): State<AppState>,
    RequireEditor(_user): RequireEditor,
    ApiQuery(params): ApiQuery<ConsultationListParams>,
) -> Result<impl IntoResponse, AppError> {
    let status = optional(params.status)
        .map(|s| parse_status(&s))
        .transpose()?;
    let query = ConsultationQuery {
        status,
        search: params.search,
        pagination: Pagination::new(params.page, params.limit),
    };
    let result = state.consultations.list(&query).await?;
    Ok(Json(json!({
        "consultations": result.items,
        "pagination": result.pagination,
    })))
}

/// GET /api/consultations/stats
pub async fn stats(
    State(state): State<AppState>,
    RequireEditor(_user): RequireEditor,
) -> Result<impl IntoResponse, AppError> {
    let counts = state.consultations.counts().await?;
    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    let by_status: Map<String, Value> = counts
        .into_iter()
        .map(|(status, n)| (status.as_str().to_string(), json!(n)))
        .collect();
    Ok(Json(json!({ "stats": { "total": total, "by_status": by_status } })))
}

/// GET /api/consultations/{id}
pub async fn get(
    State(state): State<AppState>,
    RequireEditor(_user): RequireEditor,
    ApiPath(id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    let consultation = state
        .consultations
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Consultation"))?;
    Ok(Json(json!({ "consultation": consultation })))
}

/// PATCH /api/consultations/{id}/status
pub async fn update_status(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiPath(id): ApiPath<i32>,
    ApiJson(payload): ApiJson<StatusUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let status = parse_status(&required(payload.status.as_deref(), "status")?)?;
    let consultation = state
        .consultations
        .set_status(id, status, optional(payload.reply))
        .await?
        .ok_or_else(|| AppError::not_found("Consultation"))?;
    tracing::info!(consultation_id = id, status = %status, by = %user.username, "consultation updated");

    let Json(mut body) = write_ok("Consultation status updated", "consultation_id", id);
    body["consultation"] = json!(consultation);
    Ok(Json(body))
}

/// DELETE /api/consultations/{id}
pub async fn delete(
    State(state): State<AppState>,
    RequireAdmin(user): RequireAdmin,
    ApiPath(id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    if !state.consultations.delete(id).await? {
        return Err(AppError::not_found("Consultation"));
    }
    tracing::info!(consultation_id = id, by = %user.username, "consultation deleted");
    Ok(write_ok("Consultation deleted successfully", "consultation_id", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;
    use crate::routes::test_support::{app, send, test_state, token};

    #[tokio::test]
    async fn test_public_submission_is_pending() {
        let app = app(test_state());
        let (status, body) = send(
            &app,
            "POST",
            "/api/consultations",
            None,
            Some(json!({ "name": "Ali", "email": "ali@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        let id = body["consultation_id"].as_i64().unwrap();

        let editor = token(Role::Editor);
        let (status, detail) = send(
            &app,
            "GET",
            &format!("/api/consultations/{}", id),
            Some(&editor),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["consultation"]["status"], "pending");
        assert_eq!(detail["consultation"]["name"], "Ali");
        assert!(detail["consultation"]["phone"].is_null());
    }

    #[tokio::test]
    async fn test_submission_validation() {
        let app = app(test_state());
        let (status, body) = send(
            &app,
            "POST",
            "/api/consultations",
            None,
            Some(json!({ "email": "ali@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], true);

        let (status, _) = send(
            &app,
            "POST",
            "/api/consultations",
            None,
            Some(json!({ "name": "Ali", "email": "not-an-email" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_inbox_requires_editor() {
        let app = app(test_state());
        let (status, body) = send(&app, "GET", "/api/consultations", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.get("consultations").is_none());

        let viewer = token(Role::Viewer);
        let (status, _) = send(&app, "GET", "/api/consultations", Some(&viewer), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_status_workflow_and_stats() {
        let app = app(test_state());
        let editor = token(Role::Editor);
        for name in ["Ali", "Sara"] {
            send(
                &app,
                "POST",
                "/api/consultations",
                None,
                Some(json!({ "name": name, "email": format!("{}@x.com", name) })),
            )
            .await;
        }

        let (_, listed) = send(&app, "GET", "/api/consultations?search=sara", Some(&editor), None).await;
        assert_eq!(listed["pagination"]["total"], 1);
        let id = listed["consultations"][0]["consultation_id"].as_i64().unwrap();

        let uri = format!("/api/consultations/{}/status", id);
        let (status, updated) = send(
            &app,
            "PATCH",
            &uri,
            Some(&editor),
            Some(json!({ "status": "in-progress", "reply": "We will call you" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["consultation"]["status"], "in-progress");
        assert_eq!(updated["consultation"]["reply"], "We will call you");
        assert!(updated["consultation"]["replied_at"].is_string());

        let (status, _) = send(
            &app,
            "PATCH",
            &uri,
            Some(&editor),
            Some(json!({ "status": "archived" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, pending) =
            send(&app, "GET", "/api/consultations?status=pending", Some(&editor), None).await;
        assert_eq!(pending["pagination"]["total"], 1);

        let (_, stats) = send(&app, "GET", "/api/consultations/stats", Some(&editor), None).await;
        assert_eq!(stats["stats"]["total"], 2);
        assert_eq!(stats["stats"]["by_status"]["pending"], 1);
        assert_eq!(stats["stats"]["by_status"]["in-progress"], 1);
        assert_eq!(stats["stats"]["by_status"]["rejected"], 0);
    }

    #[tokio::test]
    async fn test_delete_is_admin_only() {
        let app = app(test_state());
        let (_, created) = send(
            &app,
            "POST",
            "/api/consultations",
            None,
            Some(json!({ "name": "Ali", "email": "ali@x.com" })),
        )
        .await;
        let uri = format!("/api/consultations/{}", created["consultation_id"]);

        let (status, _) = send(&app, "DELETE", &uri, Some(&token(Role::Editor)), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&app, "DELETE", &uri, Some(&token(Role::Admin)), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "DELETE", &uri, Some(&token(Role::Admin)), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
