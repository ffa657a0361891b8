/**
 * Advertisement Routes
 * Scheduled banners per page position with click counting
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{MaybeUser, RequireEditor};
use crate::db::models::Advertisement;
use crate::error::AppError;
use crate::extractors::{optional, required, ApiJson, ApiPath, ApiQuery};
use crate::query::{fetch_paginated, Filter, Pagination};
use crate::routes::write_ok;
use crate::state::AppState;

const AD_COLUMNS: &str = r#"
    SELECT a.ad_id, a.title, a.description, a.file_version_id, m.file_path AS image_path,
           a.link_url, a.position, a.start_date, a.end_date, a.is_active, a.display_order,
           a.click_count, a.created_at, a.updated_at
"#;

const AD_FROM: &str =
    "FROM advertisements a LEFT JOIN media_files m ON m.file_version_id = a.file_version_id";

const DEFAULT_POSITION: &str = "sidebar";

const RUNNING: &str = "a.is_active AND (a.start_date IS NULL OR a.start_date <= now()) \
                       AND (a.end_date IS NULL OR a.end_date >= now())";

#[derive(Debug, Deserialize)]
pub struct AdListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub position: Option<String>,
    /// Editors see every ad unless they ask for the running ones.
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AdPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "image_id")]
    pub file_version_id: Option<i32>,
    pub link_url: Option<String>,
    pub position: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    #[serde(alias = "order")]
    pub display_order: Option<i32>,
}

impl AdPayload {
    fn validate(&self) -> Result<String, AppError> {
        let title = required(self.title.as_deref(), "title")?;
        if let Some(link) = self.link_url.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
            let ok = link.starts_with("http://") || link.starts_with("https://") || link.starts_with('/');
            if !ok {
                return Err(AppError::Validation(
                    "link_url must be an absolute http(s) URL or a site path".into(),
                ));
            }
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(AppError::Validation("end_date must not precede start_date".into()));
            }
        }
        Ok(title)
    }

    /// Slot on the site, `sidebar` when not given.
    fn position(&self) -> String {
        optional(self.position.clone()).unwrap_or_else(|| DEFAULT_POSITION.to_string())
    }
}

fn list_filter(can_edit: bool, params: &AdListParams) -> Filter {
    let filter = Filter::new().eq_opt("a.position", optional(params.position.clone()));
    if !can_edit || params.active == Some(true) {
        filter.raw(RUNNING)
    } else {
        filter
    }
}

/// GET /api/advertisements
pub async fn list_ads(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiQuery(params): ApiQuery<AdListParams>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let can_edit = user.role().is_some_and(|r| r.can_edit());
    let filter = list_filter(can_edit, &params);

    let result = fetch_paginated::<Advertisement>(
        pool,
        AD_COLUMNS,
        AD_FROM,
        &filter,
        "a.display_order, a.ad_id DESC",
        Pagination::new(params.page, params.limit),
    )
    .await?;

    Ok(Json(json!({
        "advertisements": result.items,
        "pagination": result.pagination,
    })))
}

/// GET /api/advertisements/{id}
pub async fn get_ad(
    State(state): State<AppState>,
    RequireEditor(_user): RequireEditor,
    ApiPath(ad_id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let sql = format!("{} {} WHERE a.ad_id = $1", AD_COLUMNS, AD_FROM);
    let ad: Advertisement = sqlx::query_as(&sql)
        .bind(ad_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Advertisement"))?;
    Ok(Json(json!({ "advertisement": ad })))
}

/// POST /api/advertisements
pub async fn create_ad(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiJson(p): ApiJson<AdPayload>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let title = p.validate()?;

    let ad_id: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO advertisements (title, description, file_version_id, link_url, position,
                                    start_date, end_date, is_active, display_order)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING ad_id
        "#,
    )
    .bind(&title)
    .bind(optional(p.description.clone()))
    .bind(p.file_version_id)
    .bind(optional(p.link_url.clone()))
    .bind(p.position())
    .bind(p.start_date)
    .bind(p.end_date)
    .bind(p.is_active.unwrap_or(true))
    .bind(p.display_order.unwrap_or(0))
    .fetch_one(pool)
    .await?;

    tracing::info!(ad_id, by = %user.username, "advertisement created");
    Ok((
        StatusCode::CREATED,
        write_ok("Advertisement created successfully", "ad_id", ad_id),
    ))
}

/// PUT /api/advertisements/{id}
pub async fn update_ad(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiPath(ad_id): ApiPath<i32>,
    ApiJson(p): ApiJson<AdPayload>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let title = p.validate()?;

    let updated = sqlx::query(
        r#"
        UPDATE advertisements
        SET title = $2, description = $3, file_version_id = $4, link_url = $5,
            position = $6, start_date = $7, end_date = $8, is_active = $9,
            display_order = $10, updated_at = now()
        WHERE ad_id = $1
        "#,
    )
    .bind(ad_id)
    .bind(&title)
    .bind(optional(p.description.clone()))
    .bind(p.file_version_id)
    .bind(optional(p.link_url.clone()))
    .bind(p.position())
    .bind(p.start_date)
    .bind(p.end_date)
    .bind(p.is_active.unwrap_or(true))
    .bind(p.display_order.unwrap_or(0))
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("Advertisement"));
    }
    tracing::info!(ad_id, by = %user.username, "advertisement updated");
    Ok(write_ok("Advertisement updated successfully", "ad_id", ad_id))
}

/// DELETE /api/advertisements/{id}
pub async fn delete_ad(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiPath(ad_id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let deleted = sqlx::query("DELETE FROM advertisements WHERE ad_id = $1")
        .bind(ad_id)
        .execute(pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::not_found("Advertisement"));
    }
    tracing::info!(ad_id, by = %user.username, "advertisement deleted");
    Ok(write_ok("Advertisement deleted successfully", "ad_id", ad_id))
}

/// POST /api/advertisements/{id}/click
pub async fn record_click(
    State(state): State<AppState>,
    ApiPath(ad_id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let sql = format!(
        "UPDATE advertisements a SET click_count = click_count + 1 \
         WHERE a.ad_id = $1 AND {} RETURNING a.link_url",
        RUNNING
    );
    let link_url: Option<String> = sqlx::query_scalar::<_, Option<String>>(&sql)
        .bind(ad_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Advertisement"))?;

    Ok(Json(json!({ "success": true, "link_url": link_url })))
}
