/**
 * Service Routes
 * Consultancy services and the countries that offer them
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};

use crate::auth::{MaybeUser, RequireEditor};
use crate::db::models::{Related, Service};
use crate::error::AppError;
use crate::extractors::{optional, required, ApiJson, ApiPath, ApiQuery};
use crate::query::{fetch_paginated, Visibility};
use crate::routes::countries::{catalog_filter, parse_id, slug_conflict, CatalogFlags};
use crate::routes::{validate_slug, write_ok, ListParams};
use crate::state::AppState;

const SERVICE_COLUMNS: &str = r#"
    SELECT s.service_id, s.name, s.url_slug, s.description, s.content, s.icon_image_id,
           m.file_path AS icon_image_path, s.meta_title, s.meta_description,
           s.display_order, s.is_active, s.is_published, s.created_at, s.updated_at
"#;

const SERVICE_FROM: &str =
    "FROM services s LEFT JOIN media_files m ON m.file_version_id = s.icon_image_id";

#[derive(Debug, Deserialize)]
pub struct ServicePayload {
    pub name: Option<String>,
    #[serde(alias = "slug")]
    pub url_slug: Option<String>,
    pub description: Option<String>,
    pub content: Option<Value>,
    pub icon_image_id: Option<i32>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    #[serde(alias = "order")]
    pub display_order: Option<i32>,
    pub is_active: Option<bool>,
    pub is_published: Option<bool>,
    pub country_ids: Option<Vec<i32>>,
}

impl ServicePayload {
    fn validate(&self) -> Result<(String, String), AppError> {
        let name = required(self.name.as_deref(), "name")?;
        let url_slug = required(self.url_slug.as_deref(), "url_slug")?;
        validate_slug(&url_slug)?;
        Ok((name, url_slug))
    }

    fn flags(&self) -> CatalogFlags {
        CatalogFlags::from_payload(self.display_order, self.is_active, self.is_published)
    }
}

async fn replace_countries(
    tx: &mut Transaction<'_, Postgres>,
    service_id: i32,
    country_ids: &[i32],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM country_services WHERE service_id = $1")
        .bind(service_id)
        .execute(&mut **tx)
        .await?;
    if !country_ids.is_empty() {
        sqlx::query(
            r#"
            INSERT INTO country_services (country_id, service_id)
            SELECT UNNEST($2::int[]), $1
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(service_id)
        .bind(country_ids)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn related_countries(
    pool: &PgPool,
    service_id: i32,
    visibility: Visibility,
) -> Result<Vec<Related>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT c.country_id AS id, c.name, c.url_slug
        FROM country_services cs
        JOIN countries c ON c.country_id = cs.country_id
        WHERE cs.service_id = $1
          AND ($2 = false OR (c.is_published AND c.is_active))
        ORDER BY c.display_order, c.name
        "#,
    )
    .bind(service_id)
    .bind(visibility.published_only())
    .fetch_all(pool)
    .await
}

/// GET /api/services
pub async fn list_services(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let visibility = Visibility::resolve(user.role(), params.published);
    let filter = catalog_filter("s.is_published", "s.is_active", visibility)
        .search(&["s.name", "s.description"], params.search.as_deref());

    let result = fetch_paginated::<Service>(
        pool,
        SERVICE_COLUMNS,
        SERVICE_FROM,
        &filter,
        "s.display_order, s.name",
        params.pagination(),
    )
    .await?;

    Ok(Json(json!({
        "services": result.items,
        "pagination": result.pagination,
    })))
}

/// GET /api/services/{slug}
pub async fn get_service(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiPath(slug): ApiPath<String>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let visibility = Visibility::resolve(user.role(), None);
    let sql = format!("{} {} WHERE s.url_slug = $1", SERVICE_COLUMNS, SERVICE_FROM);
    let service: Service = sqlx::query_as(&sql)
        .bind(&slug)
        .fetch_optional(pool)
        .await?
        .filter(|s: &Service| !visibility.published_only() || (s.is_published && s.is_active))
        .ok_or_else(|| AppError::not_found("Service"))?;

    let countries = related_countries(pool, service.service_id, visibility).await?;
    Ok(Json(json!({ "service": service, "countries": countries })))
}

/// POST /api/services
pub async fn create_service(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiJson(p): ApiJson<ServicePayload>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let (name, url_slug) = p.validate()?;
    let flags = p.flags();

    let mut tx = pool.begin().await?;
    let service_id: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO services (name, url_slug, description, content, icon_image_id, meta_title,
                              meta_description, display_order, is_active, is_published)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING service_id
        "#,
    )
    .bind(&name)
    .bind(&url_slug)
    .bind(optional(p.description.clone()))
    .bind(p.content.clone().unwrap_or_else(|| json!({})))
    .bind(p.icon_image_id)
    .bind(optional(p.meta_title.clone()))
    .bind(optional(p.meta_description.clone()))
    .bind(flags.display_order)
    .bind(flags.is_active)
    .bind(flags.is_published)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| slug_conflict(e, "Service", &url_slug))?;

    if let Some(ids) = &p.country_ids {
        replace_countries(&mut tx, service_id, ids).await?;
    }
    tx.commit().await?;

    tracing::info!(service_id, by = %user.username, "service created");
    Ok((
        StatusCode::CREATED,
        write_ok("Service created successfully", "service_id", service_id),
    ))
}

/// PUT /api/services/{id}
pub async fn update_service(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiPath(key): ApiPath<String>,
    ApiJson(p): ApiJson<ServicePayload>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let service_id = parse_id(&key)?;
    let (name, url_slug) = p.validate()?;
    let flags = p.flags();

    let mut tx = pool.begin().await?;
    let updated = sqlx::query(
        r#"
        UPDATE services
        SET name = $2, url_slug = $3, description = $4, content = $5, icon_image_id = $6,
            meta_title = $7, meta_description = $8, display_order = $9, is_active = $10,
            is_published = $11, updated_at = now()
        WHERE service_id = $1
        "#,
    )
    .bind(service_id)
    .bind(&name)
    .bind(&url_slug)
    .bind(optional(p.description.clone()))
    .bind(p.content.clone().unwrap_or_else(|| json!({})))
    .bind(p.icon_image_id)
    .bind(optional(p.meta_title.clone()))
    .bind(optional(p.meta_description.clone()))
    .bind(flags.display_order)
    .bind(flags.is_active)
    .bind(flags.is_published)
    .execute(&mut *tx)
    .await
    .map_err(|e| slug_conflict(e, "Service", &url_slug))?;

    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("Service"));
    }
    if let Some(ids) = &p.country_ids {
        replace_countries(&mut tx, service_id, ids).await?;
    }
    tx.commit().await?;

    tracing::info!(service_id, by = %user.username, "service updated");
    Ok(write_ok("Service updated successfully", "service_id", service_id))
}

/// DELETE /api/services/{id}
pub async fn delete_service(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiPath(key): ApiPath<String>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let service_id = parse_id(&key)?;

    let deleted = sqlx::query("DELETE FROM services WHERE service_id = $1")
        .bind(service_id)
        .execute(pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::not_found("Service"));
    }

    tracing::info!(service_id, by = %user.username, "service deleted");
    Ok(write_ok("Service deleted successfully", "service_id", service_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;
    use crate::routes::test_support::{app, send, test_state, token};

    #[test]
    fn test_payload_requires_valid_slug() {
        let payload: ServicePayload =
            serde_json::from_value(json!({ "name": "Visas", "slug": "Student Visas" })).unwrap();
        assert!(matches!(payload.validate(), Err(AppError::Validation(_))));

        let payload: ServicePayload =
            serde_json::from_value(json!({ "name": "Visas", "url_slug": "student-visas" }))
                .unwrap();
        assert_eq!(
            payload.validate().unwrap(),
            ("Visas".to_string(), "student-visas".to_string())
        );
    }

    #[tokio::test]
    async fn test_listing_needs_database() {
        let app = app(test_state());
        let (status, _) = send(&app, "GET", "/api/services/student-visas", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_delete_requires_editor() {
        let app = app(test_state());
        let (status, _) =
            send(&app, "DELETE", "/api/services/3", Some(&token(Role::Viewer)), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
