/**
 * Country Routes
 * Destination countries with their linked services
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};

use crate::auth::{MaybeUser, RequireEditor};
use crate::db::models::{Country, Related};
use crate::error::AppError;
use crate::extractors::{optional, required, ApiJson, ApiPath, ApiQuery};
use crate::query::{fetch_paginated, Filter, Visibility};
use crate::routes::{validate_slug, write_ok, ListParams};
use crate::state::AppState;

const COUNTRY_COLUMNS: &str = r#"
    SELECT c.country_id, c.name, c.url_slug, c.description, c.content, c.flag_image_id,
           m.file_path AS flag_image_path, c.meta_title, c.meta_description,
           c.display_order, c.is_active, c.is_published, c.created_at, c.updated_at
"#;

const COUNTRY_FROM: &str =
    "FROM countries c LEFT JOIN media_files m ON m.file_version_id = c.flag_image_id";

#[derive(Debug, Deserialize)]
pub struct CountryPayload {
    pub name: Option<String>,
    #[serde(alias = "slug")]
    pub url_slug: Option<String>,
    pub description: Option<String>,
    pub content: Option<Value>,
    pub flag_image_id: Option<i32>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    #[serde(alias = "order")]
    pub display_order: Option<i32>,
    pub is_active: Option<bool>,
    pub is_published: Option<bool>,
    /// Replaces the linked services when present.
    pub service_ids: Option<Vec<i32>>,
}

struct CountryInput {
    name: String,
    url_slug: String,
    flags: CatalogFlags,
    payload: CountryPayload,
}

impl CountryPayload {
    fn validate(self) -> Result<CountryInput, AppError> {
        let name = required(self.name.as_deref(), "name")?;
        let url_slug = required(self.url_slug.as_deref(), "url_slug")?;
        validate_slug(&url_slug)?;
        Ok(CountryInput {
            name,
            url_slug,
            flags: CatalogFlags::from_payload(self.display_order, self.is_active, self.is_published),
            payload: self,
        })
    }
}

/// Ordering and visibility columns shared by countries and services. A save
/// carries the whole row, so omitted flags fall back to these defaults on
/// update exactly as on create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CatalogFlags {
    pub display_order: i32,
    pub is_active: bool,
    pub is_published: bool,
}

impl CatalogFlags {
    pub(crate) fn from_payload(
        display_order: Option<i32>,
        is_active: Option<bool>,
        is_published: Option<bool>,
    ) -> Self {
        Self {
            display_order: display_order.unwrap_or(0),
            is_active: is_active.unwrap_or(true),
            is_published: is_published.unwrap_or(false),
        }
    }
}

/// Published-only callers also need the row to be active.
pub(crate) fn catalog_filter(
    published: &'static str,
    active: &'static str,
    visibility: Visibility,
) -> Filter {
    let filter = Filter::new().visibility(published, visibility);
    if visibility.published_only() {
        filter.eq(active, true)
    } else {
        filter
    }
}

pub(crate) fn parse_id(key: &str) -> Result<i32, AppError> {
    key.parse()
        .map_err(|_| AppError::Validation(format!("Invalid id: {}", key)))
}

pub(crate) fn slug_conflict(err: sqlx::Error, what: &str, slug: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(format!("{} with slug '{}' already exists", what, slug))
        }
        _ => err.into(),
    }
}

async fn replace_services(
    tx: &mut Transaction<'_, Postgres>,
    country_id: i32,
    service_ids: &[i32],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM country_services WHERE country_id = $1")
        .bind(country_id)
        .execute(&mut **tx)
        .await?;
    if !service_ids.is_empty() {
        sqlx::query(
            r#"
            INSERT INTO country_services (country_id, service_id)
            SELECT $1, UNNEST($2::int[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(country_id)
        .bind(service_ids)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn related_services(
    pool: &PgPool,
    country_id: i32,
    visibility: Visibility,
) -> Result<Vec<Related>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT s.service_id AS id, s.name, s.url_slug
        FROM country_services cs
        JOIN services s ON s.service_id = cs.service_id
        WHERE cs.country_id = $1
          AND ($2 = false OR (s.is_published AND s.is_active))
        ORDER BY s.display_order, s.name
        "#,
    )
    .bind(country_id)
    .bind(visibility.published_only())
    .fetch_all(pool)
    .await
}

/// GET /api/countries
pub async fn list_countries(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let visibility = Visibility::resolve(user.role(), params.published);
    let filter = catalog_filter("c.is_published", "c.is_active", visibility)
        .search(&["c.name", "c.description"], params.search.as_deref());

    let result = fetch_paginated::<Country>(
        pool,
        COUNTRY_COLUMNS,
        COUNTRY_FROM,
        &filter,
        "c.display_order, c.name",
        params.pagination(),
    )
    .await?;

    Ok(Json(json!({
        "countries": result.items,
        "pagination": result.pagination,
    })))
}

/// GET /api/countries/{slug}
pub async fn get_country(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiPath(slug): ApiPath<String>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let visibility = Visibility::resolve(user.role(), None);
    let sql = format!("{} {} WHERE c.url_slug = $1", COUNTRY_COLUMNS, COUNTRY_FROM);
    let country: Country = sqlx::query_as(&sql)
        .bind(&slug)
        .fetch_optional(pool)
        .await?
        .filter(|c: &Country| !visibility.published_only() || (c.is_published && c.is_active))
        .ok_or_else(|| AppError::not_found("Country"))?;

    let services = related_services(pool, country.country_id, visibility).await?;
    Ok(Json(json!({ "country": country, "services": services })))
}

/// POST /api/countries
pub async fn create_country(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiJson(payload): ApiJson<CountryPayload>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let input = payload.validate()?;
    let p = &input.payload;

    let mut tx = pool.begin().await?;
    let country_id: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO countries (name, url_slug, description, content, flag_image_id, meta_title,
                               meta_description, display_order, is_active, is_published)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING country_id
        "#,
    )
    .bind(&input.name)
    .bind(&input.url_slug)
    .bind(optional(p.description.clone()))
    .bind(p.content.clone().unwrap_or_else(|| json!({})))
    .bind(p.flag_image_id)
    .bind(optional(p.meta_title.clone()))
    .bind(optional(p.meta_description.clone()))
    .bind(input.flags.display_order)
    .bind(input.flags.is_active)
    .bind(input.flags.is_published)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| slug_conflict(e, "Country", &input.url_slug))?;

    if let Some(ids) = &p.service_ids {
        replace_services(&mut tx, country_id, ids).await?;
    }
    tx.commit().await?;

    tracing::info!(country_id, by = %user.username, "country created");
    Ok((
        StatusCode::CREATED,
        write_ok("Country created successfully", "country_id", country_id),
    ))
}

/// PUT /api/countries/{id}
pub async fn update_country(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiPath(key): ApiPath<String>,
    ApiJson(payload): ApiJson<CountryPayload>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let country_id = parse_id(&key)?;
    let input = payload.validate()?;
    let p = &input.payload;

    let mut tx = pool.begin().await?;
    let updated = sqlx::query(
        r#"
        UPDATE countries
        SET name = $2, url_slug = $3, description = $4, content = $5, flag_image_id = $6,
            meta_title = $7, meta_description = $8, display_order = $9, is_active = $10,
            is_published = $11, updated_at = now()
        WHERE country_id = $1
        "#,
    )
    .bind(country_id)
    .bind(&input.name)
    .bind(&input.url_slug)
    .bind(optional(p.description.clone()))
    .bind(p.content.clone().unwrap_or_else(|| json!({})))
    .bind(p.flag_image_id)
    .bind(optional(p.meta_title.clone()))
    .bind(optional(p.meta_description.clone()))
    .bind(input.flags.display_order)
    .bind(input.flags.is_active)
    .bind(input.flags.is_published)
    .execute(&mut *tx)
    .await
    .map_err(|e| slug_conflict(e, "Country", &input.url_slug))?;

    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("Country"));
    }
    if let Some(ids) = &p.service_ids {
        replace_services(&mut tx, country_id, ids).await?;
    }
    tx.commit().await?;

    tracing::info!(country_id, by = %user.username, "country updated");
    Ok(write_ok("Country updated successfully", "country_id", country_id))
}

/// DELETE /api/countries/{id}
pub async fn delete_country(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiPath(key): ApiPath<String>,
) -> Result<impl IntoResponse, AppError> {
    let pool = state.pool()?;
    let country_id = parse_id(&key)?;

    let deleted = sqlx::query("DELETE FROM countries WHERE country_id = $1")
        .bind(country_id)
        .execute(pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::not_found("Country"));
    }

    tracing::info!(country_id, by = %user.username, "country deleted");
    Ok(write_ok("Country deleted successfully", "country_id", country_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;
    use crate::routes::test_support::{app, pg_state, send, test_state, token, unique};
    use sqlx::{Postgres, QueryBuilder};

    fn render(filter: &Filter) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM countries c");
        filter.push_where(&mut qb);
        qb.sql().to_string()
    }

    #[test]
    fn test_public_filter_requires_active_and_published() {
        let public = catalog_filter("c.is_published", "c.is_active", Visibility::PublishedOnly);
        assert_eq!(
            render(&public),
            "SELECT 1 FROM countries c WHERE c.is_published = $1 AND c.is_active = $2"
        );
        let editor = catalog_filter("c.is_published", "c.is_active", Visibility::All);
        assert!(editor.is_empty());
    }

    #[test]
    fn test_omitted_flags_take_create_defaults() {
        assert_eq!(
            CatalogFlags::from_payload(None, None, None),
            CatalogFlags {
                display_order: 0,
                is_active: true,
                is_published: false,
            }
        );
        let given = CatalogFlags::from_payload(Some(4), Some(false), Some(true));
        assert_eq!(given.display_order, 4);
        assert!(!given.is_active && given.is_published);
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("12").unwrap(), 12);
        assert!(matches!(parse_id("canada"), Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unavailable_without_database() {
        let app = app(test_state());
        let (status, body) = send(&app, "GET", "/api/countries", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["message"], "Database not available");
    }

    #[tokio::test]
    async fn test_writes_are_gated_before_database() {
        let app = app(test_state());
        let body = Some(json!({ "name": "Canada", "url_slug": "canada" }));
        let (status, _) = send(&app, "POST", "/api/countries", None, body.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) =
            send(&app, "POST", "/api/countries", Some(&token(Role::Viewer)), body).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_postgres_slug_conflict_links_and_visibility() {
        let Some((state, admin)) = pg_state().await else {
            return;
        };
        let app = app(state);
        let slug = unique("canada");
        let mut service_ids = Vec::new();
        for name in ["visa", "housing"] {
            let body = json!({
                "name": name,
                "url_slug": unique(name),
                "is_published": true,
            });
            let (status, created) =
                send(&app, "POST", "/api/services", Some(&admin), Some(body)).await;
            assert_eq!(status, StatusCode::CREATED);
            service_ids.push(created["service_id"].as_i64().unwrap());
        }

        let country = |ids: &[i64], active: bool| {
            json!({
                "name": slug.clone(),
                "url_slug": slug.clone(),
                "is_published": true,
                "is_active": active,
                "service_ids": ids,
            })
        };
        let (status, created) = send(
            &app,
            "POST",
            "/api/countries",
            Some(&admin),
            Some(country(&service_ids[..1], true)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id_uri = format!("/api/countries/{}", created["country_id"]);
        let slug_uri = format!("/api/countries/{}", slug);

        let (status, body) =
            send(&app, "POST", "/api/countries", Some(&admin), Some(country(&[], true))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], true);

        let (status, _) = send(
            &app,
            "PUT",
            &id_uri,
            Some(&admin),
            Some(country(&service_ids[1..], true)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, detail) = send(&app, "GET", &slug_uri, None, None).await;
        let linked: Vec<i64> = detail["services"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_i64().unwrap())
            .collect();
        assert_eq!(linked, vec![service_ids[1]]);

        // Deactivated: gone for the public, still there for editors.
        send(&app, "PUT", &id_uri, Some(&admin), Some(country(&service_ids[1..], false))).await;
        let (status, _) = send(&app, "GET", &slug_uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "GET", &slug_uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        let search = format!("/api/countries?search={}", slug);
        let (_, public) = send(&app, "GET", &search, None, None).await;
        assert_eq!(public["pagination"]["total"], 0);

        // A save without flags resets them to the create defaults.
        let bare = json!({ "name": slug.clone(), "url_slug": slug.clone() });
        send(&app, "PUT", &id_uri, Some(&admin), Some(bare)).await;
        let (_, reset) = send(&app, "GET", &slug_uri, Some(&admin), None).await;
        assert_eq!(reset["country"]["is_published"], false);
        assert_eq!(reset["country"]["is_active"], true);

        let (status, _) = send(&app, "DELETE", &id_uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
