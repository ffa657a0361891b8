/**
 * Page Routes
 * Versioned pages: every save appends a new version with a full section set.
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{MaybeUser, RequireAdmin, RequireEditor};
use crate::db::models::PageDetail;
use crate::error::AppError;
use crate::extractors::{optional, required, ApiJson, ApiPath, ApiQuery};
use crate::query::{Pagination, Visibility};
use crate::routes::write_ok;
use crate::state::AppState;
use crate::store::{PageDocument, PageQuery, SectionInput};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PageListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub published: Option<bool>,
    pub parent_id: Option<i32>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VersionParams {
    pub version: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SectionPayload {
    #[serde(rename = "type", alias = "section_type")]
    pub section_type: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub content: Value,
    pub is_published: Option<bool>,
    #[serde(default)]
    pub media: Vec<i32>,
}

/// Full page state. Omitted optional fields are stored as empty.
#[derive(Debug, Deserialize)]
pub struct PagePayload {
    pub url: Option<String>,
    pub title: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    pub parent_id: Option<i32>,
    #[serde(alias = "order")]
    pub display_order: Option<i32>,
    pub is_published: Option<bool>,
    #[serde(default)]
    pub sections: Vec<SectionPayload>,
}

impl PagePayload {
    fn into_document(self) -> Result<PageDocument, AppError> {
        let url = required(self.url.as_deref(), "url")?;
        validate_url(&url)?;
        let title = required(self.title.as_deref(), "title")?;

        let sections = self
            .sections
            .into_iter()
            .enumerate()
            .map(|(index, section)| {
                let section_type = section
                    .section_type
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        AppError::Validation(format!("sections[{}].type is required", index))
                    })?
                    .to_string();
                Ok(SectionInput {
                    section_type,
                    name: optional(section.name),
                    content: match section.content {
                        Value::Null => json!({}),
                        other => other,
                    },
                    is_published: section.is_published.unwrap_or(true),
                    media: section.media,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(PageDocument {
            url,
            title,
            meta_title: optional(self.meta_title),
            meta_description: optional(self.meta_description),
            meta_keywords: optional(self.meta_keywords),
            parent_id: self.parent_id,
            display_order: self.display_order.unwrap_or(0),
            is_published: self.is_published.unwrap_or(false),
            sections,
        })
    }
}

/// Site-relative path: leading slash, no whitespace, no traversal.
fn validate_url(url: &str) -> Result<(), AppError> {
    if !url.starts_with('/') || url.chars().any(char::is_whitespace) || url.contains("..") {
        return Err(AppError::Validation(
            "url must be a site path starting with '/'".into(),
        ));
    }
    Ok(())
}

/// Hide unpublished pages and sections from callers who cannot edit.
fn visible(detail: PageDetail, can_edit: bool) -> Option<PageDetail> {
    if can_edit {
        return Some(detail);
    }
    if !detail.page.is_published {
        return None;
    }
    let PageDetail { page, sections } = detail;
    Some(PageDetail {
        page,
        sections: sections
            .into_iter()
            .filter(|s| s.section.is_published)
            .collect(),
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/pages
pub async fn list_pages(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiQuery(params): ApiQuery<PageListParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = PageQuery {
        visibility: Visibility::resolve(user.role(), params.published),
        parent_id: params.parent_id,
        search: params.search,
        pagination: Pagination::new(params.page, params.limit),
    };
    let result = state.pages.list(&query).await?;
    Ok(Json(json!({
        "pages": result.items,
        "pagination": result.pagination,
    })))
}

/// GET /api/pages/{id}?version=N
pub async fn get_page(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiPath(page_id): ApiPath<i32>,
    ApiQuery(params): ApiQuery<VersionParams>,
) -> Result<impl IntoResponse, AppError> {
    let can_edit = user.role().is_some_and(|r| r.can_edit());

    // Old versions stay hidden from the public once the page is withdrawn.
    if params.version.is_some() && !can_edit {
        let current = state.pages.get(page_id, None).await?;
        if !current.is_some_and(|d| d.page.is_published) {
            return Err(AppError::not_found("Page"));
        }
    }

    let detail = state
        .pages
        .get(page_id, params.version)
        .await?
        .and_then(|d| visible(d, can_edit))
        .ok_or_else(|| AppError::not_found("Page"))?;
    Ok(Json(json!({ "page": detail })))
}

/// GET /api/pages/resolve?url=/about
pub async fn resolve_page(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiQuery(params): ApiQuery<ResolveParams>,
) -> Result<impl IntoResponse, AppError> {
    let url = required(params.url.as_deref(), "url")?;
    let can_edit = user.role().is_some_and(|r| r.can_edit());
    let detail = state
        .pages
        .find_by_url(&url)
        .await?
        .and_then(|d| visible(d, can_edit))
        .ok_or_else(|| AppError::not_found("Page"))?;
    Ok(Json(json!({ "page": detail })))
}

/// GET /api/pages/{id}/versions
pub async fn list_versions(
    State(state): State<AppState>,
    RequireEditor(_user): RequireEditor,
    ApiPath(page_id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    let versions = state.pages.versions(page_id).await?;
    if versions.is_empty() {
        return Err(AppError::not_found("Page"));
    }
    Ok(Json(json!({ "versions": versions })))
}

/// POST /api/pages
pub async fn create_page(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiJson(payload): ApiJson<PagePayload>,
) -> Result<impl IntoResponse, AppError> {
    let doc = payload.into_document()?;
    let saved = state.pages.create(&doc, Some(user.id)).await?;
    tracing::info!(page_id = saved.id, by = %user.username, "page created");

    let Json(mut body) = write_ok("Page created successfully", "page_id", saved.id);
    body["version"] = json!(saved.version);
    Ok((StatusCode::CREATED, Json(body)))
}

/// PUT /api/pages/{id}
pub async fn update_page(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiPath(page_id): ApiPath<i32>,
    ApiJson(payload): ApiJson<PagePayload>,
) -> Result<impl IntoResponse, AppError> {
    let doc = payload.into_document()?;
    let saved = state.pages.update(page_id, &doc, Some(user.id)).await?;
    tracing::info!(page_id, version = saved.version, by = %user.username, "page updated");

    let Json(mut body) = write_ok("Page updated successfully", "page_id", saved.id);
    body["version"] = json!(saved.version);
    Ok(Json(body))
}

/// DELETE /api/pages/{id}
pub async fn delete_page(
    State(state): State<AppState>,
    RequireAdmin(user): RequireAdmin,
    ApiPath(page_id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    if !state.pages.delete(page_id).await? {
        return Err(AppError::not_found("Page"));
    }
    tracing::info!(page_id, by = %user.username, "page deleted");
    Ok(write_ok("Page deleted successfully", "page_id", page_id))
}
