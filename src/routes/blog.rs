/**
 * Blog Routes
 * Versioned blog posts with slug lookup and edit history
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{MaybeUser, RequireAdmin, RequireEditor};
use crate::db::models::BlogPost;
use crate::error::AppError;
use crate::extractors::{optional, required, ApiJson, ApiPath, ApiQuery};
use crate::query::{Pagination, Visibility};
use crate::routes::{validate_slug, write_ok};
use crate::state::AppState;
use crate::store::{BlogDocument, BlogQuery};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BlogListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub published: Option<bool>,
    pub category: Option<String>,
    pub tag: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VersionParams {
    pub version: Option<i32>,
}

/// Full post state; see `PagePayload` for the PUT semantics.
#[derive(Debug, Deserialize)]
pub struct BlogPayload {
    pub title: Option<String>,
    #[serde(alias = "slug")]
    pub url_slug: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub featured_image_id: Option<i32>,
    pub is_published: Option<bool>,
    pub publish_date: Option<DateTime<Utc>>,
}

impl BlogPayload {
    fn into_document(self) -> Result<BlogDocument, AppError> {
        let title = required(self.title.as_deref(), "title")?;
        let url_slug = required(self.url_slug.as_deref(), "url_slug")?;
        validate_slug(&url_slug)?;

        let mut tags: Vec<String> = Vec::new();
        for tag in self.tags {
            let tag = tag.trim().to_string();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        Ok(BlogDocument {
            title,
            url_slug,
            summary: optional(self.summary),
            content: optional(self.content).map(|html| sanitize_html(&html)),
            category: optional(self.category),
            tags,
            author: optional(self.author),
            featured_image_id: self.featured_image_id,
            is_published: self.is_published.unwrap_or(false),
            publish_date: self.publish_date,
        })
    }
}

/// Sanitize HTML content using ammonia
fn sanitize_html(html: &str) -> String {
    ammonia::clean(html)
}

fn visible(post: BlogPost, can_edit: bool) -> Option<BlogPost> {
    (can_edit || post.is_published).then_some(post)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/blog
pub async fn list_posts(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiQuery(params): ApiQuery<BlogListParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = BlogQuery {
        visibility: Visibility::resolve(user.role(), params.published),
        category: optional(params.category),
        tag: optional(params.tag),
        search: params.search,
        pagination: Pagination::new(params.page, params.limit),
    };
    let result = state.blog.list(&query).await?;
    Ok(Json(json!({
        "posts": result.items,
        "pagination": result.pagination,
    })))
}

/// GET /api/blog/{id}?version=N
pub async fn get_post(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiPath(post_id): ApiPath<i32>,
    ApiQuery(params): ApiQuery<VersionParams>,
) -> Result<impl IntoResponse, AppError> {
    let can_edit = user.role().is_some_and(|r| r.can_edit());

    if params.version.is_some() && !can_edit {
        let current = state.blog.get(post_id, None).await?;
        if !current.is_some_and(|p| p.is_published) {
            return Err(AppError::not_found("Blog post"));
        }
    }

    let post = state
        .blog
        .get(post_id, params.version)
        .await?
        .and_then(|p| visible(p, can_edit))
        .ok_or_else(|| AppError::not_found("Blog post"))?;
    Ok(Json(json!({ "post": post })))
}

/// GET /api/blog/slug/{slug}
pub async fn get_post_by_slug(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiPath(slug): ApiPath<String>,
) -> Result<impl IntoResponse, AppError> {
    let can_edit = user.role().is_some_and(|r| r.can_edit());
    let post = state
        .blog
        .find_by_slug(&slug)
        .await?
        .and_then(|p| visible(p, can_edit))
        .ok_or_else(|| AppError::not_found("Blog post"))?;
    Ok(Json(json!({ "post": post })))
}

/// GET /api/blog/{id}/versions
pub async fn list_versions(
    State(state): State<AppState>,
    RequireEditor(_user): RequireEditor,
    ApiPath(post_id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    let versions = state.blog.versions(post_id).await?;
    if versions.is_empty() {
        return Err(AppError::not_found("Blog post"));
    }
    Ok(Json(json!({ "versions": versions })))
}

/// POST /api/blog
pub async fn create_post(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiJson(payload): ApiJson<BlogPayload>,
) -> Result<impl IntoResponse, AppError> {
    let doc = payload.into_document()?;
    let saved = state.blog.create(&doc, Some(user.id)).await?;
    tracing::info!(post_id = saved.id, slug = %doc.url_slug, by = %user.username, "blog post created");

    let Json(mut body) = write_ok("Blog post created successfully", "post_id", saved.id);
    body["version"] = json!(saved.version);
    Ok((StatusCode::CREATED, Json(body)))
}

/// PUT /api/blog/{id}
pub async fn update_post(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    ApiPath(post_id): ApiPath<i32>,
    ApiJson(payload): ApiJson<BlogPayload>,
) -> Result<impl IntoResponse, AppError> {
    let doc = payload.into_document()?;
    let saved = state.blog.update(post_id, &doc, Some(user.id)).await?;
    tracing::info!(post_id, version = saved.version, by = %user.username, "blog post updated");

    let Json(mut body) = write_ok("Blog post updated successfully", "post_id", saved.id);
    body["version"] = json!(saved.version);
    Ok(Json(body))
}

/// DELETE /api/blog/{id}
pub async fn delete_post(
    State(state): State<AppState>,
    RequireAdmin(user): RequireAdmin,
    ApiPath(post_id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    if !state.blog.delete(post_id).await? {
        return Err(AppError::not_found("Blog post"));
    }
    tracing::info!(post_id, by = %user.username, "blog post deleted");
    Ok(write_ok("Blog post deleted successfully", "post_id", post_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;
    use crate::routes::test_support::{app, pg_state, send, test_state, token, unique};
    use serde_json::Value;

    fn post(slug: &str, category: &str, published: bool, date: &str) -> Value {
        json!({
            "title": format!("Post {}", slug),
            "url_slug": slug,
            "category": category,
            "is_published": published,
            "publish_date": date,
            "content": "<p>Hello</p><script>alert(1)</script>",
        })
    }

    #[test]
    fn test_sanitize_html_strips_scripts() {
        let clean = sanitize_html("<p>ok</p><script>alert('x')</script>");
        assert!(clean.contains("<p>ok</p>"));
        assert!(!clean.contains("script"));
    }

    #[tokio::test]
    async fn test_published_category_filter_orders_by_publish_date() {
        let app = app(test_state());
        let editor = token(Role::Editor);
        for body in [
            post("older", "كندا", true, "2025-01-01T00:00:00Z"),
            post("newer", "كندا", true, "2025-03-01T00:00:00Z"),
            post("draft", "كندا", false, "2025-04-01T00:00:00Z"),
            post("elsewhere", "ألمانيا", true, "2025-05-01T00:00:00Z"),
        ] {
            let (status, _) = send(&app, "POST", "/api/blog", Some(&editor), Some(body)).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        // category=كندا, percent-encoded
        let uri = "/api/blog?published=true&category=%D9%83%D9%86%D8%AF%D8%A7";
        for caller in [None, Some(editor.as_str())] {
            let (status, body) = send(&app, "GET", uri, caller, None).await;
            assert_eq!(status, StatusCode::OK);
            let slugs: Vec<&str> = body["posts"]
                .as_array()
                .unwrap()
                .iter()
                .map(|p| p["url_slug"].as_str().unwrap())
                .collect();
            assert_eq!(slugs, vec!["newer", "older"]);
        }
    }

    #[tokio::test]
    async fn test_history_of_a_withdrawn_post_is_private() {
        let app = app(test_state());
        let editor = token(Role::Editor);
        let (_, created) = send(
            &app,
            "POST",
            "/api/blog",
            Some(&editor),
            Some(post("intake", "news", true, "2025-01-01T00:00:00Z")),
        )
        .await;
        let uri = format!("/api/blog/{}", created["post_id"]);
        send(
            &app,
            "PUT",
            &uri,
            Some(&editor),
            Some(post("intake", "news", false, "2025-01-01T00:00:00Z")),
        )
        .await;

        let v1 = format!("{}?version=1", uri);
        let (status, _) = send(&app, "GET", &v1, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "GET", &v1, Some(&editor), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_content_is_sanitized_on_save() {
        let app = app(test_state());
        let editor = token(Role::Editor);
        let (_, created) = send(
            &app,
            "POST",
            "/api/blog",
            Some(&editor),
            Some(post("safe", "news", true, "2025-01-01T00:00:00Z")),
        )
        .await;
        let (_, body) = send(
            &app,
            "GET",
            &format!("/api/blog/{}", created["post_id"]),
            None,
            None,
        )
        .await;
        let content = body["post"]["content"].as_str().unwrap();
        assert!(content.contains("<p>Hello</p>"));
        assert!(!content.contains("script"));
    }

    #[tokio::test]
    async fn test_publish_date_is_stamped_and_carried_forward() {
        let app = app(test_state());
        let editor = token(Role::Editor);
        let body = json!({ "title": "T", "url_slug": "t", "is_published": true });
        let (_, created) = send(&app, "POST", "/api/blog", Some(&editor), Some(body.clone())).await;
        let uri = format!("/api/blog/{}", created["post_id"]);
        let (_, first) = send(&app, "GET", &uri, None, None).await;
        let stamped = first["post"]["publish_date"].clone();
        assert!(stamped.is_string());

        let (status, updated) = send(&app, "PUT", &uri, Some(&editor), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["version"], 2);
        let (_, second) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(second["post"]["publish_date"], stamped);
    }

    #[tokio::test]
    async fn test_slug_lookup_and_conflict() {
        let app = app(test_state());
        let editor = token(Role::Editor);
        send(
            &app,
            "POST",
            "/api/blog",
            Some(&editor),
            Some(post("visa-guide", "news", true, "2025-01-01T00:00:00Z")),
        )
        .await;

        let (status, body) = send(&app, "GET", "/api/blog/slug/visa-guide", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["post"]["title"], "Post visa-guide");

        let (status, _) = send(
            &app,
            "POST",
            "/api/blog",
            Some(&editor),
            Some(post("visa-guide", "news", true, "2025-01-01T00:00:00Z")),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            "POST",
            "/api/blog",
            Some(&editor),
            Some(post("Bad Slug", "news", true, "2025-01-01T00:00:00Z")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_versions_listing_needs_editor() {
        let app = app(test_state());
        let editor = token(Role::Editor);
        let (_, created) = send(
            &app,
            "POST",
            "/api/blog",
            Some(&editor),
            Some(post("h", "news", false, "2025-01-01T00:00:00Z")),
        )
        .await;
        let uri = format!("/api/blog/{}/versions", created["post_id"]);

        let (status, _) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = send(&app, "GET", &uri, Some(&editor), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["versions"][0]["version"], 1);
    }

    #[tokio::test]
    async fn test_postgres_post_versions_and_slug_claim() {
        let Some((state, admin)) = pg_state().await else {
            return;
        };
        let app = app(state);
        let slug = unique("post");

        let (status, created) = send(
            &app,
            "POST",
            "/api/blog",
            Some(&admin),
            Some(post(&slug, "news", true, "2025-01-01T00:00:00Z")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let uri = format!("/api/blog/{}", created["post_id"]);

        let mut edited = post(&slug, "guides", true, "2025-01-01T00:00:00Z");
        edited["summary"] = json!("second draft");
        let (_, saved) = send(&app, "PUT", &uri, Some(&admin), Some(edited)).await;
        assert_eq!(saved["version"], 2);

        let (_, by_slug) = send(&app, "GET", &format!("/api/blog/slug/{}", slug), None, None).await;
        assert_eq!(by_slug["post"]["version"], 2);
        assert_eq!(by_slug["post"]["category"], "guides");

        let search = format!("/api/blog?search={}", slug);
        let (_, listed) = send(&app, "GET", &search, None, None).await;
        assert_eq!(listed["pagination"]["total"], 1);

        let (status, _) = send(
            &app,
            "POST",
            "/api/blog",
            Some(&admin),
            Some(post(&slug, "news", true, "2025-01-01T00:00:00Z")),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&app, "DELETE", &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", &format!("{}/versions", uri), Some(&admin), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
