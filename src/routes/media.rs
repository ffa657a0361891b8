/**
 * Media Routes
 * Multipart upload into uploads/<images|videos|documents> plus metadata CRUD
 */
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::auth::{RequireAdmin, RequireEditor};
use crate::db::models::MediaFile;
use crate::error::AppError;
use crate::extractors::{optional, ApiJson, ApiPath, ApiQuery};
use crate::query::Pagination;
use crate::routes::write_ok;
use crate::state::AppState;
use crate::store::{MediaQuery, NewMedia};

pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Request body cap for the upload route: one file plus multipart framing.
pub const UPLOAD_BODY_LIMIT: usize = MAX_FILE_SIZE + 1024 * 1024;

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/webm",
    "video/quicktime",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/plain",
];

// ============================================================================
// Classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Document,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("video/") {
            Self::Video
        } else {
            Self::Document
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
        }
    }

    pub fn dir(&self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
            Self::Document => "documents",
        }
    }
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain",
        _ => return None,
    })
}

/// Stored extension for an allowed MIME type. The client's filename never
/// decides what the static file server will label the bytes as.
fn extension_from_mime(mime: &str) -> Option<&'static str> {
    Some(match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "application/pdf" => "pdf",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "text/plain" => "txt",
        _ => return None,
    })
}

/// Lowercased extension of `filename`, if it is a plain alphanumeric one.
fn extension_of(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 10 {
        return None;
    }
    ext.chars()
        .all(|c| c.is_ascii_alphanumeric())
        .then(|| ext.to_ascii_lowercase())
}

/// The declared MIME type, or a guess from the extension when the client
/// sent none or a generic one.
pub fn resolve_mime(filename: &str, declared: Option<&str>) -> Option<String> {
    let declared = declared
        .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty() && m != "application/octet-stream");
    declared.or_else(|| {
        extension_of(filename)
            .and_then(|ext| mime_from_extension(&ext))
            .map(str::to_string)
    })
}

pub fn is_allowed(mime: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime)
}

/// A filename extension, when present, has to name the same type as the
/// resolved MIME type.
fn extension_matches(filename: &str, mime: &str) -> bool {
    match extension_of(filename) {
        Some(ext) => mime_from_extension(&ext) == Some(mime),
        None => true,
    }
}

fn detect_raster_image(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 4 {
        return None;
    }
    match bytes {
        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        // GIF: 47 49 46 38
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        // WebP: RIFF .... WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

fn is_raster(mime: &str) -> bool {
    matches!(mime, "image/jpeg" | "image/png" | "image/gif" | "image/webp")
}

/// `<millis>-<random9>.<ext>`, `None` for a type with no stored extension.
fn generate_file_name(mime: &str) -> Option<String> {
    let ext = extension_from_mime(mime)?;
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::rng().random_range(100_000_000..1_000_000_000);
    Some(format!("{}-{}.{}", millis, suffix, ext))
}

/// Stored paths are relative to the upload root and never climb out of it.
fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.contains("..")
        && !path.starts_with('/')
        && !path.contains('\\')
        && !path.contains('\0')
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MediaView {
    #[serde(flatten)]
    pub file: MediaFile,
    /// Public URL path under `/uploads`.
    pub path: String,
}

impl From<MediaFile> for MediaView {
    fn from(file: MediaFile) -> Self {
        let path = format!("/uploads/{}", file.file_path);
        Self { file, path }
    }
}

#[derive(Debug, Deserialize)]
pub struct MediaListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaUpdate {
    #[serde(alias = "name")]
    pub original_name: Option<String>,
    pub alt_text: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

struct Upload {
    original_name: String,
    declared_mime: Option<String>,
    bytes: Vec<u8>,
}

async fn read_upload(mut multipart: Multipart) -> Result<(Upload, Option<String>), AppError> {
    let mut upload: Option<Upload> = None;
    let mut alt_text = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart data: {}", e)))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            if field.name() == Some("alt_text") {
                alt_text = optional(field.text().await.ok());
            }
            continue;
        };
        if upload.is_some() {
            return Err(AppError::Validation("Only one file may be uploaded".into()));
        }

        let declared_mime = field.content_type().map(str::to_string);
        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                AppError::PayloadTooLarge("File too large. Maximum size is 50MB.".into())
            } else {
                AppError::Validation(format!("Failed to read file data: {}", e))
            }
        })? {
            if bytes.len() + chunk.len() > MAX_FILE_SIZE {
                return Err(AppError::PayloadTooLarge(
                    "File too large. Maximum size is 50MB.".into(),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        upload = Some(Upload {
            original_name: file_name,
            declared_mime,
            bytes,
        });
    }

    let upload = upload.ok_or_else(|| AppError::Validation("No file provided".into()))?;
    Ok((upload, alt_text))
}

/// POST /api/media/upload
pub async fn upload_file(
    State(state): State<AppState>,
    RequireEditor(user): RequireEditor,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let (upload, alt_text) = read_upload(multipart).await?;

    if upload.bytes.is_empty() {
        return Err(AppError::Validation("Empty file".into()));
    }

    let original_name = Path::new(&upload.original_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    let mime = resolve_mime(&original_name, upload.declared_mime.as_deref())
        .filter(|m| is_allowed(m))
        .ok_or_else(|| AppError::Validation("File type is not allowed".into()))?;

    if !extension_matches(&original_name, &mime) {
        return Err(AppError::Validation(
            "File extension does not match the file type".into(),
        ));
    }

    if is_raster(&mime) && detect_raster_image(&upload.bytes).is_none() {
        return Err(AppError::Validation(
            "File content does not match an allowed image type.".into(),
        ));
    }

    let kind = MediaKind::from_mime(&mime);
    let file_name = generate_file_name(&mime)
        .ok_or_else(|| AppError::Validation("File type is not allowed".into()))?;
    let dir = state.config.upload_dir.join(kind.dir());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| AppError::Internal(format!("failed to create upload directory: {}", e)))?;
    tokio::fs::write(dir.join(&file_name), &upload.bytes)
        .await
        .map_err(|e| AppError::Internal(format!("failed to save file: {}", e)))?;

    let new = NewMedia {
        file_path: format!("{}/{}", kind.dir(), file_name),
        file_name,
        original_name,
        file_type: kind.as_str().to_string(),
        mime_type: mime,
        file_size: upload.bytes.len() as i64,
        alt_text,
        uploaded_by: (user.id > 0).then_some(user.id),
    };
    let file = match state.media.insert(&new).await {
        Ok(file) => file,
        Err(e) => {
            // Do not leave an orphan file behind.
            let _ = tokio::fs::remove_file(state.config.upload_dir.join(&new.file_path)).await;
            return Err(e.into());
        }
    };

    tracing::info!(
        file_version_id = file.file_version_id,
        size = file.file_size,
        by = %user.username,
        "File uploaded: {}",
        file.file_path
    );

    let Json(mut body) = write_ok("File uploaded successfully", "file_version_id", file.file_version_id);
    body["media"] = json!(MediaView::from(file));
    Ok((StatusCode::CREATED, Json(body)))
}

/// GET /api/media
pub async fn list_media(
    State(state): State<AppState>,
    RequireEditor(_user): RequireEditor,
    ApiQuery(params): ApiQuery<MediaListParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = MediaQuery {
        file_type: optional(params.file_type),
        search: params.search,
        pagination: Pagination::new(params.page, params.limit),
    };
    let result = state.media.list(&query).await?;
    let media: Vec<MediaView> = result.items.into_iter().map(MediaView::from).collect();
    Ok(Json(json!({
        "media": media,
        "pagination": result.pagination,
    })))
}

/// GET /api/media/{fileId}
pub async fn get_media(
    State(state): State<AppState>,
    ApiPath(file_id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    let file = state
        .media
        .get(file_id)
        .await?
        .ok_or_else(|| AppError::not_found("Media file"))?;
    Ok(Json(json!({ "media": MediaView::from(file) })))
}

/// PUT /api/media/{fileId}
pub async fn update_media(
    State(state): State<AppState>,
    RequireEditor(_user): RequireEditor,
    ApiPath(file_id): ApiPath<i32>,
    ApiJson(payload): ApiJson<MediaUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let file = state
        .media
        .update(file_id, optional(payload.original_name), payload.alt_text)
        .await?
        .ok_or_else(|| AppError::not_found("Media file"))?;
    let Json(mut body) = write_ok("Media updated successfully", "file_version_id", file_id);
    body["media"] = json!(MediaView::from(file));
    Ok(Json(body))
}

/// DELETE /api/media/{fileId}
pub async fn delete_media(
    State(state): State<AppState>,
    RequireAdmin(user): RequireAdmin,
    ApiPath(file_id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    let file = state
        .media
        .delete(file_id)
        .await?
        .ok_or_else(|| AppError::not_found("Media file"))?;

    remove_stored_file(&state.config.upload_dir, &file.file_path).await;
    tracing::info!(file_id, by = %user.username, "File deleted: {}", file.file_path);
    Ok(write_ok("Media deleted successfully", "file_version_id", file_id))
}

async fn remove_stored_file(root: &Path, relative: &str) {
    if !is_safe_relative(relative) {
        tracing::warn!("Refusing to delete suspicious path: {}", relative);
        return;
    }
    let path: PathBuf = root.join(relative);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Stored file already missing: {}", path.display());
        }
        Err(e) => tracing::error!("Failed to delete file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::models::Role;
    use crate::routes::test_support::{app, send, token, TEST_SECRET};
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;

    const PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
    ];
    const BOUNDARY: &str = "X-BOUNDARY-1234";

    fn media_app(dir: &Path) -> Router {
        let config = AppConfig {
            jwt_secret: TEST_SECRET.to_string(),
            upload_dir: dir.to_path_buf(),
            ..AppConfig::default()
        };
        app(AppState::in_memory(config))
    }

    fn multipart_body(files: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, mime, bytes) in files {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                    name
                )
                .as_bytes(),
            );
            body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime).as_bytes());
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    async fn upload(app: &Router, token: Option<&str>, body: Vec<u8>) -> (StatusCode, Value) {
        let mut req = Request::post("/api/media/upload").header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {}", token));
        }
        let res = app
            .clone()
            .oneshot(req.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[test]
    fn test_classification_by_mime_prefix() {
        assert_eq!(MediaKind::from_mime("image/png").dir(), "images");
        assert_eq!(MediaKind::from_mime("video/mp4").dir(), "videos");
        assert_eq!(MediaKind::from_mime("application/pdf").dir(), "documents");
    }

    #[test]
    fn test_resolve_mime_falls_back_to_extension() {
        assert_eq!(
            resolve_mime("a.PNG", Some("application/octet-stream")).as_deref(),
            Some("image/png")
        );
        assert_eq!(
            resolve_mime("a.bin", Some("text/plain; charset=utf-8")).as_deref(),
            Some("text/plain")
        );
        assert_eq!(resolve_mime("noext", None), None);
    }

    #[test]
    fn test_generated_name_shape() {
        let name = generate_file_name("image/jpeg").unwrap();
        let (stamp, rest) = name.split_once('-').unwrap();
        assert!(stamp.parse::<i64>().is_ok());
        let (random, ext) = rest.split_once('.').unwrap();
        assert_eq!(random.len(), 9);
        assert_eq!(ext, "jpg");
        assert!(generate_file_name("text/html").is_none());
    }

    #[test]
    fn test_every_allowed_type_has_a_stored_extension() {
        for mime in ALLOWED_MIME_TYPES {
            let ext = extension_from_mime(mime).unwrap();
            assert_eq!(mime_from_extension(ext), Some(*mime));
        }
        assert!(!is_allowed("image/svg+xml"));
    }

    #[test]
    fn test_extension_must_match_type() {
        assert!(extension_matches("photo.JPEG", "image/jpeg"));
        assert!(extension_matches("README", "text/plain"));
        assert!(!extension_matches("evil.html", "text/plain"));
        assert!(!extension_matches("logo.svg", "image/png"));
    }

    #[test]
    fn test_magic_bytes() {
        assert_eq!(detect_raster_image(PNG), Some("image/png"));
        assert_eq!(detect_raster_image(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(detect_raster_image(b"GIF89a"), Some("image/gif"));
        assert_eq!(detect_raster_image(b"hello"), None);
    }

    #[test]
    fn test_safe_relative_paths() {
        assert!(is_safe_relative("images/1-2.png"));
        assert!(!is_safe_relative("../etc/passwd"));
        assert!(!is_safe_relative("/etc/passwd"));
    }

    #[tokio::test]
    async fn test_upload_then_fetch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let app = media_app(dir.path());
        let editor = token(Role::Editor);

        let (status, created) =
            upload(&app, Some(&editor), multipart_body(&[("logo.png", "image/png", PNG)])).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["file_version_id"].as_i64().unwrap();

        let (status, fetched) = send(&app, "GET", &format!("/api/media/{}", id), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["media"]["file_type"], "image");
        assert_eq!(fetched["media"]["original_name"], "logo.png");
        let path = fetched["media"]["path"].as_str().unwrap().to_string();
        assert!(path.starts_with("/uploads/images/"));

        // Byte-identical on disk and through the static file route.
        let relative = fetched["media"]["file_path"].as_str().unwrap();
        assert_eq!(std::fs::read(dir.path().join(relative)).unwrap(), PNG);

        let res = app
            .clone()
            .oneshot(Request::get(path.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let served = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&served[..], PNG);
    }

    #[tokio::test]
    async fn test_upload_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let app = media_app(dir.path());
        let editor = token(Role::Editor);

        let (status, _) = upload(&app, None, multipart_body(&[("a.png", "image/png", PNG)])).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = upload(
            &app,
            Some(&editor),
            multipart_body(&[("evil.exe", "application/x-msdownload", &b"MZ"[..])]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "File type is not allowed");

        let (status, _) = upload(
            &app,
            Some(&editor),
            multipart_body(&[("fake.png", "image/png", &b"not really a png"[..])]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = upload(
            &app,
            Some(&editor),
            multipart_body(&[("a.png", "image/png", PNG), ("b.png", "image/png", PNG)]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Only one file may be uploaded");

        let (status, _) = upload(&app, Some(&editor), multipart_body(&[])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_markup_cannot_be_smuggled_in_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let app = media_app(dir.path());
        let editor = token(Role::Editor);
        let markup = &b"<script>alert(1)</script>"[..];

        let (status, body) = upload(
            &app,
            Some(&editor),
            multipart_body(&[("evil.html", "text/plain", markup)]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "File extension does not match the file type");

        let (status, _) = upload(
            &app,
            Some(&editor),
            multipart_body(&[("logo.svg", "image/svg+xml", markup)]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Without an extension the stored name still comes from the type.
        let (status, created) = upload(
            &app,
            Some(&editor),
            multipart_body(&[("notes", "text/plain", markup)]),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let path = created["media"]["path"].as_str().unwrap().to_string();
        assert!(path.ends_with(".txt"));

        let res = app
            .clone()
            .oneshot(Request::get(path.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        assert_eq!(res.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_update_and_delete_media() {
        let dir = tempfile::tempdir().unwrap();
        let app = media_app(dir.path());
        let editor = token(Role::Editor);
        let admin = token(Role::Admin);

        let (_, created) = upload(
            &app,
            Some(&editor),
            multipart_body(&[("doc.pdf", "application/pdf", &b"%PDF-1.4"[..])]),
        )
        .await;
        let uri = format!("/api/media/{}", created["file_version_id"]);
        let relative = created["media"]["file_path"].as_str().unwrap().to_string();
        assert!(relative.starts_with("documents/"));

        let (status, updated) = send(
            &app,
            "PUT",
            &uri,
            Some(&editor),
            Some(json!({ "alt_text": "Brochure" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["media"]["alt_text"], "Brochure");

        let (_, listed) = send(&app, "GET", "/api/media?type=document", Some(&editor), None).await;
        assert_eq!(listed["pagination"]["total"], 1);

        let (status, _) = send(&app, "DELETE", &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!dir.path().join(&relative).exists());
        let (status, _) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
