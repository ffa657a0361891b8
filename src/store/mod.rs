//! Data access for the versioned content (pages, blog posts) and for
//! consultations.
//!
//! Each capability set is a trait with a PostgreSQL implementation
//! ([`postgres::PgStore`]) and an in-memory one ([`memory::MemoryStore`]).
//! Handlers only see `Arc<dyn ...Store>` from [`crate::state::AppState`].
//!
//! Versioning rules shared by both implementations:
//! - a save never mutates an existing version; it appends `max(version) + 1`
//!   together with a fresh PageVersion and a full set of child rows
//! - the max-version row is current
//! - urls/slugs may repeat inside one family but never across families
//! - a failed save leaves no rows behind

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::db::models::{
    BlogPost, BlogVersionInfo, Consultation, ConsultationStatus, MediaFile, Page, PageDetail,
    PageVersionInfo,
};
use crate::error::AppError;
use crate::query::{Paginated, Pagination, Visibility};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::not_found(what),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Invalid(msg) => AppError::Validation(msg),
            StoreError::Database(e) => AppError::from(e),
        }
    }
}

/// Identity of a freshly appended version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedVersion {
    pub id: i32,
    pub version: i32,
    pub page_version_id: i32,
}

// ============================================================================
// Pages
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SectionInput {
    pub section_type: String,
    pub name: Option<String>,
    pub content: Value,
    pub is_published: bool,
    /// Media `file_version_id`s in display order.
    pub media: Vec<i32>,
}

/// Full state of a page as submitted by an editor.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDocument {
    pub url: String,
    pub title: String,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    pub parent_id: Option<i32>,
    pub display_order: i32,
    pub is_published: bool,
    pub sections: Vec<SectionInput>,
}

#[derive(Debug, Clone)]
pub struct PageQuery {
    pub visibility: Visibility,
    pub parent_id: Option<i32>,
    pub search: Option<String>,
    pub pagination: Pagination,
}

#[async_trait]
pub trait PageStore: Send + Sync {
    /// Current versions only.
    async fn list(&self, query: &PageQuery) -> Result<Paginated<Page>, StoreError>;

    /// The given version, or the current one when `version` is `None`.
    async fn get(&self, page_id: i32, version: Option<i32>)
        -> Result<Option<PageDetail>, StoreError>;

    /// Current version of the family whose current row has `url`.
    async fn find_by_url(&self, url: &str) -> Result<Option<PageDetail>, StoreError>;

    /// Newest first.
    async fn versions(&self, page_id: i32) -> Result<Vec<PageVersionInfo>, StoreError>;

    async fn create(
        &self,
        doc: &PageDocument,
        author: Option<i32>,
    ) -> Result<SavedVersion, StoreError>;

    async fn update(
        &self,
        page_id: i32,
        doc: &PageDocument,
        author: Option<i32>,
    ) -> Result<SavedVersion, StoreError>;

    /// Remove the whole family. Returns false when it did not exist.
    async fn delete(&self, page_id: i32) -> Result<bool, StoreError>;
}

// ============================================================================
// Blog
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct BlogDocument {
    pub title: String,
    pub url_slug: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub featured_image_id: Option<i32>,
    pub is_published: bool,
    pub publish_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct BlogQuery {
    pub visibility: Visibility,
    pub category: Option<String>,
    pub tag: Option<String>,
    pub search: Option<String>,
    pub pagination: Pagination,
}

#[async_trait]
pub trait BlogStore: Send + Sync {
    /// Current versions only, newest `publish_date` first.
    async fn list(&self, query: &BlogQuery) -> Result<Paginated<BlogPost>, StoreError>;

    async fn get(&self, post_id: i32, version: Option<i32>) -> Result<Option<BlogPost>, StoreError>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<BlogPost>, StoreError>;

    async fn versions(&self, post_id: i32) -> Result<Vec<BlogVersionInfo>, StoreError>;

    async fn create(
        &self,
        doc: &BlogDocument,
        author: Option<i32>,
    ) -> Result<SavedVersion, StoreError>;

    async fn update(
        &self,
        post_id: i32,
        doc: &BlogDocument,
        author: Option<i32>,
    ) -> Result<SavedVersion, StoreError>;

    async fn delete(&self, post_id: i32) -> Result<bool, StoreError>;
}

/// `publish_date` is server managed: an explicit value wins, otherwise the
/// previous version's date is kept, otherwise a published save stamps now.
pub fn resolve_publish_date(
    doc: &BlogDocument,
    previous: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    doc.publish_date
        .or(previous)
        .or_else(|| doc.is_published.then_some(now))
}

// ============================================================================
// Consultations
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct NewConsultation {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub service: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConsultationQuery {
    pub status: Option<ConsultationStatus>,
    pub search: Option<String>,
    pub pagination: Pagination,
}

#[async_trait]
pub trait ConsultationStore: Send + Sync {
    async fn create(&self, new: &NewConsultation) -> Result<Consultation, StoreError>;

    /// Newest first.
    async fn list(&self, query: &ConsultationQuery)
        -> Result<Paginated<Consultation>, StoreError>;

    async fn get(&self, id: i32) -> Result<Option<Consultation>, StoreError>;

    /// Set the status and, when given, the reply text.
    async fn set_status(
        &self,
        id: i32,
        status: ConsultationStatus,
        reply: Option<String>,
    ) -> Result<Option<Consultation>, StoreError>;

    async fn delete(&self, id: i32) -> Result<bool, StoreError>;

    /// Number of consultations per status, zero counts included.
    async fn counts(&self) -> Result<Vec<(ConsultationStatus, i64)>, StoreError>;
}

// ============================================================================
// Media
// ============================================================================

/// Metadata of a file already written to the upload directory.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMedia {
    pub file_name: String,
    pub original_name: String,
    pub file_path: String,
    pub file_type: String,
    pub mime_type: String,
    pub file_size: i64,
    pub alt_text: Option<String>,
    pub uploaded_by: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct MediaQuery {
    pub file_type: Option<String>,
    pub search: Option<String>,
    pub pagination: Pagination,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn insert(&self, new: &NewMedia) -> Result<MediaFile, StoreError>;

    /// Newest first.
    async fn list(&self, query: &MediaQuery) -> Result<Paginated<MediaFile>, StoreError>;

    async fn get(&self, id: i32) -> Result<Option<MediaFile>, StoreError>;

    /// Replace the given metadata fields; `None` keeps the stored value.
    async fn update(
        &self,
        id: i32,
        original_name: Option<String>,
        alt_text: Option<String>,
    ) -> Result<Option<MediaFile>, StoreError>;

    /// Remove the row and hand it back so the caller can remove the file.
    async fn delete(&self, id: i32) -> Result<Option<MediaFile>, StoreError>;
}
