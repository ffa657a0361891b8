//! Database Models - row types shared by the stores and route handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgTypeInfo, PgValueRef};
use sqlx::{Decode, FromRow, Postgres, Type};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Implements text-column decoding for enums that round-trip through `as_str`/`FromStr`.
macro_rules! text_enum {
    ($ty:ty) => {
        impl Type<Postgres> for $ty {
            fn type_info() -> PgTypeInfo {
                <String as Type<Postgres>>::type_info()
            }

            fn compatible(ty: &PgTypeInfo) -> bool {
                <String as Type<Postgres>>::compatible(ty)
            }
        }

        impl<'r> Decode<'r, Postgres> for $ty {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let raw = <&'r str as Decode<'r, Postgres>>::decode(value)?;
                Ok(raw.parse()?)
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ============================================================================
// Users
// ============================================================================

/// Admin roles, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Admin => "admin",
        }
    }

    pub fn can_edit(&self) -> bool {
        *self >= Self::Editor
    }
}

impl std::str::FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Self::Viewer),
            "editor" => Ok(Self::Editor),
            "admin" => Ok(Self::Admin),
            _ => Err(UnknownVariant {
                kind: "role",
                value: s.to_string(),
            }),
        }
    }
}

text_enum!(Role);

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AdminUser {
    pub user_id: i32,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Media
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct MediaFile {
    pub file_version_id: i32,
    pub file_name: String,
    pub original_name: String,
    pub file_path: String,
    pub file_type: String,
    pub mime_type: String,
    pub file_size: i64,
    pub alt_text: Option<String>,
    pub uploaded_by: Option<i32>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Pages
// ============================================================================

/// One version of a page.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub page_id: i32,
    pub version: i32,
    pub page_version_id: i32,
    pub url: String,
    pub title: String,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    pub parent_id: Option<i32>,
    #[serde(rename = "order")]
    pub display_order: i32,
    pub is_published: bool,
    pub created_by: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SectionRow {
    pub section_id: i64,
    pub page_version_id: i32,
    #[serde(rename = "type")]
    pub section_type: String,
    pub name: Option<String>,
    pub content: Value,
    #[serde(rename = "order")]
    pub display_order: i32,
    pub is_published: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    #[serde(flatten)]
    pub section: SectionRow,
    pub media: Vec<MediaFile>,
}

/// A page version together with the sections of its PageVersion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDetail {
    #[serde(flatten)]
    pub page: Page,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PageVersionInfo {
    pub version: i32,
    pub page_version_id: i32,
    pub url: String,
    pub title: String,
    pub is_published: bool,
    pub created_by: Option<i32>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Blog
// ============================================================================

/// One version of a blog post.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BlogPost {
    pub id: i64,
    pub post_id: i32,
    pub version: i32,
    pub page_version_id: i32,
    pub title: String,
    pub url_slug: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub featured_image_id: Option<i32>,
    pub featured_image_path: Option<String>,
    pub is_published: bool,
    pub publish_date: Option<DateTime<Utc>>,
    pub created_by: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BlogVersionInfo {
    pub version: i32,
    pub page_version_id: i32,
    pub title: String,
    pub url_slug: String,
    pub is_published: bool,
    pub created_by: Option<i32>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Consultations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsultationStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in-progress", alias = "replied")]
    InProgress,
    #[serde(rename = "completed", alias = "closed")]
    Completed,
    #[serde(rename = "rejected")]
    Rejected,
}

impl ConsultationStatus {
    pub const ALL: [ConsultationStatus; 4] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ConsultationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(Self::Pending),
            "in-progress" | "in_progress" | "replied" => Ok(Self::InProgress),
            "completed" | "closed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            other => Err(UnknownVariant {
                kind: "consultation status",
                value: other.to_string(),
            }),
        }
    }
}

text_enum!(ConsultationStatus);

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Consultation {
    pub consultation_id: i32,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub service: Option<String>,
    pub message: Option<String>,
    pub status: ConsultationStatus,
    pub reply: Option<String>,
    pub replied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Countries & services
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Country {
    pub country_id: i32,
    pub name: String,
    pub url_slug: String,
    pub description: Option<String>,
    pub content: Value,
    pub flag_image_id: Option<i32>,
    pub flag_image_path: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    #[serde(rename = "order")]
    pub display_order: i32,
    pub is_active: bool,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Service {
    pub service_id: i32,
    pub name: String,
    pub url_slug: String,
    pub description: Option<String>,
    pub content: Value,
    pub icon_image_id: Option<i32>,
    pub icon_image_path: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    #[serde(rename = "order")]
    pub display_order: i32,
    pub is_active: bool,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal reference to a linked country or service.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Related {
    pub id: i32,
    pub name: String,
    pub url_slug: String,
}

// ============================================================================
// Advertisements & settings
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Advertisement {
    pub ad_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub file_version_id: Option<i32>,
    pub image_path: Option<String>,
    pub link_url: Option<String>,
    pub position: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(rename = "order")]
    pub display_order: i32,
    pub click_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Setting {
    pub setting_key: String,
    pub setting_value: Value,
    pub is_public: bool,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Admin > Role::Editor);
        assert!(Role::Editor > Role::Viewer);
        assert!(Role::Admin.can_edit());
        assert!(!Role::Viewer.can_edit());
    }

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn test_consultation_status_aliases() {
        assert_eq!(
            "replied".parse::<ConsultationStatus>().unwrap(),
            ConsultationStatus::InProgress
        );
        assert_eq!(
            "closed".parse::<ConsultationStatus>().unwrap(),
            ConsultationStatus::Completed
        );
        let parsed: ConsultationStatus = serde_json::from_str("\"replied\"").unwrap();
        assert_eq!(parsed, ConsultationStatus::InProgress);
        assert_eq!(
            serde_json::to_string(&ConsultationStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
    }

    #[test]
    fn test_section_serializes_flat_with_wire_names() {
        let section = Section {
            section: SectionRow {
                section_id: 7,
                page_version_id: 3,
                section_type: "hero".into(),
                name: Some("Top".into()),
                content: serde_json::json!({ "heading": "Study in Canada" }),
                display_order: 0,
                is_published: true,
            },
            media: vec![],
        };
        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(json["type"], "hero");
        assert_eq!(json["order"], 0);
        assert_eq!(json["section_id"], 7);
        assert!(json["media"].as_array().unwrap().is_empty());
    }
}
