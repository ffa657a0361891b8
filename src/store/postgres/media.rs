use async_trait::async_trait;

use super::PgStore;
use crate::db::models::MediaFile;
use crate::query::{fetch_paginated, Filter, Paginated};
use crate::store::{MediaQuery, MediaStore, NewMedia, StoreError};

const MEDIA_COLUMNS: &str = r#"
    SELECT file_version_id, file_name, original_name, file_path, file_type, mime_type,
           file_size, alt_text, uploaded_by, created_at
"#;

#[async_trait]
impl MediaStore for PgStore {
    async fn insert(&self, new: &NewMedia) -> Result<MediaFile, StoreError> {
        Ok(sqlx::query_as(
            r#"
            INSERT INTO media_files (file_name, original_name, file_path, file_type, mime_type,
                                     file_size, alt_text, uploaded_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING file_version_id, file_name, original_name, file_path, file_type,
                      mime_type, file_size, alt_text, uploaded_by, created_at
            "#,
        )
        .bind(&new.file_name)
        .bind(&new.original_name)
        .bind(&new.file_path)
        .bind(&new.file_type)
        .bind(&new.mime_type)
        .bind(new.file_size)
        .bind(&new.alt_text)
        .bind(new.uploaded_by)
        .fetch_one(self.pool())
        .await?)
    }

    async fn list(&self, query: &MediaQuery) -> Result<Paginated<MediaFile>, StoreError> {
        let filter = Filter::new()
            .eq_opt("file_type", query.file_type.clone())
            .search(&["original_name", "alt_text"], query.search.as_deref());

        Ok(fetch_paginated(
            self.pool(),
            MEDIA_COLUMNS,
            "FROM media_files",
            &filter,
            "file_version_id DESC",
            query.pagination,
        )
        .await?)
    }

    async fn get(&self, id: i32) -> Result<Option<MediaFile>, StoreError> {
        let sql = format!("{} FROM media_files WHERE file_version_id = $1", MEDIA_COLUMNS);
        Ok(sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?)
    }

    async fn update(
        &self,
        id: i32,
        original_name: Option<String>,
        alt_text: Option<String>,
    ) -> Result<Option<MediaFile>, StoreError> {
        Ok(sqlx::query_as(
            r#"
            UPDATE media_files
            SET original_name = COALESCE($2, original_name),
                alt_text = COALESCE($3, alt_text)
            WHERE file_version_id = $1
            RETURNING file_version_id, file_name, original_name, file_path, file_type,
                      mime_type, file_size, alt_text, uploaded_by, created_at
            "#,
        )
        .bind(id)
        .bind(original_name)
        .bind(alt_text)
        .fetch_optional(self.pool())
        .await?)
    }

    async fn delete(&self, id: i32) -> Result<Option<MediaFile>, StoreError> {
        Ok(sqlx::query_as(
            r#"
            DELETE FROM media_files
            WHERE file_version_id = $1
            RETURNING file_version_id, file_name, original_name, file_path, file_type,
                      mime_type, file_size, alt_text, uploaded_by, created_at
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?)
    }
}
