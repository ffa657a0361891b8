use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

use super::{
    ensure_media_exist, insert_page_version, lock_claim, next_family_id, PgStore, VersionKind,
};
use crate::db::models::{BlogPost, BlogVersionInfo};
use crate::query::{fetch_paginated, Filter, Paginated};
use crate::store::{
    resolve_publish_date, BlogDocument, BlogQuery, BlogStore, SavedVersion, StoreError,
};

const POST_COLUMNS: &str = r#"
    SELECT b.id, b.post_id, b.version, b.page_version_id, b.title, b.url_slug,
           b.summary, b.content, b.category, b.tags, b.author, b.featured_image_id,
           m.file_path AS featured_image_path, b.is_published, b.publish_date,
           b.created_by, b.created_at
"#;

const POST_FROM: &str =
    "FROM blog_posts b LEFT JOIN media_files m ON m.file_version_id = b.featured_image_id";

const CURRENT_POST: &str =
    "b.version = (SELECT MAX(b2.version) FROM blog_posts b2 WHERE b2.post_id = b.post_id)";

const POST_ORDER: &str = "b.publish_date DESC NULLS LAST, b.created_at DESC, b.post_id DESC";

async fn append_post(
    tx: &mut Transaction<'_, Postgres>,
    post_id: i32,
    version: i32,
    doc: &BlogDocument,
    previous_publish_date: Option<DateTime<Utc>>,
    author: Option<i32>,
) -> Result<SavedVersion, StoreError> {
    lock_claim(tx, VersionKind::Post, &doc.url_slug).await?;
    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM blog_posts WHERE url_slug = $1 AND post_id <> $2)",
    )
    .bind(&doc.url_slug)
    .bind(post_id)
    .fetch_one(&mut **tx)
    .await?;
    if taken {
        return Err(StoreError::Conflict(format!(
            "Slug '{}' is already used by another post",
            doc.url_slug
        )));
    }

    if let Some(image) = doc.featured_image_id {
        ensure_media_exist(tx, &[image]).await?;
    }

    let page_version_id =
        insert_page_version(tx, VersionKind::Post, post_id, version, author).await?;

    sqlx::query(
        r#"
        INSERT INTO blog_posts (post_id, version, page_version_id, title, url_slug, summary,
                                content, category, tags, author, featured_image_id,
                                is_published, publish_date, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(post_id)
    .bind(version)
    .bind(page_version_id)
    .bind(&doc.title)
    .bind(&doc.url_slug)
    .bind(&doc.summary)
    .bind(&doc.content)
    .bind(&doc.category)
    .bind(&doc.tags)
    .bind(&doc.author)
    .bind(doc.featured_image_id)
    .bind(doc.is_published)
    .bind(resolve_publish_date(doc, previous_publish_date, Utc::now()))
    .bind(author)
    .execute(&mut **tx)
    .await?;

    Ok(SavedVersion {
        id: post_id,
        version,
        page_version_id,
    })
}

#[async_trait]
impl BlogStore for PgStore {
    async fn list(&self, query: &BlogQuery) -> Result<Paginated<BlogPost>, StoreError> {
        let filter = Filter::new()
            .raw(CURRENT_POST)
            .visibility("b.is_published", query.visibility)
            .eq_opt("b.category", query.category.clone())
            .contains_opt("b.tags", query.tag.clone())
            .search(&["b.title", "b.summary"], query.search.as_deref());

        Ok(fetch_paginated(
            self.pool(),
            POST_COLUMNS,
            POST_FROM,
            &filter,
            POST_ORDER,
            query.pagination,
        )
        .await?)
    }

    async fn get(&self, post_id: i32, version: Option<i32>) -> Result<Option<BlogPost>, StoreError> {
        let sql = format!(
            "{} {} WHERE b.post_id = $1 AND ($2::int IS NULL OR b.version = $2) \
             ORDER BY b.version DESC LIMIT 1",
            POST_COLUMNS, POST_FROM
        );
        Ok(sqlx::query_as(&sql)
            .bind(post_id)
            .bind(version)
            .fetch_optional(self.pool())
            .await?)
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<BlogPost>, StoreError> {
        let sql = format!(
            "{} {} WHERE b.url_slug = $1 AND {} ORDER BY b.post_id LIMIT 1",
            POST_COLUMNS, POST_FROM, CURRENT_POST
        );
        Ok(sqlx::query_as(&sql)
            .bind(slug)
            .fetch_optional(self.pool())
            .await?)
    }

    async fn versions(&self, post_id: i32) -> Result<Vec<BlogVersionInfo>, StoreError> {
        Ok(sqlx::query_as(
            r#"
            SELECT version, page_version_id, title, url_slug, is_published, created_by, created_at
            FROM blog_posts
            WHERE post_id = $1
            ORDER BY version DESC
            "#,
        )
        .bind(post_id)
        .fetch_all(self.pool())
        .await?)
    }

    async fn create(
        &self,
        doc: &BlogDocument,
        author: Option<i32>,
    ) -> Result<SavedVersion, StoreError> {
        let mut tx = self.pool().begin().await?;
        let post_id = next_family_id(&mut tx, VersionKind::Post).await?;
        let saved = append_post(&mut tx, post_id, 1, doc, None, author).await?;
        tx.commit().await?;

        tracing::info!(post_id, slug = %doc.url_slug, "Blog post created");
        Ok(saved)
    }

    async fn update(
        &self,
        post_id: i32,
        doc: &BlogDocument,
        author: Option<i32>,
    ) -> Result<SavedVersion, StoreError> {
        let mut tx = self.pool().begin().await?;
        let current: Option<(i32, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"
            SELECT version, publish_date FROM blog_posts
            WHERE post_id = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(post_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (version, previous_date) = current.ok_or(StoreError::NotFound("Blog post"))?;

        let saved = append_post(&mut tx, post_id, version + 1, doc, previous_date, author).await?;
        tx.commit().await?;

        tracing::info!(post_id, version = saved.version, "Blog post updated");
        Ok(saved)
    }

    async fn delete(&self, post_id: i32) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM page_versions WHERE kind = 'post' AND family_id = $1")
            .bind(post_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
