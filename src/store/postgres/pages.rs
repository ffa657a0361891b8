use async_trait::async_trait;
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::HashMap;

use super::{
    ensure_media_exist, insert_page_version, lock_claim, next_family_id, PgStore, VersionKind,
};
use crate::db::models::{MediaFile, Page, PageDetail, PageVersionInfo, Section, SectionRow};
use crate::query::{fetch_paginated, Filter, Paginated};
use crate::store::{PageDocument, PageQuery, PageStore, SavedVersion, StoreError};

const PAGE_COLUMNS: &str = r#"
    SELECT p.id, p.page_id, p.version, p.page_version_id, p.url, p.title,
           p.meta_title, p.meta_description, p.meta_keywords, p.parent_id,
           p.display_order, p.is_published, p.created_by, p.created_at
"#;

const CURRENT_PAGE: &str =
    "p.version = (SELECT MAX(p2.version) FROM pages p2 WHERE p2.page_id = p.page_id)";

#[derive(FromRow)]
struct SectionMediaRow {
    section_id: i64,
    #[sqlx(flatten)]
    file: MediaFile,
}

impl PgStore {
    async fn load_detail(&self, page: Page) -> Result<PageDetail, sqlx::Error> {
        let rows: Vec<SectionRow> = sqlx::query_as(
            r#"
            SELECT section_id, page_version_id, section_type, name, content,
                   display_order, is_published
            FROM sections
            WHERE page_version_id = $1
            ORDER BY display_order
            "#,
        )
        .bind(page.page_version_id)
        .fetch_all(self.pool())
        .await?;

        let section_ids: Vec<i64> = rows.iter().map(|s| s.section_id).collect();
        let mut media: HashMap<i64, Vec<MediaFile>> = HashMap::new();
        if !section_ids.is_empty() {
            let links: Vec<SectionMediaRow> = sqlx::query_as(
                r#"
                SELECT sm.section_id, m.file_version_id, m.file_name, m.original_name,
                       m.file_path, m.file_type, m.mime_type, m.file_size, m.alt_text,
                       m.uploaded_by, m.created_at
                FROM section_media sm
                JOIN media_files m ON m.file_version_id = sm.file_version_id
                WHERE sm.section_id = ANY($1)
                ORDER BY sm.section_id, sm.display_order
                "#,
            )
            .bind(&section_ids)
            .fetch_all(self.pool())
            .await?;
            for link in links {
                media.entry(link.section_id).or_default().push(link.file);
            }
        }

        let sections = rows
            .into_iter()
            .map(|section| Section {
                media: media.remove(&section.section_id).unwrap_or_default(),
                section,
            })
            .collect();

        Ok(PageDetail { page, sections })
    }
}

/// Append one full page version (PageVersion, Page row, sections, links).
async fn append_page(
    tx: &mut Transaction<'_, Postgres>,
    page_id: i32,
    version: i32,
    doc: &PageDocument,
    author: Option<i32>,
) -> Result<SavedVersion, StoreError> {
    lock_claim(tx, VersionKind::Page, &doc.url).await?;
    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM pages WHERE url = $1 AND page_id <> $2)",
    )
    .bind(&doc.url)
    .bind(page_id)
    .fetch_one(&mut **tx)
    .await?;
    if taken {
        return Err(StoreError::Conflict(format!(
            "URL '{}' is already used by another page",
            doc.url
        )));
    }

    let media_ids: Vec<i32> = doc
        .sections
        .iter()
        .flat_map(|s| s.media.iter().copied())
        .collect();
    ensure_media_exist(tx, &media_ids).await?;

    let page_version_id =
        insert_page_version(tx, VersionKind::Page, page_id, version, author).await?;

    sqlx::query(
        r#"
        INSERT INTO pages (page_id, version, page_version_id, url, title, meta_title,
                           meta_description, meta_keywords, parent_id, display_order,
                           is_published, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(page_id)
    .bind(version)
    .bind(page_version_id)
    .bind(&doc.url)
    .bind(&doc.title)
    .bind(&doc.meta_title)
    .bind(&doc.meta_description)
    .bind(&doc.meta_keywords)
    .bind(doc.parent_id)
    .bind(doc.display_order)
    .bind(doc.is_published)
    .bind(author)
    .execute(&mut **tx)
    .await?;

    for (index, section) in doc.sections.iter().enumerate() {
        let section_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sections (page_version_id, section_type, name, content,
                                  display_order, is_published)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING section_id
            "#,
        )
        .bind(page_version_id)
        .bind(&section.section_type)
        .bind(&section.name)
        .bind(&section.content)
        .bind(index as i32)
        .bind(section.is_published)
        .fetch_one(&mut **tx)
        .await?;

        for (position, file_version_id) in section.media.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO section_media (section_id, file_version_id, display_order)
                VALUES ($1, $2, $3)
                ON CONFLICT (section_id, file_version_id) DO NOTHING
                "#,
            )
            .bind(section_id)
            .bind(file_version_id)
            .bind(position as i32)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(SavedVersion {
        id: page_id,
        version,
        page_version_id,
    })
}

#[async_trait]
impl PageStore for PgStore {
    async fn list(&self, query: &PageQuery) -> Result<Paginated<Page>, StoreError> {
        let filter = Filter::new()
            .raw(CURRENT_PAGE)
            .visibility("p.is_published", query.visibility)
            .eq_opt("p.parent_id", query.parent_id)
            .search(&["p.title", "p.url"], query.search.as_deref());

        Ok(fetch_paginated(
            self.pool(),
            PAGE_COLUMNS,
            "FROM pages p",
            &filter,
            "p.display_order, p.page_id",
            query.pagination,
        )
        .await?)
    }

    async fn get(
        &self,
        page_id: i32,
        version: Option<i32>,
    ) -> Result<Option<PageDetail>, StoreError> {
        let sql = format!(
            "{} FROM pages p WHERE p.page_id = $1 AND ($2::int IS NULL OR p.version = $2) \
             ORDER BY p.version DESC LIMIT 1",
            PAGE_COLUMNS
        );
        let page: Option<Page> = sqlx::query_as(&sql)
            .bind(page_id)
            .bind(version)
            .fetch_optional(self.pool())
            .await?;

        match page {
            Some(page) => Ok(Some(self.load_detail(page).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<PageDetail>, StoreError> {
        let sql = format!(
            "{} FROM pages p WHERE p.url = $1 AND {} ORDER BY p.page_id LIMIT 1",
            PAGE_COLUMNS, CURRENT_PAGE
        );
        let page: Option<Page> = sqlx::query_as(&sql)
            .bind(url)
            .fetch_optional(self.pool())
            .await?;

        match page {
            Some(page) => Ok(Some(self.load_detail(page).await?)),
            None => Ok(None),
        }
    }

    async fn versions(&self, page_id: i32) -> Result<Vec<PageVersionInfo>, StoreError> {
        Ok(sqlx::query_as(
            r#"
            SELECT version, page_version_id, url, title, is_published, created_by, created_at
            FROM pages
            WHERE page_id = $1
            ORDER BY version DESC
            "#,
        )
        .bind(page_id)
        .fetch_all(self.pool())
        .await?)
    }

    async fn create(
        &self,
        doc: &PageDocument,
        author: Option<i32>,
    ) -> Result<SavedVersion, StoreError> {
        let mut tx = self.pool().begin().await?;
        let page_id = next_family_id(&mut tx, VersionKind::Page).await?;
        let saved = append_page(&mut tx, page_id, 1, doc, author).await?;
        tx.commit().await?;

        tracing::info!(page_id, version = saved.version, "Page created");
        Ok(saved)
    }

    async fn update(
        &self,
        page_id: i32,
        doc: &PageDocument,
        author: Option<i32>,
    ) -> Result<SavedVersion, StoreError> {
        let mut tx = self.pool().begin().await?;
        let current: Option<i32> =
            sqlx::query_scalar("SELECT MAX(version) FROM pages WHERE page_id = $1")
                .bind(page_id)
                .fetch_one(&mut *tx)
                .await?;
        let current = current.ok_or(StoreError::NotFound("Page"))?;

        let saved = append_page(&mut tx, page_id, current + 1, doc, author).await?;
        tx.commit().await?;

        tracing::info!(page_id, version = saved.version, "Page updated");
        Ok(saved)
    }

    async fn delete(&self, page_id: i32) -> Result<bool, StoreError> {
        // Pages, sections and section media cascade from their PageVersion.
        let result = sqlx::query("DELETE FROM page_versions WHERE kind = 'page' AND family_id = $1")
            .bind(page_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
