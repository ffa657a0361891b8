//! PostgreSQL implementations of the store traits.
//!
//! Every save runs inside one transaction. Returning early with `?` drops
//! the transaction, which rolls back everything written so far.

mod blog;
mod consultations;
mod media;
mod pages;

use sqlx::{PgPool, Postgres, Transaction};

use super::StoreError;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Which family a PageVersion belongs to.
#[derive(Debug, Clone, Copy)]
enum VersionKind {
    Page,
    Post,
}

impl VersionKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Post => "post",
        }
    }
}

async fn insert_page_version(
    tx: &mut Transaction<'_, Postgres>,
    kind: VersionKind,
    family_id: i32,
    version: i32,
    author: Option<i32>,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO page_versions (kind, family_id, version, created_by)
        VALUES ($1, $2, $3, $4)
        RETURNING page_version_id
        "#,
    )
    .bind(kind.as_str())
    .bind(family_id)
    .bind(version)
    .bind(author)
    .fetch_one(&mut **tx)
    .await
}

fn claim_key(kind: VersionKind, key: &str) -> String {
    format!("{}:{}", kind.as_str(), key)
}

/// Serialize writers claiming the same URL or slug until the transaction
/// ends, so the uniqueness check and the insert cannot interleave.
async fn lock_claim(
    tx: &mut Transaction<'_, Postgres>,
    kind: VersionKind,
    key: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(claim_key(kind, key))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn next_family_id(
    tx: &mut Transaction<'_, Postgres>,
    kind: VersionKind,
) -> Result<i32, sqlx::Error> {
    let sql = match kind {
        VersionKind::Page => "SELECT nextval('page_family_seq')::int",
        VersionKind::Post => "SELECT nextval('post_family_seq')::int",
    };
    sqlx::query_scalar(sql).fetch_one(&mut **tx).await
}

/// Reject references to media rows that do not exist.
async fn ensure_media_exist(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[i32],
) -> Result<(), StoreError> {
    let mut wanted: Vec<i32> = ids.to_vec();
    wanted.sort_unstable();
    wanted.dedup();
    if wanted.is_empty() {
        return Ok(());
    }

    let found: Vec<i32> = sqlx::query_scalar(
        "SELECT file_version_id FROM media_files WHERE file_version_id = ANY($1)",
    )
    .bind(&wanted)
    .fetch_all(&mut **tx)
    .await?;

    match wanted.iter().find(|id| !found.contains(id)) {
        Some(missing) => Err(StoreError::Invalid(format!(
            "Media file {} does not exist",
            missing
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_keys_are_namespaced_by_family() {
        assert_eq!(claim_key(VersionKind::Page, "/about"), "page:/about");
        assert_ne!(
            claim_key(VersionKind::Page, "about"),
            claim_key(VersionKind::Post, "about")
        );
    }
}
