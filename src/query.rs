//! Composable list queries.
//!
//! Filters are declared as data (`Filter`) and rendered into a
//! `sqlx::QueryBuilder`, so every optional filter combination produces a
//! fully parameterized statement and list endpoints share one pagination
//! and count path.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

use crate::db::models::Role;

// ============================================================================
// Pagination
// ============================================================================

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;
/// Deep enough for any real listing; keeps `offset` far from overflow.
pub const MAX_PAGE: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn meta(&self, total: i64) -> PaginationMeta {
        PaginationMeta {
            page: self.page,
            limit: self.limit,
            total,
            pages: (total + self.limit - 1) / self.limit,
        }
    }

    /// Apply the window to an already filtered and sorted list.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.limit as usize)
            .collect()
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

/// A page of results plus its pagination metadata.
#[derive(Debug, Clone)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: PaginationMeta,
}

// ============================================================================
// Publication visibility
// ============================================================================

/// Which rows a caller may see on public listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    PublishedOnly,
    UnpublishedOnly,
    All,
}

impl Visibility {
    /// Anonymous callers and viewers always get published rows. Editors and
    /// admins see everything unless they pass `published`.
    pub fn resolve(role: Option<Role>, published: Option<bool>) -> Self {
        match (role, published) {
            (Some(role), flag) if role.can_edit() => match flag {
                Some(true) => Self::PublishedOnly,
                Some(false) => Self::UnpublishedOnly,
                None => Self::All,
            },
            _ => Self::PublishedOnly,
        }
    }

    pub fn published_only(&self) -> bool {
        matches!(self, Self::PublishedOnly)
    }

    /// Whether a row with the given flag is visible.
    pub fn admits(&self, is_published: bool) -> bool {
        match self {
            Self::PublishedOnly => is_published,
            Self::UnpublishedOnly => !is_published,
            Self::All => true,
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Text(String),
    Int(i32),
    Bool(bool),
}

impl From<String> for Bind {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Bind {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<i32> for Bind {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Bind {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Eq { column: &'static str, value: Bind },
    /// Case-insensitive substring match on any of the columns.
    Search {
        columns: &'static [&'static str],
        term: String,
    },
    /// `value = ANY(column)` for array columns.
    Contains { column: &'static str, value: Bind },
    /// Fixed SQL with no parameters.
    Raw(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Bind>) -> Self {
        self.predicates.push(Predicate::Eq {
            column,
            value: value.into(),
        });
        self
    }

    pub fn eq_opt<V: Into<Bind>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.eq(column, v),
            None => self,
        }
    }

    pub fn contains_opt<V: Into<Bind>>(mut self, column: &'static str, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.predicates.push(Predicate::Contains {
                column,
                value: v.into(),
            });
        }
        self
    }

    pub fn search(mut self, columns: &'static [&'static str], term: Option<&str>) -> Self {
        if let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) {
            self.predicates.push(Predicate::Search {
                columns,
                term: term.to_string(),
            });
        }
        self
    }

    pub fn raw(mut self, sql: &'static str) -> Self {
        self.predicates.push(Predicate::Raw(sql));
        self
    }

    /// Add the publication predicate for `column`.
    pub fn visibility(self, column: &'static str, visibility: Visibility) -> Self {
        match visibility {
            Visibility::PublishedOnly => self.eq(column, true),
            Visibility::UnpublishedOnly => self.eq(column, false),
            Visibility::All => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Render ` WHERE ... AND ...` (nothing when empty).
    pub fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        for (i, predicate) in self.predicates.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            match predicate {
                Predicate::Eq { column, value } => {
                    qb.push(*column).push(" = ");
                    push_value(qb, value);
                }
                Predicate::Search { columns, term } => {
                    let pattern = format!("%{}%", escape_like(term));
                    qb.push("(");
                    for (j, column) in columns.iter().enumerate() {
                        if j > 0 {
                            qb.push(" OR ");
                        }
                        qb.push(*column).push(" ILIKE ").push_bind(pattern.clone());
                    }
                    qb.push(")");
                }
                Predicate::Contains { column, value } => {
                    push_value(qb, value);
                    qb.push(" = ANY(").push(*column).push(")");
                }
                Predicate::Raw(sql) => {
                    qb.push("(").push(*sql).push(")");
                }
            }
        }
    }
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &Bind) {
    match value {
        Bind::Text(v) => qb.push_bind(v.clone()),
        Bind::Int(v) => qb.push_bind(*v),
        Bind::Bool(v) => qb.push_bind(*v),
    };
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Run the count and the windowed select for a filtered listing.
///
/// `select` is the column list (`SELECT ...`), `from` the `FROM`/`JOIN`
/// clause without any `WHERE`.
pub async fn fetch_paginated<T>(
    pool: &PgPool,
    select: &str,
    from: &str,
    filter: &Filter,
    order_by: &str,
    pagination: Pagination,
) -> Result<Paginated<T>, sqlx::Error>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) ");
    count.push(from);
    filter.push_where(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut rows = QueryBuilder::<Postgres>::new(select);
    rows.push(" ").push(from);
    filter.push_where(&mut rows);
    rows.push(" ORDER BY ")
        .push(order_by)
        .push(" LIMIT ")
        .push_bind(pagination.limit)
        .push(" OFFSET ")
        .push_bind(pagination.offset());
    let items = rows.build_query_as::<T>().fetch_all(pool).await?;

    Ok(Paginated {
        items,
        pagination: pagination.meta(total),
    })
}
