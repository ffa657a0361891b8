use async_trait::async_trait;

use super::PgStore;
use crate::db::models::{Consultation, ConsultationStatus};
use crate::query::{fetch_paginated, Filter, Paginated};
use crate::store::{ConsultationQuery, ConsultationStore, NewConsultation, StoreError};

const CONSULTATION_COLUMNS: &str = r#"
    SELECT consultation_id, name, email, phone, country, service, message, status,
           reply, replied_at, created_at, updated_at
"#;

#[async_trait]
impl ConsultationStore for PgStore {
    async fn create(&self, new: &NewConsultation) -> Result<Consultation, StoreError> {
        let row: Consultation = sqlx::query_as(
            r#"
            INSERT INTO consultations (name, email, phone, country, service, message, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            RETURNING consultation_id, name, email, phone, country, service, message, status,
                      reply, replied_at, created_at, updated_at
            "#,
        )
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(&new.country)
        .bind(&new.service)
        .bind(&new.message)
        .fetch_one(self.pool())
        .await?;
        Ok(row)
    }

    async fn list(
        &self,
        query: &ConsultationQuery,
    ) -> Result<Paginated<Consultation>, StoreError> {
        let filter = Filter::new()
            .eq_opt("status", query.status.map(|s| s.as_str()))
            .search(&["name", "email", "phone"], query.search.as_deref());

        Ok(fetch_paginated(
            self.pool(),
            CONSULTATION_COLUMNS,
            "FROM consultations",
            &filter,
            "created_at DESC, consultation_id DESC",
            query.pagination,
        )
        .await?)
    }

    async fn get(&self, id: i32) -> Result<Option<Consultation>, StoreError> {
        let sql = format!("{} FROM consultations WHERE consultation_id = $1", CONSULTATION_COLUMNS);
        Ok(sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?)
    }

    async fn set_status(
        &self,
        id: i32,
        status: ConsultationStatus,
        reply: Option<String>,
    ) -> Result<Option<Consultation>, StoreError> {
        Ok(sqlx::query_as(
            r#"
            UPDATE consultations
            SET status = $2,
                reply = COALESCE($3, reply),
                replied_at = CASE WHEN $3::text IS NULL THEN replied_at ELSE now() END,
                updated_at = now()
            WHERE consultation_id = $1
            RETURNING consultation_id, name, email, phone, country, service, message, status,
                      reply, replied_at, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(reply)
        .fetch_optional(self.pool())
        .await?)
    }

    async fn delete(&self, id: i32) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM consultations WHERE consultation_id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn counts(&self) -> Result<Vec<(ConsultationStatus, i64)>, StoreError> {
        let rows: Vec<(ConsultationStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM consultations GROUP BY status")
                .fetch_all(self.pool())
                .await?;

        Ok(ConsultationStatus::ALL
            .iter()
            .map(|status| {
                let n = rows
                    .iter()
                    .find(|(s, _)| s == status)
                    .map(|(_, n)| *n)
                    .unwrap_or(0);
                (*status, n)
            })
            .collect())
    }
}
