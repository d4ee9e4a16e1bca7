//! Inbox event repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use comando_core::{
    new_v7, CreateEventRequest, Error, EventRepository, EventStatus, InboxEvent, Result,
};

/// PostgreSQL implementation of EventRepository.
#[derive(Clone)]
pub struct PgEventRepository {
    pool: Pool<Postgres>,
}

impl PgEventRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> InboxEvent {
        let status: String = row.get("status");
        InboxEvent {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            event_type: row.get("event_type"),
            payload: row.get("payload"),
            occurred_at: row.get("occurred_at"),
            status: EventStatus::from_db(&status),
            processing_error: row.get("processing_error"),
            processed_at: row.get("processed_at"),
        }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn insert(&self, req: CreateEventRequest) -> Result<Uuid> {
        let id = new_v7();
        let occurred_at = req.occurred_at.unwrap_or_else(Utc::now);

        sqlx::query(
            "INSERT INTO inbox_event (id, tenant_id, event_type, payload, occurred_at, status)
             VALUES ($1, $2, $3, $4, $5, 'pending')",
        )
        .bind(id)
        .bind(req.tenant_id)
        .bind(&req.event_type)
        .bind(&req.payload)
        .bind(occurred_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<InboxEvent>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, event_type, payload, occurred_at, status,
                    processing_error, processed_at
             FROM inbox_event WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<InboxEvent>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, event_type, payload, occurred_at, status,
                    processing_error, processed_at
             FROM inbox_event
             WHERE status = 'pending'
             ORDER BY occurred_at
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn try_settle(&self, id: Uuid, to: EventStatus, error: Option<&str>) -> Result<bool> {
        // Conditional update is the claim: whichever worker flips the row
        // off 'pending' first wins, the loser sees zero rows affected.
        let result = sqlx::query(
            "UPDATE inbox_event
             SET status = $2, processing_error = $3, processed_at = now()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(to.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_error(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query("UPDATE inbox_event SET processing_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn reset_to_pending(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE inbox_event
             SET status = 'pending', processing_error = NULL, processed_at = NULL
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn list_settled_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<InboxEvent>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, event_type, payload, occurred_at, status,
                    processing_error, processed_at
             FROM inbox_event
             WHERE tenant_id = $1
               AND status IN ('processed', 'ignored')
               AND occurred_at >= $2
             ORDER BY occurred_at",
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }
}
