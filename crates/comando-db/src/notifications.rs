//! Notification repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use comando_core::{
    new_v7, Error, InboxEvent, Notification, NotificationRepository, NotificationRule,
    NotificationStatus, Result,
};

/// PostgreSQL implementation of NotificationRepository.
#[derive(Clone)]
pub struct PgNotificationRepository {
    pool: Pool<Postgres>,
}

impl PgNotificationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Notification {
        let status: String = row.get("status");
        Notification {
            id: row.get("id"),
            event_id: row.get("event_id"),
            rule_id: row.get("rule_id"),
            tenant_id: row.get("tenant_id"),
            status: NotificationStatus::from_db(&status),
            next_attempt_at: row.get("next_attempt_at"),
            attempt_count: row.get("attempt_count"),
            last_error: row.get("last_error"),
            sent_at: row.get("sent_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    const SELECT_COLUMNS: &'static str =
        "id, event_id, rule_id, tenant_id, status, next_attempt_at, attempt_count,
         last_error, sent_at, created_at, updated_at";
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn create(&self, event: &InboxEvent, rule: &NotificationRule) -> Result<Uuid> {
        let id = new_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO notification
                 (id, event_id, rule_id, tenant_id, status, next_attempt_at,
                  attempt_count, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 'scheduled', $5, 0, $5, $5)",
        )
        .bind(id)
        .bind(event.id)
        .bind(rule.id)
        .bind(event.tenant_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(id)
    }

    async fn claim_due(&self, limit: i64) -> Result<Vec<Notification>> {
        // SKIP LOCKED keeps concurrent claimers from receiving the same
        // rows; the surrounding UPDATE flips them to 'sending' atomically.
        let rows = sqlx::query(&format!(
            "UPDATE notification
             SET status = 'sending', updated_at = now()
             WHERE id IN (
                 SELECT id FROM notification
                 WHERE status IN ('scheduled', 'retrying')
                   AND next_attempt_at <= now()
                 ORDER BY next_attempt_at
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {}",
            Self::SELECT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn mark_sent(&self, id: Uuid) -> Result<()> {
        // The status guard keeps 'sent' a one-way, at-most-once transition.
        sqlx::query(
            "UPDATE notification
             SET status = 'sent', sent_at = now(), last_error = NULL, updated_at = now()
             WHERE id = $1 AND status <> 'sent'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        attempt_count: i32,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE notification
             SET status = 'retrying', next_attempt_at = $2, attempt_count = $3,
                 last_error = $4, updated_at = now()
             WHERE id = $1 AND status <> 'sent'",
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(attempt_count)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempt_count: i32, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE notification
             SET status = 'failed', attempt_count = $2, last_error = $3, updated_at = now()
             WHERE id = $1 AND status <> 'sent'",
        )
        .bind(id)
        .bind(attempt_count)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn list_for_event(&self, event_id: Uuid) -> Result<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM notification WHERE event_id = $1 ORDER BY created_at",
            Self::SELECT_COLUMNS
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn reset_for_replay(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE notification
             SET status = 'scheduled', next_attempt_at = now(), attempt_count = 0,
                 last_error = NULL, updated_at = now()
             WHERE id = ANY($1) AND status <> 'sent'",
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn accelerate(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE notification
             SET next_attempt_at = now(), updated_at = now()
             WHERE id = ANY($1) AND status = 'scheduled'",
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}
