//! Immutable audit log of tick summaries.
//!
//! Each completed tick is persisted keyed by its start timestamp so
//! operators can inspect dispatch behavior after the fact; the loop itself
//! only ever returns the summary in the HTTP response.

use sqlx::{Pool, Postgres};
use uuid::Uuid;

use comando_core::{new_v7, Error, Result, TickSummary};

/// PostgreSQL tick log writer.
#[derive(Clone)]
pub struct PgTickLogRepository {
    pool: Pool<Postgres>,
}

impl PgTickLogRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Persist one tick summary. Callers treat failures as non-fatal.
    pub async fn record(&self, summary: &TickSummary) -> Result<Uuid> {
        let id = new_v7();
        let body = serde_json::to_value(summary)?;

        sqlx::query(
            "INSERT INTO tick_log (id, started_at, finished_at, passes, summary)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(summary.started_at)
        .bind(summary.finished_at)
        .bind(summary.passes_executed as i32)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(id)
    }
}
