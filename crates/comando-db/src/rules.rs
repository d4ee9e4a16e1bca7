//! Notification rule repository for per-tenant delivery endpoints.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use comando_core::{
    new_v7, CreateRuleRequest, Error, NotificationRule, Result, RuleRepository,
};

/// PostgreSQL implementation of RuleRepository.
#[derive(Clone)]
pub struct PgRuleRepository {
    pool: Pool<Postgres>,
}

impl PgRuleRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(r: &sqlx::postgres::PgRow) -> NotificationRule {
        NotificationRule {
            id: r.get("id"),
            tenant_id: r.get("tenant_id"),
            url: r.get("url"),
            secret: r.get("secret"),
            event_types: r.get("event_types"),
            is_active: r.get("is_active"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }
    }
}

#[async_trait]
impl RuleRepository for PgRuleRepository {
    async fn create(&self, req: CreateRuleRequest) -> Result<Uuid> {
        let id = new_v7();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO notification_rule
                 (id, tenant_id, url, secret, event_types, is_active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, true, $6, $6)",
        )
        .bind(id)
        .bind(req.tenant_id)
        .bind(&req.url)
        .bind(&req.secret)
        .bind(&req.event_types)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRule>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, url, secret, event_types, is_active, created_at, updated_at
             FROM notification_rule WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn list_active_for_event(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<NotificationRule>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, url, secret, event_types, is_active, created_at, updated_at
             FROM notification_rule
             WHERE tenant_id = $1
               AND is_active = true
               AND ($2 = ANY(event_types) OR event_types = '{}')",
        )
        .bind(tenant_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        sqlx::query(
            "UPDATE notification_rule SET is_active = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM notification_rule WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
