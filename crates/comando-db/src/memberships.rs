//! Tenant membership repository.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use comando_core::{Error, MemberRole, MembershipRepository, Result};

/// PostgreSQL implementation of MembershipRepository.
#[derive(Clone)]
pub struct PgMembershipRepository {
    pool: Pool<Postgres>,
}

impl PgMembershipRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipRepository for PgMembershipRepository {
    async fn role_for(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<MemberRole>> {
        let row = sqlx::query(
            "SELECT role FROM tenant_membership WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.and_then(|r| MemberRole::from_db(r.get::<String, _>("role").as_str())))
    }

    async fn upsert(&self, tenant_id: Uuid, user_id: Uuid, role: MemberRole) -> Result<()> {
        sqlx::query(
            "INSERT INTO tenant_membership (tenant_id, user_id, role)
             VALUES ($1, $2, $3)
             ON CONFLICT (tenant_id, user_id) DO UPDATE SET role = EXCLUDED.role",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::test_pool;

    #[tokio::test]
    #[ignore = "requires a postgres instance (DATABASE_URL)"]
    async fn role_lookup_and_upsert() {
        let repo = PgMembershipRepository::new(test_pool().await);
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();

        assert!(repo.role_for(tenant, user).await.unwrap().is_none());

        repo.upsert(tenant, user, MemberRole::Member).await.unwrap();
        assert_eq!(
            repo.role_for(tenant, user).await.unwrap(),
            Some(MemberRole::Member)
        );

        // Promotion overwrites the previous role.
        repo.upsert(tenant, user, MemberRole::Admin).await.unwrap();
        assert_eq!(
            repo.role_for(tenant, user).await.unwrap(),
            Some(MemberRole::Admin)
        );
    }
}
