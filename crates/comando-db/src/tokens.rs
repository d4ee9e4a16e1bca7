//! API token repository. Tokens are stored as SHA-256 digests; the raw
//! token never touches the database.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use comando_core::{new_v7, AuthPrincipal, Error, Result, TokenRepository};

/// PostgreSQL implementation of TokenRepository.
#[derive(Clone)]
pub struct PgTokenRepository {
    pool: Pool<Postgres>,
}

impl PgTokenRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Hex SHA-256 digest of a raw bearer token.
    pub fn digest(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn principal_for_token(&self, token: &str) -> Result<Option<AuthPrincipal>> {
        let digest = Self::digest(token);
        let row = sqlx::query(
            "UPDATE api_token SET last_used_at = now()
             WHERE token_digest = $1
             RETURNING user_id",
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| AuthPrincipal {
            user_id: r.get("user_id"),
        }))
    }

    async fn issue(&self, user_id: Uuid, token: &str) -> Result<Uuid> {
        let id = new_v7();
        sqlx::query(
            "INSERT INTO api_token (id, user_id, token_digest, created_at)
             VALUES ($1, $2, $3, now())",
        )
        .bind(id)
        .bind(user_id)
        .bind(Self::digest(token))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }
}
