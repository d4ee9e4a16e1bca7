//! # comando-db
//!
//! PostgreSQL storage layer for the Comando Central dispatch services.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for inbox events, notifications,
//!   notification rules, tenant memberships, and API tokens
//! - The tick audit log
//!
//! ## Example
//!
//! ```rust,ignore
//! use comando_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/comando").await?;
//!     let pending = db.events.list_pending(50).await?;
//!     println!("{} pending events", pending.len());
//!     Ok(())
//! }
//! ```

pub mod events;
pub mod memberships;
pub mod notifications;
pub mod pool;
pub mod rules;
pub mod tick_log;
pub mod tokens;

// Test fixtures for integration tests.
pub mod test_fixtures;

// Re-export core types
pub use comando_core::*;

// Re-export repository implementations
pub use events::PgEventRepository;
pub use memberships::PgMembershipRepository;
pub use notifications::PgNotificationRepository;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use rules::PgRuleRepository;
pub use tick_log::PgTickLogRepository;
pub use tokens::PgTokenRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Inbox event repository.
    pub events: PgEventRepository,
    /// Notification repository.
    pub notifications: PgNotificationRepository,
    /// Notification rule registry.
    pub rules: PgRuleRepository,
    /// Tenant membership repository.
    pub memberships: PgMembershipRepository,
    /// API token repository.
    pub tokens: PgTokenRepository,
    /// Tick summary audit log.
    pub tick_log: PgTickLogRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            events: PgEventRepository::new(pool.clone()),
            notifications: PgNotificationRepository::new(pool.clone()),
            rules: PgRuleRepository::new(pool.clone()),
            memberships: PgMembershipRepository::new(pool.clone()),
            tokens: PgTokenRepository::new(pool.clone()),
            tick_log: PgTickLogRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
