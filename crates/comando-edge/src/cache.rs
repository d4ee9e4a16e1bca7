//! Redis-backed tenant resolution cache.
//!
//! Only affirmative lookups are ever written, with a fixed TTL; negative
//! results always fall through to the resolver. A broken or absent Redis
//! degrades to cache-miss behavior and never breaks request handling.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use comando_core::defaults::TENANT_CACHE_PREFIX;
use comando_core::{ResolutionCache, TenantLookup};

/// Tenant cache backed by Redis.
pub struct RedisResolutionCache {
    /// Redis connection manager (None if disabled or unreachable).
    connection: RwLock<Option<ConnectionManager>>,
    /// TTL applied to positive entries, in seconds.
    ttl_seconds: u64,
}

impl RedisResolutionCache {
    /// Connect to Redis, degrading to a disabled cache on any failure.
    pub async fn connect(redis_url: Option<&str>, ttl_seconds: u64) -> Self {
        let connection = match redis_url {
            Some(url) => match redis::Client::open(url) {
                Ok(client) => match ConnectionManager::new(client).await {
                    Ok(conn) => {
                        info!(ttl_seconds, "Tenant cache enabled");
                        Some(conn)
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to connect to Redis, tenant cache disabled");
                        None
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Invalid Redis URL, tenant cache disabled");
                    None
                }
            },
            None => {
                info!("Tenant cache disabled (no cache URL configured)");
                None
            }
        };

        Self {
            connection: RwLock::new(connection),
            ttl_seconds,
        }
    }

    /// A cache that never hits (for tests and cacheless deployments).
    pub fn disabled() -> Self {
        Self {
            connection: RwLock::new(None),
            ttl_seconds: 0,
        }
    }

    /// Cache key for a normalized hostname.
    pub fn cache_key(hostname: &str) -> String {
        format!("{}{}", TENANT_CACHE_PREFIX, hostname)
    }
}

#[async_trait]
impl ResolutionCache for RedisResolutionCache {
    async fn get(&self, hostname: &str) -> Option<TenantLookup> {
        let mut guard = self.connection.write().await;
        let conn = guard.as_mut()?;
        let key = Self::cache_key(hostname);

        match conn.get::<_, Option<String>>(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(lookup) => {
                    debug!(hostname, "Tenant cache HIT");
                    Some(lookup)
                }
                Err(e) => {
                    warn!(hostname, error = %e, "Tenant cache entry unreadable");
                    None
                }
            },
            Ok(None) => {
                debug!(hostname, "Tenant cache MISS");
                None
            }
            Err(e) => {
                error!(hostname, error = %e, "Tenant cache GET failed");
                None
            }
        }
    }

    async fn put(&self, hostname: &str, lookup: &TenantLookup) -> bool {
        if !lookup.cacheable() {
            return false;
        }

        let mut guard = self.connection.write().await;
        let conn = match guard.as_mut() {
            Some(c) => c,
            None => return false,
        };

        let raw = match serde_json::to_string(lookup) {
            Ok(s) => s,
            Err(e) => {
                error!(hostname, error = %e, "Tenant cache serialization failed");
                return false;
            }
        };

        match conn
            .set_ex::<_, _, ()>(Self::cache_key(hostname), raw, self.ttl_seconds)
            .await
        {
            Ok(_) => {
                debug!(hostname, ttl = self.ttl_seconds, "Tenant cache SET");
                true
            }
            Err(e) => {
                error!(hostname, error = %e, "Tenant cache SET failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_uses_the_tenant_prefix() {
        assert_eq!(
            RedisResolutionCache::cache_key("loja.example.com"),
            "tenant:loja.example.com"
        );
    }

    #[tokio::test]
    async fn disabled_cache_never_hits_and_never_stores() {
        let cache = RedisResolutionCache::disabled();
        assert!(cache.get("loja.example.com").await.is_none());
        assert!(!cache.put("loja.example.com", &TenantLookup::found("acme")).await);
    }

    #[tokio::test]
    async fn negative_lookups_are_refused_before_touching_the_backend() {
        let cache = RedisResolutionCache::disabled();
        assert!(!cache.put("unknown.example.com", &TenantLookup::not_found()).await);
    }
}
