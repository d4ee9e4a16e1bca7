//! Edge router configuration.
//!
//! Collected once at startup into an explicit struct and validated there;
//! a missing origin host or resolver URL is a fail-fast startup error, not
//! a per-request surprise.

use std::time::Duration;

use comando_core::defaults::{
    BASE_HOSTS, EDGE_PORT, PLATFORM_SUFFIXES, PROXY_TIMEOUT_SECS, RESOLVER_TIMEOUT_SECS,
    TENANT_CACHE_TTL_SECS,
};
use comando_core::{Error, Result};

/// Runtime configuration for the edge router.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Fixed origin host all non-root paths are proxied to.
    pub origin_host: String,
    /// Resolver endpoint queried as `GET {url}?hostname={h}`.
    pub resolver_url: reqwest::Url,
    /// Hosting-platform suffixes that always pass through untouched.
    pub platform_suffixes: Vec<String>,
    /// Base hostnames (matched exactly or as a parent domain) that bypass
    /// tenant resolution.
    pub base_hosts: Vec<String>,
    /// Redis URL for the tenant cache; None runs uncached.
    pub redis_url: Option<String>,
    /// TTL for positive tenant cache entries.
    pub cache_ttl_secs: u64,
    /// Timeout on upstream proxy fetches.
    pub proxy_timeout: Duration,
    /// Timeout on resolver lookups.
    pub resolver_timeout: Duration,
    /// Listen port.
    pub port: u16,
}

impl EdgeConfig {
    /// Build a validated config from an origin host and resolver URL.
    pub fn new(origin_host: impl Into<String>, resolver_url: &str) -> Result<Self> {
        let origin_host = origin_host.into().trim().to_string();
        if origin_host.is_empty() {
            return Err(Error::Config("origin host must not be empty".to_string()));
        }
        if origin_host.contains('/') {
            return Err(Error::Config(format!(
                "origin host must be a bare hostname, got '{}'",
                origin_host
            )));
        }

        let resolver_url = reqwest::Url::parse(resolver_url)
            .map_err(|e| Error::Config(format!("invalid resolver URL: {}", e)))?;
        if resolver_url.host_str().is_none() {
            return Err(Error::Config("resolver URL has no host".to_string()));
        }

        Ok(Self {
            origin_host,
            resolver_url,
            platform_suffixes: PLATFORM_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            base_hosts: BASE_HOSTS.iter().map(|s| s.to_string()).collect(),
            redis_url: None,
            cache_ttl_secs: TENANT_CACHE_TTL_SECS,
            proxy_timeout: Duration::from_secs(PROXY_TIMEOUT_SECS),
            resolver_timeout: Duration::from_secs(RESOLVER_TIMEOUT_SECS),
            port: EDGE_PORT,
        })
    }

    /// Load from environment variables, failing fast on missing required
    /// bindings.
    ///
    /// | Variable | Required | Description |
    /// |----------|----------|-------------|
    /// | `ORIGIN_HOST` | yes | Upstream host for proxied paths |
    /// | `RESOLVE_DOMAIN_URL` | yes | Tenant resolver endpoint |
    /// | `TENANT_CACHE_URL` | no | Redis URL for the tenant cache |
    /// | `BASE_HOSTS` | no | Comma-separated allow-list override |
    /// | `EDGE_PORT` | no | Listen port |
    pub fn from_env() -> Result<Self> {
        let origin_host = std::env::var("ORIGIN_HOST")
            .map_err(|_| Error::Config("ORIGIN_HOST is not set".to_string()))?;
        let resolver_url = std::env::var("RESOLVE_DOMAIN_URL")
            .map_err(|_| Error::Config("RESOLVE_DOMAIN_URL is not set".to_string()))?;

        let mut config = Self::new(origin_host, &resolver_url)?;

        config.redis_url = std::env::var("TENANT_CACHE_URL").ok().filter(|v| !v.is_empty());

        if let Ok(hosts) = std::env::var("BASE_HOSTS") {
            let hosts: Vec<String> = hosts
                .split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
            if !hosts.is_empty() {
                config.base_hosts = hosts;
            }
        }

        if let Ok(port) = std::env::var("EDGE_PORT") {
            config.port = port
                .parse()
                .map_err(|_| Error::Config(format!("invalid EDGE_PORT '{}'", port)))?;
        }

        Ok(config)
    }
}
