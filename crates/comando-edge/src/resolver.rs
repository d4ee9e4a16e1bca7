//! Tenant resolution: remote directory lookup with a cache-aside layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use comando_core::{Result, ResolutionCache, TenantDirectory, TenantLookup};

/// Resolver-endpoint client.
///
/// The endpoint is configured to skip authentication, so no auth header is
/// sent. A non-2xx answer is a negative lookup, not a transport error.
pub struct HttpTenantDirectory {
    client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpTenantDirectory {
    pub fn new(endpoint: reqwest::Url, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }
}

#[async_trait]
impl TenantDirectory for HttpTenantDirectory {
    async fn resolve(&self, hostname: &str) -> Result<TenantLookup> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("hostname", hostname);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            warn!(hostname, status = %response.status(), "Resolver returned an error");
            return Ok(TenantLookup::not_found());
        }

        Ok(response.json::<TenantLookup>().await?)
    }
}

/// Cache-aside tenant resolution.
///
/// Cache hits return without a network call. On a miss the directory is
/// queried; affirmative results are written back on a detached task so the
/// write can never delay the response, and its failure only logs.
pub struct TenantResolutionService {
    cache: Arc<dyn ResolutionCache>,
    directory: Arc<dyn TenantDirectory>,
}

impl TenantResolutionService {
    pub fn new(cache: Arc<dyn ResolutionCache>, directory: Arc<dyn TenantDirectory>) -> Self {
        Self { cache, directory }
    }

    pub async fn resolve(&self, hostname: &str) -> Result<TenantLookup> {
        if let Some(hit) = self.cache.get(hostname).await {
            return Ok(hit);
        }

        let lookup = self.directory.resolve(hostname).await?;

        if lookup.cacheable() {
            let cache = self.cache.clone();
            let host = hostname.to_string();
            let value = lookup.clone();
            tokio::spawn(async move {
                if !cache.put(&host, &value).await {
                    debug!(hostname = %host, "Tenant cache write skipped");
                }
            });
        }

        Ok(lookup)
    }
}
