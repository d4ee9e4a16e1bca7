//! comando-edge - storefront edge router

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comando_core::ResolutionCache;
use comando_edge::{
    app, EdgeConfig, EdgeState, HttpTenantDirectory, RedisResolutionCache,
    TenantResolutionService, UpstreamProxy,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "comando_edge=debug,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Fail fast on missing ORIGIN_HOST / RESOLVE_DOMAIN_URL.
    let config = EdgeConfig::from_env()?;
    info!(
        origin_host = %config.origin_host,
        resolver = %config.resolver_url,
        cache = config.redis_url.is_some(),
        "Edge configuration loaded"
    );

    let cache: Arc<dyn ResolutionCache> = Arc::new(
        RedisResolutionCache::connect(config.redis_url.as_deref(), config.cache_ttl_secs).await,
    );
    let directory = Arc::new(HttpTenantDirectory::new(
        config.resolver_url.clone(),
        config.resolver_timeout,
    ));
    let resolver = Arc::new(TenantResolutionService::new(cache, directory));
    let proxy = Arc::new(UpstreamProxy::new(
        config.origin_host.clone(),
        config.proxy_timeout,
    ));

    let port = config.port;
    let state = EdgeState {
        config: Arc::new(config),
        resolver,
        proxy,
    };

    let app = app(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "Edge router listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
