//! Request routing: hostname normalization, the first-match decision, and
//! the fail-closed request handler.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::{debug, error};

use comando_core::defaults::STORE_PATH_PREFIX;
use comando_core::{Error, Result};

use crate::config::EdgeConfig;
use crate::proxy::{UpstreamProxy, MAX_PROXY_BODY_BYTES};
use crate::resolver::TenantResolutionService;

/// Body served on an unresolved storefront root.
const NOT_FOUND_BODY: &str = "<!doctype html><html><head><title>Loja n\u{e3}o encontrada</title></head>\
     <body><h1>Loja n\u{e3}o encontrada</h1>\
     <p>Esta loja n\u{e3}o existe ou foi desativada.</p></body></html>";

/// Normalize a raw host string: lowercase, strip any `:port` suffix, strip
/// trailing dots.
pub fn normalize_hostname(raw: &str) -> String {
    let mut host = raw.trim().to_ascii_lowercase();

    // Strip a single :port suffix. Bare IPv6 literals carry multiple
    // colons and are left alone.
    if host.matches(':').count() == 1 {
        if let Some(idx) = host.rfind(':') {
            let suffix = &host[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                host.truncate(idx);
            }
        }
    }

    while host.ends_with('.') {
        host.pop();
    }
    host
}

/// Where a request goes. First match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Platform or allow-listed host: forwarded to its original
    /// destination untouched.
    Passthrough,
    /// Storefront root: resolve the tenant and redirect or 404.
    ResolveRoot,
    /// Everything else: reverse proxy to the fixed origin.
    Proxy,
}

/// Classify a normalized hostname + path.
pub fn classify(config: &EdgeConfig, hostname: &str, path: &str) -> RouteDecision {
    if config
        .platform_suffixes
        .iter()
        .any(|suffix| hostname.ends_with(suffix.as_str()))
    {
        return RouteDecision::Passthrough;
    }

    if config.base_hosts.iter().any(|base| {
        hostname == base || hostname.ends_with(&format!(".{}", base))
    }) {
        return RouteDecision::Passthrough;
    }

    if path.is_empty() || path == "/" {
        return RouteDecision::ResolveRoot;
    }

    RouteDecision::Proxy
}

/// Shared state for the edge router.
#[derive(Clone)]
pub struct EdgeState {
    pub config: Arc<EdgeConfig>,
    pub resolver: Arc<TenantResolutionService>,
    pub proxy: Arc<UpstreamProxy>,
}

/// Build the edge router: every method and path lands in the one handler.
pub fn app(state: EdgeState) -> Router {
    Router::new().fallback(handle).with_state(state)
}

/// Top-level handler. Expected not-found conditions get clean responses;
/// anything unexpected collapses to a generic 500 with the detail logged
/// server-side only.
async fn handle(State(state): State<EdgeState>, request: Request) -> Response {
    match route(&state, request).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Edge request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

async fn route(state: &EdgeState, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();

    let raw_host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.host().map(str::to_string))
        .unwrap_or_default();
    let hostname = normalize_hostname(&raw_host);
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(str::to_string);

    let decision = classify(&state.config, &hostname, &path);
    debug!(%hostname, %path, ?decision, "Routing request");

    match decision {
        RouteDecision::ResolveRoot => {
            let lookup = state.resolver.resolve(&hostname).await?;
            match lookup.tenant_slug.filter(|_| lookup.found) {
                Some(slug) => Ok(redirect_to_store(&hostname, &slug)),
                None => Ok(storefront_not_found()),
            }
        }
        RouteDecision::Passthrough => {
            let body = read_body(&parts.method, body).await?;
            state
                .proxy
                .forward_untouched(
                    parts.method,
                    &hostname,
                    &path,
                    query.as_deref(),
                    &parts.headers,
                    body,
                )
                .await
        }
        RouteDecision::Proxy => {
            let body = read_body(&parts.method, body).await?;
            state
                .proxy
                .forward(
                    parts.method,
                    &hostname,
                    &path,
                    query.as_deref(),
                    &parts.headers,
                    body,
                )
                .await
        }
    }
}

/// GET/HEAD never carry a body; other methods are buffered for the
/// upstream fetch.
async fn read_body(method: &Method, body: Body) -> Result<Option<axum::body::Bytes>> {
    if method == Method::GET || method == Method::HEAD {
        return Ok(None);
    }
    let bytes = axum::body::to_bytes(body, MAX_PROXY_BODY_BYTES)
        .await
        .map_err(|e| Error::Request(e.to_string()))?;
    Ok((!bytes.is_empty()).then_some(bytes))
}

/// Same-host redirect into the tenant's storefront path.
fn redirect_to_store(hostname: &str, slug: &str) -> Response {
    let location = format!("https://{}{}{}", hostname, STORE_PATH_PREFIX, slug);
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

fn storefront_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        NOT_FOUND_BODY,
    )
        .into_response()
}
