//! Reverse proxy to the fixed origin host.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Response};
use reqwest::redirect::Policy;

use comando_core::{Error, Result};

/// Header carrying the client-facing hostname to the origin.
pub const FORWARDED_HOST_HEADER: &str = "x-forwarded-host";

/// Second copy of the client-facing hostname, kept for origin-side code
/// that predates the forwarded-host convention.
pub const ORIGINAL_HOST_HEADER: &str = "x-original-host";

/// Bound on buffered request bodies forwarded upstream.
pub const MAX_PROXY_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Build the upstream URL for a proxied request.
pub fn upstream_url(host: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("https://{}{}?{}", host, path, q),
        _ => format!("https://{}{}", host, path),
    }
}

/// Clone the incoming headers for the origin: `Host` is overwritten and the
/// client-facing hostname travels in the forwarding headers. The stale
/// `Content-Length` is dropped so the client recomputes it for the
/// forwarded body.
pub fn forward_headers(original: &HeaderMap, client_host: &str, origin_host: &str) -> HeaderMap {
    let mut headers = original.clone();
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    if let Ok(value) = HeaderValue::from_str(origin_host) {
        headers.insert(header::HOST, value);
    }
    if let Ok(value) = HeaderValue::from_str(client_host) {
        headers.insert(HeaderName::from_static(FORWARDED_HOST_HEADER), value.clone());
        headers.insert(HeaderName::from_static(ORIGINAL_HOST_HEADER), value);
    }
    headers
}

/// Inject permissive CORS headers onto a proxied response.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,POST,PUT,DELETE,OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("authorization, x-client-info, apikey, content-type"),
    );
}

/// Streams requests to an upstream host and relays the response.
///
/// Redirects from the origin are not followed; they pass through to the
/// client as-is. Every fetch carries an explicit timeout instead of
/// leaning on a platform kill switch. No retries: a failed upstream fetch
/// surfaces to the router's generic error handler.
pub struct UpstreamProxy {
    client: reqwest::Client,
    origin_host: String,
}

impl UpstreamProxy {
    pub fn new(origin_host: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            origin_host: origin_host.into(),
        }
    }

    /// Proxy to the fixed origin with header rewrite and CORS injection.
    pub async fn forward(
        &self,
        method: Method,
        client_host: &str,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Option<Bytes>,
    ) -> Result<Response<Body>> {
        let url = upstream_url(&self.origin_host, path, query);
        let headers = forward_headers(headers, client_host, &self.origin_host);
        self.send(method, url, headers, body, true).await
    }

    /// Forward to the original hostname with headers untouched; used for
    /// allow-listed hosts the router passes through unmodified.
    pub async fn forward_untouched(
        &self,
        method: Method,
        host: &str,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Option<Bytes>,
    ) -> Result<Response<Body>> {
        let url = upstream_url(host, path, query);
        let mut headers = headers.clone();
        headers.remove(header::CONTENT_LENGTH);
        self.send(method, url, headers, body, false).await
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        headers: HeaderMap,
        body: Option<Bytes>,
        inject_cors: bool,
    ) -> Result<Response<Body>> {
        let mut request = self.client.request(method, &url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        let upstream = request.send().await?;
        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        if inject_cors {
            apply_cors(&mut headers);
        }

        let mut response = Response::builder()
            .status(status)
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| Error::Internal(e.to_string()))?;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_url_keeps_path_and_query() {
        assert_eq!(
            upstream_url("origin.internal", "/assets/app.css", None),
            "https://origin.internal/assets/app.css"
        );
        assert_eq!(
            upstream_url("origin.internal", "/search", Some("q=tenis&page=2")),
            "https://origin.internal/search?q=tenis&page=2"
        );
        assert_eq!(
            upstream_url("origin.internal", "/search", Some("")),
            "https://origin.internal/search"
        );
    }

    #[test]
    fn forward_headers_rewrites_host_and_adds_forwarding_pair() {
        let mut original = HeaderMap::new();
        original.insert(header::HOST, HeaderValue::from_static("loja.example.com"));
        original.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        original.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));

        let headers = forward_headers(&original, "loja.example.com", "origin.internal");

        assert_eq!(headers.get(header::HOST).unwrap(), "origin.internal");
        assert_eq!(
            headers.get(FORWARDED_HOST_HEADER).unwrap(),
            "loja.example.com"
        );
        assert_eq!(
            headers.get(ORIGINAL_HOST_HEADER).unwrap(),
            "loja.example.com"
        );
        // Carried through untouched.
        assert_eq!(headers.get(header::ACCEPT).unwrap(), "text/html");
        // Stale length dropped.
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn cors_headers_are_permissive() {
        let mut headers = HeaderMap::new();
        apply_cors(&mut headers);

        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            "GET,POST,PUT,DELETE,OPTIONS"
        );
        let allowed = headers
            .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(allowed.contains("authorization"));
        assert!(allowed.contains("content-type"));
    }
}
