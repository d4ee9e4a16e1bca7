//! comando-api - dispatch API server for Comando Central
//!
//! Exposes the notification dispatch loop over HTTP:
//!
//! - `POST /process-events`    run the event-processing stage once
//! - `POST /run-notifications` run the delivery stage once
//! - `POST /scheduler-tick`    run both stages across bounded passes
//! - `POST /replay-events`     admin recovery for stuck/failed work
//! - `GET  /health`            liveness probe

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use comando_core::defaults::{
    MAX_BODY_SIZE_BYTES, RATE_LIMIT_PERIOD_SECS, RATE_LIMIT_REQUESTS, SERVER_PORT,
    TICK_PROCESS_LIMIT, TICK_RUN_LIMIT,
};
use comando_core::{
    DispatchStages, EventRepository, MembershipRepository, NotificationRepository, ReplayStats,
    RuleRepository, TickSummary, TokenRepository,
};
use comando_db::Database;
use comando_dispatch::{
    EventProcessor, HttpDeliveryTransport, LocalStages, NotificationRunner, ReplayRunner,
    TickConfig, TickRunner,
};

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Global rate limiter type (direct quota, no keyed bucketing).
type GlobalRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    db: Database,
    /// The two dispatch stages, wired in-process.
    stages: Arc<dyn DispatchStages>,
    /// Replay executor.
    replay: Arc<ReplayRunner>,
    /// Global rate limiter (None if rate limiting is disabled).
    rate_limiter: Option<Arc<GlobalRateLimiter>>,
}

fn check_rate_limit(state: &AppState) -> Result<(), ApiError> {
    if let Some(limiter) = &state.rate_limiter {
        if limiter.check().is_err() {
            return Err(ApiError::RateLimited);
        }
    }
    Ok(())
}

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

/// Body for the two stage endpoints.
#[derive(Debug, Deserialize, Default)]
struct StageRequest {
    limit: Option<i64>,
}

/// Body for the scheduler tick.
#[derive(Debug, Deserialize, Default)]
struct TickRequest {
    passes: Option<u32>,
    process_limit: Option<i64>,
    run_limit: Option<i64>,
}

impl TickRequest {
    fn into_config(self) -> TickConfig {
        let mut config = TickConfig::default();
        if let Some(passes) = self.passes {
            config = config.with_passes(passes);
        }
        if let Some(limit) = self.process_limit {
            config = config.with_process_limit(limit);
        }
        if let Some(limit) = self.run_limit {
            config = config.with_run_limit(limit);
        }
        config
    }
}

/// Body for replay.
#[derive(Debug, Deserialize)]
struct ReplayRequest {
    tenant_id: Uuid,
    days: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ReplayResponse {
    success: bool,
    stats: ReplayStats,
    message: String,
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn process_events(
    State(state): State<AppState>,
    body: Option<Json<StageRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    check_rate_limit(&state)?;
    let limit = body
        .and_then(|Json(req)| req.limit)
        .unwrap_or(TICK_PROCESS_LIMIT)
        .max(1);
    let outcome = state.stages.process_events(limit).await?;
    Ok(Json(outcome))
}

async fn run_notifications(
    State(state): State<AppState>,
    body: Option<Json<StageRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    check_rate_limit(&state)?;
    let limit = body
        .and_then(|Json(req)| req.limit)
        .unwrap_or(TICK_RUN_LIMIT)
        .max(1);
    let outcome = state.stages.run_notifications(limit).await?;
    Ok(Json(outcome))
}

async fn scheduler_tick(
    State(state): State<AppState>,
    body: Option<Json<TickRequest>>,
) -> Result<Json<TickSummary>, ApiError> {
    check_rate_limit(&state)?;
    let config = body.map(|Json(req)| req).unwrap_or_default().into_config();

    let runner = TickRunner::new(state.stages.clone(), config);
    let summary = runner.run().await;

    // Audit trail only; a failed write never fails the tick.
    if let Err(e) = state.db.tick_log.record(&summary).await {
        warn!(error = %e, "Failed to persist tick summary");
    }

    Ok(Json(summary))
}

async fn replay_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReplayRequest>,
) -> Result<Json<ReplayResponse>, ApiError> {
    check_rate_limit(&state)?;

    let token = bearer_token(&headers)?;
    let principal = state
        .db
        .tokens
        .principal_for_token(token)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("invalid token".to_string()))?;

    state.replay.authorize(req.tenant_id, principal.user_id).await?;
    let stats = state.replay.run(req.tenant_id, req.days).await?;

    let message = format!(
        "{} events found, {} reset, {} already processed, {} errors",
        stats.events_found, stats.events_reset, stats.events_already_processed, stats.errors
    );
    Ok(Json(ReplayResponse {
        success: true,
        stats,
        message,
    }))
}

/// Extract the bearer token from an Authorization header.
fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))
}

// =============================================================================
// SERVER
// =============================================================================

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/process-events", post(process_events))
        .route("/run-notifications", post(run_notifications))
        .route("/scheduler-tick", post(scheduler_tick))
        .route("/replay-events", post(replay_events))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logging: LOG_FORMAT ("json"/"text"), LOG_FILE (optional), RUST_LOG.
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "comando_api=debug,comando_dispatch=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("comando-api.log");
        let appender = tracing_appender::rolling::daily(dir, name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(non_blocking),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
        None
    };

    // Configuration
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/comando".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(SERVER_PORT);
    let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);

    // Database
    info!("Connecting to database...");
    let db = Database::connect(&database_url).await?;
    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database ready");

    // Wire the dispatch stages in-process.
    let events: Arc<dyn EventRepository> = Arc::new(db.events.clone());
    let notifications: Arc<dyn NotificationRepository> = Arc::new(db.notifications.clone());
    let rules: Arc<dyn RuleRepository> = Arc::new(db.rules.clone());
    let memberships: Arc<dyn MembershipRepository> = Arc::new(db.memberships.clone());

    let stages: Arc<dyn DispatchStages> = Arc::new(LocalStages::new(
        EventProcessor::new(events.clone(), notifications.clone(), rules.clone()),
        NotificationRunner::new(
            events.clone(),
            notifications.clone(),
            rules.clone(),
            Arc::new(HttpDeliveryTransport::new()),
        ),
    ));
    let replay = Arc::new(ReplayRunner::new(events, notifications, memberships));

    let rate_limiter = if rate_limit_enabled {
        let quota = Quota::with_period(std::time::Duration::from_secs(RATE_LIMIT_PERIOD_SECS))
            .map(|q| q.allow_burst(NonZeroU32::new(RATE_LIMIT_REQUESTS as u32).unwrap_or(NonZeroU32::MIN)));
        quota.map(|q| Arc::new(RateLimiter::direct(q)))
    } else {
        None
    };

    let state = AppState {
        db,
        stages,
        replay,
        rate_limiter,
    };

    let app = build_router(state);

    let addr = format!("{}:{}", host, port);
    info!(%addr, "Dispatch API listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
enum ApiError {
    Internal(comando_core::Error),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    RateLimited,
}

impl From<comando_core::Error> for ApiError {
    fn from(err: comando_core::Error) -> Self {
        match err {
            comando_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            comando_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            comando_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            comando_core::Error::Forbidden(msg) => ApiError::Forbidden(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            // Internal admin surface: the real error message is surfaced.
            ApiError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate limit exceeded".to_string(),
            ),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_parses_the_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer cc_live_abc"),
        );
        assert_eq!(bearer_token(&headers).unwrap(), "cc_live_abc");
    }

    #[test]
    fn bearer_token_rejects_missing_or_malformed_headers() {
        let headers = HeaderMap::new();
        assert!(matches!(
            bearer_token(&headers),
            Err(ApiError::Unauthorized(_))
        ));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert!(matches!(
            bearer_token(&headers),
            Err(ApiError::Unauthorized(_))
        ));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(matches!(
            bearer_token(&headers),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn tick_request_maps_onto_the_config_with_defaults() {
        let config = TickRequest::default().into_config();
        assert_eq!(config.passes, 2);
        assert_eq!(config.process_limit, TICK_PROCESS_LIMIT);
        assert_eq!(config.run_limit, TICK_RUN_LIMIT);

        let config = TickRequest {
            passes: Some(3),
            process_limit: Some(10),
            run_limit: Some(20),
        }
        .into_config();
        assert_eq!(config.passes, 3);
        assert_eq!(config.process_limit, 10);
        assert_eq!(config.run_limit, 20);
    }

    #[test]
    fn forbidden_errors_map_to_403() {
        let err: ApiError =
            comando_core::Error::Forbidden("replay requires an owner or admin".to_string()).into();
        assert!(matches!(err, ApiError::Forbidden(_)));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn unknown_errors_map_to_500_with_detail() {
        let err: ApiError = comando_core::Error::Stage("boom".to_string()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
