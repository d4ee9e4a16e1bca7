//! Centralized default constants for the Comando Central services.
//!
//! **This module is the single source of truth** for shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area; when adding new constants, place them
//! in the appropriate section and document the rationale for the value.

// =============================================================================
// TENANT RESOLUTION
// =============================================================================

/// Cache key prefix for tenant resolution entries.
pub const TENANT_CACHE_PREFIX: &str = "tenant:";

/// TTL for positive tenant resolution cache entries, in seconds.
///
/// Negative lookups are never cached; every request for an unknown host
/// re-queries the resolver.
pub const TENANT_CACHE_TTL_SECS: u64 = 300;

/// Timeout for resolver lookups in seconds.
pub const RESOLVER_TIMEOUT_SECS: u64 = 5;

/// Path prefix a root request redirects into once the tenant is resolved.
pub const STORE_PATH_PREFIX: &str = "/store/";

// =============================================================================
// EDGE PROXY
// =============================================================================

/// Default edge router listen port.
pub const EDGE_PORT: u16 = 8787;

/// Timeout for upstream proxy fetches in seconds.
pub const PROXY_TIMEOUT_SECS: u64 = 30;

/// Reserved hosting-platform suffixes that always pass through untouched.
pub const PLATFORM_SUFFIXES: [&str; 2] = [".workers.dev", ".pages.dev"];

/// Base hostnames (and their subdomains) that bypass tenant resolution.
pub const BASE_HOSTS: [&str; 4] = [
    "respeiteohomem.com.br",
    "shops.respeiteohomem.com.br",
    "localhost",
    "127.0.0.1",
];

/// Default CORS max-age in seconds (1 hour).
pub const CORS_MAX_AGE_SECS: u64 = 3600;

// =============================================================================
// DISPATCH TICK
// =============================================================================

/// Default number of passes per tick invocation.
pub const TICK_PASSES: u32 = 2;

/// Upper bound on passes a single tick request may ask for.
pub const TICK_MAX_PASSES: u32 = 10;

/// Default batch limit for the event-processing stage.
pub const TICK_PROCESS_LIMIT: i64 = 50;

/// Default batch limit for the notification-delivery stage.
pub const TICK_RUN_LIMIT: i64 = 50;

/// Delay between passes within one tick, in seconds.
///
/// Spaces passes roughly 30 seconds apart assuming ~5s of stage work, so a
/// 1-minute external cron invoking a 2-pass tick approximates a 30s polling
/// cadence without sub-minute cron granularity.
pub const INTER_PASS_DELAY_SECS: u64 = 25;

/// Wall-clock allowance per pass for the two stage calls combined when
/// computing the tick budget.
pub const STAGE_BUDGET_SECS: u64 = 10;

// =============================================================================
// NOTIFICATION DELIVERY
// =============================================================================

/// Timeout for a single delivery HTTP request in seconds.
pub const DELIVERY_TIMEOUT_SECS: u64 = 10;

/// Maximum delivery attempts before a notification is terminally failed.
pub const DELIVERY_MAX_ATTEMPTS: i32 = 5;

/// Base delay for the exponential retry backoff, in seconds.
pub const RETRY_BACKOFF_BASE_SECS: u64 = 60;

/// Cap on the retry backoff delay, in seconds (1 hour).
pub const RETRY_BACKOFF_CAP_SECS: u64 = 3600;

// =============================================================================
// REPLAY
// =============================================================================

/// Hard cap on the replay lookback window, in days.
///
/// A deliberate safety bound against unbounded reprocessing; requested
/// windows above this are clamped, never honored.
pub const REPLAY_MAX_WINDOW_DAYS: i64 = 3;

// =============================================================================
// API SERVER
// =============================================================================

/// Default dispatch API listen port.
pub const SERVER_PORT: u16 = 3000;

/// Default rate limit: max requests per period.
pub const RATE_LIMIT_REQUESTS: u64 = 100;

/// Default rate limit: period in seconds.
pub const RATE_LIMIT_PERIOD_SECS: u64 = 60;

/// Maximum request body size in bytes for the dispatch API.
pub const MAX_BODY_SIZE_BYTES: usize = 1024 * 1024;
