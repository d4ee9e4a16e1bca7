//! Trait definitions for storage repositories and service seams.
//!
//! Repositories are the database boundary; the remaining traits are the
//! seams between the edge router, the dispatch stages, and their transports,
//! so each side can be exercised against in-memory implementations in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AuthPrincipal, CreateEventRequest, CreateRuleRequest, EventStatus, InboxEvent, MemberRole,
    Notification, NotificationRule, ProcessOutcome, RunOutcome, TenantLookup,
};

// =============================================================================
// STORAGE REPOSITORIES
// =============================================================================

/// Repository for inbox events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Enqueue a new pending event.
    async fn insert(&self, req: CreateEventRequest) -> Result<Uuid>;

    /// Fetch a single event.
    async fn get(&self, id: Uuid) -> Result<Option<InboxEvent>>;

    /// List up to `limit` pending events, oldest first.
    async fn list_pending(&self, limit: i64) -> Result<Vec<InboxEvent>>;

    /// Conditionally settle a pending event. Returns false when another
    /// worker settled it first (the row was no longer pending).
    async fn try_settle(&self, id: Uuid, to: EventStatus, error: Option<&str>) -> Result<bool>;

    /// Record a processing error without changing status.
    async fn record_error(&self, id: Uuid, error: &str) -> Result<()>;

    /// Put a settled event back to pending so the processing stage
    /// re-evaluates it from scratch.
    async fn reset_to_pending(&self, id: Uuid) -> Result<()>;

    /// List a tenant's settled (processed or ignored) events that occurred
    /// at or after `since`.
    async fn list_settled_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<InboxEvent>>;
}

/// Repository for notifications.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Create a scheduled notification for an event/rule pair,
    /// due immediately.
    async fn create(&self, event: &InboxEvent, rule: &NotificationRule) -> Result<Uuid>;

    /// Claim up to `limit` due notifications (scheduled or retrying, with
    /// `next_attempt_at` in the past) by transitioning them to `sending`.
    /// Concurrent claimers never receive the same row.
    async fn claim_due(&self, limit: i64) -> Result<Vec<Notification>>;

    /// Mark a claimed notification as delivered. A notification reaches
    /// `sent` at most once.
    async fn mark_sent(&self, id: Uuid) -> Result<()>;

    /// Schedule another attempt after a failed delivery.
    async fn schedule_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        attempt_count: i32,
        error: &str,
    ) -> Result<()>;

    /// Terminally fail a notification.
    async fn mark_failed(&self, id: Uuid, attempt_count: i32, error: &str) -> Result<()>;

    /// All notifications linked to an event.
    async fn list_for_event(&self, event_id: Uuid) -> Result<Vec<Notification>>;

    /// Replay reset: back to `scheduled`, due now, attempt count zeroed,
    /// error cleared. Returns the number of rows reset.
    async fn reset_for_replay(&self, ids: &[Uuid]) -> Result<u64>;

    /// Replay acceleration: pull `next_attempt_at` forward to now for
    /// still-scheduled notifications. Returns the number of rows touched.
    async fn accelerate(&self, ids: &[Uuid]) -> Result<u64>;
}

/// Repository for per-tenant notification rules.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn create(&self, req: CreateRuleRequest) -> Result<Uuid>;

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRule>>;

    /// Active rules for a tenant subscribed to the given event type
    /// (an empty subscription list matches every type).
    async fn list_active_for_event(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<NotificationRule>>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Repository for tenant memberships.
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// The role `user_id` holds within `tenant_id`, if any.
    async fn role_for(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<MemberRole>>;

    /// Create or update a membership.
    async fn upsert(&self, tenant_id: Uuid, user_id: Uuid, role: MemberRole) -> Result<()>;
}

/// Repository for API bearer tokens.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Resolve a bearer token to its principal. Tokens are stored as
    /// digests; the raw token never touches the database.
    async fn principal_for_token(&self, token: &str) -> Result<Option<AuthPrincipal>>;

    /// Issue a token for a user (seed/test tooling).
    async fn issue(&self, user_id: Uuid, token: &str) -> Result<Uuid>;
}

// =============================================================================
// EDGE ROUTER SEAMS
// =============================================================================

/// Remote hostname-to-tenant lookup (the resolver endpoint).
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Resolve a normalized hostname. Resolver-side HTTP errors surface as
    /// a negative lookup, not as `Err`; `Err` is reserved for transport
    /// failures the caller turns into its generic error response.
    async fn resolve(&self, hostname: &str) -> Result<TenantLookup>;
}

/// Shared cache for tenant resolution results.
///
/// Implementations swallow their own backend errors (a broken cache must
/// degrade to cache-miss behavior, never break request handling).
#[async_trait]
pub trait ResolutionCache: Send + Sync {
    /// Cached lookup for a hostname, if present and fresh.
    async fn get(&self, hostname: &str) -> Option<TenantLookup>;

    /// Store an affirmative lookup with the configured TTL. Returns false
    /// when the write was skipped or failed.
    async fn put(&self, hostname: &str, lookup: &TenantLookup) -> bool;
}

// =============================================================================
// DISPATCH SEAMS
// =============================================================================

/// The two dispatch stages as seen by the tick orchestrator.
///
/// The orchestrator never reads or writes event/notification rows itself;
/// it only calls these and aggregates the returned counters. An `Err` from
/// either call is recorded as a stage-level error flag for the pass and
/// never aborts the tick.
#[async_trait]
pub trait DispatchStages: Send + Sync {
    async fn process_events(&self, limit: i64) -> Result<ProcessOutcome>;

    async fn run_notifications(&self, limit: i64) -> Result<RunOutcome>;
}

/// Transport used by the delivery stage for a single attempt.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Attempt delivery of `payload` to the rule's endpoint. `Err` carries
    /// the message recorded as the notification's `last_error`.
    async fn deliver(
        &self,
        rule: &NotificationRule,
        event_type: &str,
        payload: &JsonValue,
    ) -> Result<()>;
}
