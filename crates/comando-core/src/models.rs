//! Domain models for tenant resolution and the notification dispatch loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// TENANT RESOLUTION
// =============================================================================

/// Result of resolving a hostname to a tenant.
///
/// Only affirmative results (`found == true`) are ever cached; a negative
/// result forces a fresh resolver call on the next request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantLookup {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_slug: Option<String>,
}

impl TenantLookup {
    /// A successful lookup carrying the tenant's slug.
    pub fn found(slug: impl Into<String>) -> Self {
        Self {
            found: true,
            tenant_slug: Some(slug.into()),
        }
    }

    /// A negative lookup. Never cached.
    pub fn not_found() -> Self {
        Self {
            found: false,
            tenant_slug: None,
        }
    }

    /// Whether this result may be written to the resolution cache.
    pub fn cacheable(&self) -> bool {
        self.found
    }
}

// =============================================================================
// INBOX EVENTS
// =============================================================================

/// Lifecycle status of an inbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processed,
    Ignored,
}

impl EventStatus {
    /// String form stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processed => "processed",
            EventStatus::Ignored => "ignored",
        }
    }

    /// Parse the database string form. Unknown values fall back to `Pending`
    /// so a bad row is retried rather than silently dropped.
    pub fn from_db(s: &str) -> Self {
        match s {
            "processed" => EventStatus::Processed,
            "ignored" => EventStatus::Ignored,
            _ => EventStatus::Pending,
        }
    }

    /// True once the event has been through the processing stage.
    pub fn is_settled(self) -> bool {
        matches!(self, EventStatus::Processed | EventStatus::Ignored)
    }
}

/// A normalized record of something that happened in the platform
/// (order placed, payment confirmed, ...) that may warrant notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub payload: JsonValue,
    pub occurred_at: DateTime<Utc>,
    pub status: EventStatus,
    pub processing_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Request to enqueue a new inbox event (upstream producers and tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventRequest {
    pub tenant_id: Uuid,
    pub event_type: String,
    pub payload: JsonValue,
    /// Defaults to now when omitted.
    pub occurred_at: Option<DateTime<Utc>>,
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Lifecycle status of a notification.
///
/// `Sent` is reached at most once. `Failed` is terminal unless replay resets
/// it. `Retrying` implies a future `next_attempt_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Scheduled,
    Sending,
    Sent,
    Retrying,
    Failed,
}

impl NotificationStatus {
    /// String form stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationStatus::Scheduled => "scheduled",
            NotificationStatus::Sending => "sending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Retrying => "retrying",
            NotificationStatus::Failed => "failed",
        }
    }

    /// Parse the database string form. Unknown values fall back to
    /// `Scheduled` so the row gets picked up again.
    pub fn from_db(s: &str) -> Self {
        match s {
            "sending" => NotificationStatus::Sending,
            "sent" => NotificationStatus::Sent,
            "retrying" => NotificationStatus::Retrying,
            "failed" => NotificationStatus::Failed,
            _ => NotificationStatus::Scheduled,
        }
    }
}

/// A scheduled or attempted delivery derived from one inbox event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub event_id: Uuid,
    /// Rule that produced this notification; None when the rule was deleted.
    pub rule_id: Option<Uuid>,
    pub tenant_id: Uuid,
    pub status: NotificationStatus,
    pub next_attempt_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// NOTIFICATION RULES
// =============================================================================

/// Per-tenant registration of a delivery endpoint subscribed to event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    pub secret: Option<String>,
    /// Empty list subscribes to every event type.
    pub event_types: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRule {
    /// Whether this rule subscribes to the given event type.
    pub fn matches(&self, event_type: &str) -> bool {
        self.event_types.is_empty() || self.event_types.iter().any(|t| t == event_type)
    }
}

/// Request to register a notification rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRuleRequest {
    pub tenant_id: Uuid,
    pub url: String,
    pub secret: Option<String>,
    pub event_types: Vec<String>,
}

// =============================================================================
// MEMBERSHIP & AUTH
// =============================================================================

/// Role a user holds within a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(MemberRole::Owner),
            "admin" => Some(MemberRole::Admin),
            "member" => Some(MemberRole::Member),
            _ => None,
        }
    }

    /// Owners and admins may operate the tenant's recovery tooling.
    pub fn is_admin(self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Admin)
    }
}

/// Authenticated caller resolved from a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPrincipal {
    pub user_id: Uuid,
}

// =============================================================================
// DISPATCH STAGE OUTCOMES
// =============================================================================

/// Counters returned by the event-processing stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub processed_count: u64,
    pub ignored_count: u64,
    pub notifications_created: u64,
}

impl ProcessOutcome {
    pub fn absorb(&mut self, other: ProcessOutcome) {
        self.processed_count += other.processed_count;
        self.ignored_count += other.ignored_count;
        self.notifications_created += other.notifications_created;
    }
}

/// Counters returned by the notification-delivery stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub claimed_count: u64,
    pub processed_success: u64,
    pub scheduled_retries: u64,
    pub failed_final: u64,
}

impl RunOutcome {
    pub fn absorb(&mut self, other: RunOutcome) {
        self.claimed_count += other.claimed_count;
        self.processed_success += other.processed_success;
        self.scheduled_retries += other.scheduled_retries;
        self.failed_final += other.failed_final;
    }
}

// =============================================================================
// TICK SUMMARY
// =============================================================================

/// In-memory record of one pass within a tick. Not persisted row-by-row;
/// aggregated into the tick summary returned to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassRecord {
    pub pass: u32,
    pub events: ProcessOutcome,
    pub process_failed: bool,
    pub notifications: RunOutcome,
    pub run_failed: bool,
}

/// Aggregated counters across all passes of one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickTotals {
    pub events: ProcessOutcome,
    pub notifications: RunOutcome,
    pub process_errors: u32,
    pub run_errors: u32,
}

/// Structured summary of one tick invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub passes_requested: u32,
    pub passes_executed: u32,
    /// True when the explicit wall-clock budget ended the tick early.
    pub truncated: bool,
    pub totals: TickTotals,
    pub passes: Vec<PassRecord>,
}

// =============================================================================
// REPLAY
// =============================================================================

/// Aggregate counts returned by the replay tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStats {
    pub events_found: u64,
    pub events_reset: u64,
    pub events_already_processed: u64,
    pub errors: u64,
}
