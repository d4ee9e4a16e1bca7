//! Replay tool: resets stuck or failed event/notification state so the
//! normal dispatch loop picks it up again.
//!
//! The dispatch loop has no dead-letter UI; replay is the manual
//! incident-response lever, which is why the lookback window is hard-capped
//! and the operation is gated to tenant owners/admins.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use comando_core::defaults::REPLAY_MAX_WINDOW_DAYS;
use comando_core::{
    Error, EventRepository, InboxEvent, MemberRole, MembershipRepository, Notification,
    NotificationRepository, NotificationStatus, ReplayStats, Result,
};

/// Clamp a requested lookback window to the hard cap.
///
/// Requests above the cap are clamped, never honored; non-positive or
/// missing values fall back conservatively.
pub fn clamp_window_days(days: Option<i64>) -> i64 {
    days.unwrap_or(REPLAY_MAX_WINDOW_DAYS)
        .clamp(1, REPLAY_MAX_WINDOW_DAYS)
}

/// Gate: only tenant owners and admins may replay.
pub fn ensure_replay_allowed(role: Option<MemberRole>) -> Result<()> {
    match role {
        Some(role) if role.is_admin() => Ok(()),
        _ => Err(Error::Forbidden(
            "replay requires an owner or admin membership for the tenant".to_string(),
        )),
    }
}

/// What replay does with one settled event, decided from its linked
/// notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayAction {
    /// A notification already went out; leave everything untouched.
    AlreadyDelivered,
    /// Reset these failed/retrying notifications to scheduled, due now.
    ResetNotifications(Vec<Uuid>),
    /// No notifications exist; put the event itself back to pending so the
    /// processing stage re-evaluates it from scratch.
    ResetEvent,
    /// Notifications exist but none sent/failed/retrying; pull their
    /// next attempt forward to accelerate pickup.
    Accelerate(Vec<Uuid>),
}

/// Decide the replay action for one event.
pub fn plan_replay(notifications: &[Notification]) -> ReplayAction {
    if notifications
        .iter()
        .any(|n| n.status == NotificationStatus::Sent)
    {
        return ReplayAction::AlreadyDelivered;
    }

    let stuck: Vec<Uuid> = notifications
        .iter()
        .filter(|n| {
            matches!(
                n.status,
                NotificationStatus::Failed | NotificationStatus::Retrying
            )
        })
        .map(|n| n.id)
        .collect();
    if !stuck.is_empty() {
        return ReplayAction::ResetNotifications(stuck);
    }

    if notifications.is_empty() {
        return ReplayAction::ResetEvent;
    }

    ReplayAction::Accelerate(notifications.iter().map(|n| n.id).collect())
}

/// Executes replay over a tenant's recently settled events.
///
/// Read-then-write per event, not transactional across events: an
/// interrupted run leaves already-reset events reset, and re-invoking is
/// safe (they land in the accelerate branch the second time).
pub struct ReplayRunner {
    events: Arc<dyn EventRepository>,
    notifications: Arc<dyn NotificationRepository>,
    memberships: Arc<dyn MembershipRepository>,
}

impl ReplayRunner {
    pub fn new(
        events: Arc<dyn EventRepository>,
        notifications: Arc<dyn NotificationRepository>,
        memberships: Arc<dyn MembershipRepository>,
    ) -> Self {
        Self {
            events,
            notifications,
            memberships,
        }
    }

    /// Check that `user_id` may replay `tenant_id`.
    pub async fn authorize(&self, tenant_id: Uuid, user_id: Uuid) -> Result<()> {
        let role = self.memberships.role_for(tenant_id, user_id).await?;
        ensure_replay_allowed(role)
    }

    /// Replay the tenant's settled events within the clamped window.
    #[instrument(skip(self), fields(subsystem = "dispatch", component = "replay"))]
    pub async fn run(&self, tenant_id: Uuid, days: Option<i64>) -> Result<ReplayStats> {
        let window = clamp_window_days(days);
        let since = Utc::now() - chrono::Duration::days(window);

        let events = self.events.list_settled_since(tenant_id, since).await?;
        let mut stats = ReplayStats {
            events_found: events.len() as u64,
            ..Default::default()
        };

        for event in &events {
            match self.replay_one(event).await {
                Ok(true) => stats.events_reset += 1,
                Ok(false) => stats.events_already_processed += 1,
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Replay failed for event");
                    stats.errors += 1;
                }
            }
        }

        info!(
            %tenant_id,
            window_days = window,
            found = stats.events_found,
            reset = stats.events_reset,
            already = stats.events_already_processed,
            errors = stats.errors,
            "Replay finished"
        );
        Ok(stats)
    }

    /// Returns true when the event was reset in some form.
    async fn replay_one(&self, event: &InboxEvent) -> Result<bool> {
        let notifications = self.notifications.list_for_event(event.id).await?;
        match plan_replay(&notifications) {
            ReplayAction::AlreadyDelivered => Ok(false),
            ReplayAction::ResetNotifications(ids) => {
                self.notifications.reset_for_replay(&ids).await?;
                Ok(true)
            }
            ReplayAction::ResetEvent => {
                self.events.reset_to_pending(event.id).await?;
                Ok(true)
            }
            ReplayAction::Accelerate(ids) => {
                self.notifications.accelerate(&ids).await?;
                Ok(true)
            }
        }
    }
}
