//! Event-processing stage: turns pending inbox events into notification rows.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use comando_core::{
    EventRepository, EventStatus, InboxEvent, NotificationRepository, ProcessOutcome, Result,
    RuleRepository,
};

/// What happened to a single event within one stage run.
enum EventDisposition {
    /// Notifications created, event settled as processed.
    Processed { created: u64 },
    /// No active rule matched; event settled as ignored.
    Ignored,
    /// A concurrent worker settled the event first.
    Skipped,
}

/// The event-processing stage.
///
/// Claims pending events through conditional settles: whichever worker
/// flips a row off `pending` first wins, so overlapping stage invocations
/// never double-create notifications for the same event.
pub struct EventProcessor {
    events: Arc<dyn EventRepository>,
    notifications: Arc<dyn NotificationRepository>,
    rules: Arc<dyn RuleRepository>,
}

impl EventProcessor {
    pub fn new(
        events: Arc<dyn EventRepository>,
        notifications: Arc<dyn NotificationRepository>,
        rules: Arc<dyn RuleRepository>,
    ) -> Self {
        Self {
            events,
            notifications,
            rules,
        }
    }

    /// Process up to `limit` pending events.
    ///
    /// Per-event failures are recorded on the event row and logged; the
    /// event stays pending and is retried on a later pass. Only a failure
    /// to list the batch itself surfaces as a stage error.
    #[instrument(skip(self), fields(subsystem = "dispatch", component = "process"))]
    pub async fn run(&self, limit: i64) -> Result<ProcessOutcome> {
        let batch = self.events.list_pending(limit).await?;
        let mut outcome = ProcessOutcome::default();

        for event in &batch {
            match self.process_one(event).await {
                Ok(EventDisposition::Processed { created }) => {
                    outcome.processed_count += 1;
                    outcome.notifications_created += created;
                }
                Ok(EventDisposition::Ignored) => outcome.ignored_count += 1,
                Ok(EventDisposition::Skipped) => {
                    debug!(event_id = %event.id, "Event settled by a concurrent worker");
                }
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Event processing failed");
                    if let Err(record_err) =
                        self.events.record_error(event.id, &e.to_string()).await
                    {
                        warn!(event_id = %event.id, error = %record_err,
                              "Failed to record processing error");
                    }
                }
            }
        }

        debug!(
            batch = batch.len(),
            processed = outcome.processed_count,
            ignored = outcome.ignored_count,
            created = outcome.notifications_created,
            "Event batch processed"
        );
        Ok(outcome)
    }

    async fn process_one(&self, event: &InboxEvent) -> Result<EventDisposition> {
        let rules = self
            .rules
            .list_active_for_event(event.tenant_id, &event.event_type)
            .await?;

        if rules.is_empty() {
            return if self
                .events
                .try_settle(event.id, EventStatus::Ignored, None)
                .await?
            {
                Ok(EventDisposition::Ignored)
            } else {
                Ok(EventDisposition::Skipped)
            };
        }

        // Settle first: losing this conditional update means another worker
        // owns the event, and creating notifications here would duplicate.
        if !self
            .events
            .try_settle(event.id, EventStatus::Processed, None)
            .await?
        {
            return Ok(EventDisposition::Skipped);
        }

        let mut created = 0;
        for rule in &rules {
            match self.notifications.create(event, rule).await {
                Ok(_) => created += 1,
                Err(e) => {
                    // The event stays processed; replay's no-notifications
                    // branch recovers the case where every insert failed.
                    warn!(event_id = %event.id, rule_id = %rule.id, error = %e,
                          "Failed to create notification");
                    self.events.record_error(event.id, &e.to_string()).await?;
                }
            }
        }

        Ok(EventDisposition::Processed { created })
    }
}
