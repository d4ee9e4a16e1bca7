//! Notification-delivery stage: attempts delivery of due notifications.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde_json::{json, Value as JsonValue};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use comando_core::defaults::{
    DELIVERY_MAX_ATTEMPTS, DELIVERY_TIMEOUT_SECS, RETRY_BACKOFF_BASE_SECS, RETRY_BACKOFF_CAP_SECS,
};
use comando_core::{
    DeliveryTransport, Error, EventRepository, InboxEvent, Notification, NotificationRepository,
    NotificationRule, Result, RuleRepository, RunOutcome,
};

/// Deterministic exponential backoff in seconds for a failed attempt.
///
/// Attempt 1 retries after the base delay; each further attempt doubles it
/// up to the cap.
pub fn backoff_secs(attempt: i32) -> u64 {
    let exp = attempt.max(1).saturating_sub(1).min(10) as u32;
    RETRY_BACKOFF_BASE_SECS
        .saturating_mul(1u64 << exp)
        .min(RETRY_BACKOFF_CAP_SECS)
}

/// Backoff with ±20% jitter so retries from one outage don't all land on
/// the endpoint at the same instant.
pub fn retry_delay(attempt: i32) -> Duration {
    let secs = backoff_secs(attempt) as f64;
    let jitter: f64 = rand::thread_rng().gen_range(-0.2..=0.2);
    Duration::from_secs((secs * (1.0 + jitter)).max(1.0) as u64)
}

/// JSON body delivered for one notification.
pub fn delivery_payload(event: &InboxEvent) -> JsonValue {
    json!({
        "event_id": event.id,
        "event_type": event.event_type,
        "tenant_id": event.tenant_id,
        "occurred_at": event.occurred_at,
        "payload": event.payload,
    })
}

/// Hex HMAC-SHA256 signature over the exact body bytes.
pub fn sign_payload(secret: &str, body: &str) -> Option<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Production transport: POSTs the payload to the rule's endpoint.
pub struct HttpDeliveryTransport {
    client: reqwest::Client,
}

impl HttpDeliveryTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DELIVERY_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpDeliveryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DeliveryTransport for HttpDeliveryTransport {
    async fn deliver(
        &self,
        rule: &NotificationRule,
        event_type: &str,
        payload: &JsonValue,
    ) -> Result<()> {
        let body = serde_json::to_string(payload)?;

        let mut request = self
            .client
            .post(&rule.url)
            .header("Content-Type", "application/json")
            .header("X-Comando-Event", event_type);

        if let Some(secret) = &rule.secret {
            if let Some(signature) = sign_payload(secret, &body) {
                request = request.header("X-Comando-Signature", format!("sha256={}", signature));
            }
        }

        let response = request.body(body).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Delivery(format!(
                "endpoint returned {}",
                response.status()
            )))
        }
    }
}

/// The notification-delivery stage.
///
/// Claims due notifications (the claim itself is the concurrency guard,
/// done by conditional update in the repository) and attempts delivery of
/// each, scheduling retries with exponential backoff until the attempt
/// bound is reached.
pub struct NotificationRunner {
    events: Arc<dyn EventRepository>,
    notifications: Arc<dyn NotificationRepository>,
    rules: Arc<dyn RuleRepository>,
    transport: Arc<dyn DeliveryTransport>,
    max_attempts: i32,
}

enum AttemptResult {
    Sent,
    Retrying,
    Failed,
}

impl NotificationRunner {
    pub fn new(
        events: Arc<dyn EventRepository>,
        notifications: Arc<dyn NotificationRepository>,
        rules: Arc<dyn RuleRepository>,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Self {
        Self {
            events,
            notifications,
            rules,
            transport,
            max_attempts: DELIVERY_MAX_ATTEMPTS,
        }
    }

    /// Override the attempt bound.
    pub fn with_max_attempts(mut self, max: i32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    /// Attempt delivery of up to `limit` due notifications.
    #[instrument(skip(self), fields(subsystem = "dispatch", component = "deliver"))]
    pub async fn run(&self, limit: i64) -> Result<RunOutcome> {
        let claimed = self.notifications.claim_due(limit).await?;
        let mut outcome = RunOutcome {
            claimed_count: claimed.len() as u64,
            ..Default::default()
        };

        for notification in &claimed {
            match self.attempt(notification).await {
                Ok(AttemptResult::Sent) => outcome.processed_success += 1,
                Ok(AttemptResult::Retrying) => outcome.scheduled_retries += 1,
                Ok(AttemptResult::Failed) => outcome.failed_final += 1,
                Err(e) => {
                    // Bookkeeping failed; the row stays 'sending' until an
                    // operator replays it.
                    warn!(notification_id = %notification.id, error = %e,
                          "Delivery bookkeeping failed");
                }
            }
        }

        debug!(
            claimed = outcome.claimed_count,
            sent = outcome.processed_success,
            retries = outcome.scheduled_retries,
            failed = outcome.failed_final,
            "Delivery batch finished"
        );
        Ok(outcome)
    }

    async fn attempt(&self, notification: &Notification) -> Result<AttemptResult> {
        let attempt = notification.attempt_count + 1;

        let rule = match notification.rule_id {
            Some(id) => self.rules.get(id).await?,
            None => None,
        };
        let Some(rule) = rule else {
            self.notifications
                .mark_failed(notification.id, attempt, "notification rule no longer exists")
                .await?;
            return Ok(AttemptResult::Failed);
        };

        let Some(event) = self.events.get(notification.event_id).await? else {
            self.notifications
                .mark_failed(notification.id, attempt, "source event no longer exists")
                .await?;
            return Ok(AttemptResult::Failed);
        };

        let payload = delivery_payload(&event);
        match self
            .transport
            .deliver(&rule, &event.event_type, &payload)
            .await
        {
            Ok(()) => {
                self.notifications.mark_sent(notification.id).await?;
                debug!(notification_id = %notification.id, attempt, "Notification delivered");
                Ok(AttemptResult::Sent)
            }
            Err(e) => {
                let error = e.to_string();
                if attempt >= self.max_attempts {
                    warn!(notification_id = %notification.id, attempt, error = %error,
                          "Notification terminally failed");
                    self.notifications
                        .mark_failed(notification.id, attempt, &error)
                        .await?;
                    Ok(AttemptResult::Failed)
                } else {
                    let next = Utc::now()
                        + chrono::Duration::from_std(retry_delay(attempt))
                            .unwrap_or_else(|_| chrono::Duration::seconds(60));
                    self.notifications
                        .schedule_retry(notification.id, next, attempt, &error)
                        .await?;
                    Ok(AttemptResult::Retrying)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        MemEventRepository, MemNotificationRepository, MemRuleRepository, ScriptedTransport,
    };
    use comando_core::NotificationStatus;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn backoff_doubles_from_base_and_caps() {
        assert_eq!(backoff_secs(1), RETRY_BACKOFF_BASE_SECS);
        assert_eq!(backoff_secs(2), RETRY_BACKOFF_BASE_SECS * 2);
        assert_eq!(backoff_secs(3), RETRY_BACKOFF_BASE_SECS * 4);
        assert_eq!(backoff_secs(100), RETRY_BACKOFF_CAP_SECS);
        // Degenerate attempt numbers get the base delay.
        assert_eq!(backoff_secs(0), RETRY_BACKOFF_BASE_SECS);
        assert_eq!(backoff_secs(-3), RETRY_BACKOFF_BASE_SECS);
    }

    #[test]
    fn retry_delay_stays_within_jitter_bounds() {
        for attempt in 1..=6 {
            let secs = backoff_secs(attempt) as f64;
            for _ in 0..20 {
                let delay = retry_delay(attempt).as_secs() as f64;
                assert!(delay >= (secs * 0.8).floor() - 1.0, "attempt {}", attempt);
                assert!(delay <= (secs * 1.2).ceil() + 1.0, "attempt {}", attempt);
            }
        }
    }

    #[test]
    fn sign_payload_matches_known_vector() {
        let sig = sign_payload("shh", r#"{"a":1}"#).unwrap();
        assert_eq!(sig.len(), 64);
        // Stable across calls.
        assert_eq!(sig, sign_payload("shh", r#"{"a":1}"#).unwrap());
        // Secret changes the signature.
        assert_ne!(sig, sign_payload("other", r#"{"a":1}"#).unwrap());
    }

    #[test]
    fn delivery_payload_carries_event_fields() {
        let events = MemEventRepository::default();
        let tenant = Uuid::new_v4();
        let id = events.seed_pending(tenant, "order.placed", json!({"order_id": "7"}));
        let event = events.get_sync(id);

        let body = delivery_payload(&event);
        assert_eq!(body["event_type"], "order.placed");
        assert_eq!(body["payload"]["order_id"], "7");
        assert_eq!(body["tenant_id"], json!(tenant));
    }

    struct Fixture {
        events: Arc<MemEventRepository>,
        notifications: Arc<MemNotificationRepository>,
        rules: Arc<MemRuleRepository>,
        transport: Arc<ScriptedTransport>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                events: Arc::new(MemEventRepository::default()),
                notifications: Arc::new(MemNotificationRepository::default()),
                rules: Arc::new(MemRuleRepository::default()),
                transport: Arc::new(ScriptedTransport::default()),
            }
        }

        fn runner(&self) -> NotificationRunner {
            NotificationRunner::new(
                self.events.clone(),
                self.notifications.clone(),
                self.rules.clone(),
                self.transport.clone(),
            )
        }

        /// One due notification wired to a rule and event; returns its id.
        fn seed_due(&self, url: &str) -> Uuid {
            let tenant = Uuid::new_v4();
            let rule_id = self.rules.seed(tenant, url, vec!["order.placed"]);
            let event_id = self
                .events
                .seed_pending(tenant, "order.placed", json!({"order_id": "1"}));
            self.notifications.seed_due(event_id, rule_id, tenant)
        }
    }

    #[tokio::test]
    async fn successful_delivery_marks_sent() {
        let fx = Fixture::new();
        let id = fx.seed_due("https://hooks.example.com/ok");

        let outcome = fx.runner().run(50).await.unwrap();

        assert_eq!(outcome.claimed_count, 1);
        assert_eq!(outcome.processed_success, 1);
        assert_eq!(outcome.scheduled_retries, 0);
        assert_eq!(outcome.failed_final, 0);

        let n = fx.notifications.get_sync(id);
        assert_eq!(n.status, NotificationStatus::Sent);
        assert!(n.sent_at.is_some());
        assert_eq!(fx.transport.delivered_count(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_schedules_retry_with_future_attempt() {
        let fx = Fixture::new();
        let id = fx.seed_due("https://hooks.example.com/down");
        fx.transport.fail_url("https://hooks.example.com/down");

        let outcome = fx.runner().run(50).await.unwrap();

        assert_eq!(outcome.claimed_count, 1);
        assert_eq!(outcome.scheduled_retries, 1);
        let n = fx.notifications.get_sync(id);
        assert_eq!(n.status, NotificationStatus::Retrying);
        assert_eq!(n.attempt_count, 1);
        assert!(n.next_attempt_at > Utc::now());
        assert!(n.last_error.is_some());
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_terminally() {
        let fx = Fixture::new();
        let id = fx.seed_due("https://hooks.example.com/down");
        fx.transport.fail_url("https://hooks.example.com/down");
        fx.notifications.set_attempt_count(id, 4); // next attempt is the 5th

        let outcome = fx.runner().run(50).await.unwrap();

        assert_eq!(outcome.failed_final, 1);
        assert_eq!(outcome.scheduled_retries, 0);
        let n = fx.notifications.get_sync(id);
        assert_eq!(n.status, NotificationStatus::Failed);
        assert_eq!(n.attempt_count, 5);
    }

    #[tokio::test]
    async fn missing_rule_fails_without_delivery_attempt() {
        let fx = Fixture::new();
        let id = fx.seed_due("https://hooks.example.com/gone");
        fx.rules.clear();

        let outcome = fx.runner().run(50).await.unwrap();

        assert_eq!(outcome.failed_final, 1);
        assert_eq!(fx.transport.delivered_count(), 0);
        let n = fx.notifications.get_sync(id);
        assert_eq!(n.status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn not_due_notifications_are_not_claimed() {
        let fx = Fixture::new();
        let id = fx.seed_due("https://hooks.example.com/ok");
        fx.notifications
            .set_next_attempt(id, Utc::now() + chrono::Duration::minutes(10));

        let outcome = fx.runner().run(50).await.unwrap();
        assert_eq!(outcome.claimed_count, 0);
        assert_eq!(fx.transport.delivered_count(), 0);
    }
}
