//! In-memory repository and transport implementations for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use comando_core::{
    new_v7, CreateEventRequest, CreateRuleRequest, DeliveryTransport, Error, EventRepository,
    EventStatus, InboxEvent, MemberRole, MembershipRepository, Notification,
    NotificationRepository, NotificationRule, NotificationStatus, Result, RuleRepository,
};

/// A notification carrying the given status, for planning tests.
pub fn notification_with_status(status: NotificationStatus) -> Notification {
    let now = Utc::now();
    Notification {
        id: new_v7(),
        event_id: Uuid::new_v4(),
        rule_id: Some(Uuid::new_v4()),
        tenant_id: Uuid::new_v4(),
        status,
        next_attempt_at: now,
        attempt_count: 0,
        last_error: None,
        sent_at: (status == NotificationStatus::Sent).then_some(now),
        created_at: now,
        updated_at: now,
    }
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Default)]
pub struct MemEventRepository {
    inner: Mutex<HashMap<Uuid, InboxEvent>>,
}

impl MemEventRepository {
    pub fn seed_pending(&self, tenant_id: Uuid, event_type: &str, payload: JsonValue) -> Uuid {
        let id = new_v7();
        self.inner.lock().unwrap().insert(
            id,
            InboxEvent {
                id,
                tenant_id,
                event_type: event_type.to_string(),
                payload,
                occurred_at: Utc::now(),
                status: EventStatus::Pending,
                processing_error: None,
                processed_at: None,
            },
        );
        id
    }

    pub fn seed_settled(&self, tenant_id: Uuid, status: EventStatus, payload: JsonValue) -> Uuid {
        let id = self.seed_pending(tenant_id, "order.placed", payload);
        let mut inner = self.inner.lock().unwrap();
        let event = inner.get_mut(&id).unwrap();
        event.status = status;
        event.processed_at = Some(Utc::now());
        id
    }

    pub fn set_occurred_at(&self, id: Uuid, at: DateTime<Utc>) {
        self.inner.lock().unwrap().get_mut(&id).unwrap().occurred_at = at;
    }

    pub fn get_sync(&self, id: Uuid) -> InboxEvent {
        self.inner.lock().unwrap().get(&id).unwrap().clone()
    }

    pub fn pending_count_sync(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.status == EventStatus::Pending)
            .count()
    }
}

#[async_trait]
impl EventRepository for MemEventRepository {
    async fn insert(&self, req: CreateEventRequest) -> Result<Uuid> {
        Ok(self.seed_pending(req.tenant_id, &req.event_type, req.payload))
    }

    async fn get(&self, id: Uuid) -> Result<Option<InboxEvent>> {
        Ok(self.inner.lock().unwrap().get(&id).cloned())
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<InboxEvent>> {
        let inner = self.inner.lock().unwrap();
        let mut pending: Vec<InboxEvent> = inner
            .values()
            .filter(|e| e.status == EventStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|e| (e.occurred_at, e.id));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn try_settle(&self, id: Uuid, to: EventStatus, error: Option<&str>) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(&id) {
            Some(event) if event.status == EventStatus::Pending => {
                event.status = to;
                event.processing_error = error.map(String::from);
                event.processed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_error(&self, id: Uuid, error: &str) -> Result<()> {
        if let Some(event) = self.inner.lock().unwrap().get_mut(&id) {
            event.processing_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn reset_to_pending(&self, id: Uuid) -> Result<()> {
        if let Some(event) = self.inner.lock().unwrap().get_mut(&id) {
            event.status = EventStatus::Pending;
            event.processing_error = None;
            event.processed_at = None;
        }
        Ok(())
    }

    async fn list_settled_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<InboxEvent>> {
        let inner = self.inner.lock().unwrap();
        let mut settled: Vec<InboxEvent> = inner
            .values()
            .filter(|e| {
                e.tenant_id == tenant_id && e.status.is_settled() && e.occurred_at >= since
            })
            .cloned()
            .collect();
        settled.sort_by_key(|e| (e.occurred_at, e.id));
        Ok(settled)
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

#[derive(Default)]
pub struct MemNotificationRepository {
    inner: Mutex<HashMap<Uuid, Notification>>,
}

impl MemNotificationRepository {
    pub fn seed_due(&self, event_id: Uuid, rule_id: Uuid, tenant_id: Uuid) -> Uuid {
        let id = new_v7();
        let now = Utc::now();
        self.inner.lock().unwrap().insert(
            id,
            Notification {
                id,
                event_id,
                rule_id: Some(rule_id),
                tenant_id,
                status: NotificationStatus::Scheduled,
                next_attempt_at: now,
                attempt_count: 0,
                last_error: None,
                sent_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn seed_with_status(
        &self,
        event_id: Uuid,
        tenant_id: Uuid,
        status: NotificationStatus,
    ) -> Uuid {
        let id = self.seed_due(event_id, Uuid::new_v4(), tenant_id);
        let mut inner = self.inner.lock().unwrap();
        let n = inner.get_mut(&id).unwrap();
        n.status = status;
        if status == NotificationStatus::Sent {
            n.sent_at = Some(Utc::now());
        }
        id
    }

    pub fn set_attempt_count(&self, id: Uuid, count: i32) {
        self.inner.lock().unwrap().get_mut(&id).unwrap().attempt_count = count;
    }

    pub fn set_next_attempt(&self, id: Uuid, at: DateTime<Utc>) {
        self.inner.lock().unwrap().get_mut(&id).unwrap().next_attempt_at = at;
    }

    pub fn get_sync(&self, id: Uuid) -> Notification {
        self.inner.lock().unwrap().get(&id).unwrap().clone()
    }

    pub fn list_for_event_sync(&self, event_id: Uuid) -> Vec<Notification> {
        let inner = self.inner.lock().unwrap();
        let mut list: Vec<Notification> = inner
            .values()
            .filter(|n| n.event_id == event_id)
            .cloned()
            .collect();
        list.sort_by_key(|n| (n.created_at, n.id));
        list
    }
}

#[async_trait]
impl NotificationRepository for MemNotificationRepository {
    async fn create(&self, event: &InboxEvent, rule: &NotificationRule) -> Result<Uuid> {
        Ok(self.seed_due(event.id, rule.id, event.tenant_id))
    }

    async fn claim_due(&self, limit: i64) -> Result<Vec<Notification>> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        let mut due: Vec<Uuid> = inner
            .values()
            .filter(|n| {
                matches!(
                    n.status,
                    NotificationStatus::Scheduled | NotificationStatus::Retrying
                ) && n.next_attempt_at <= now
            })
            .map(|n| n.id)
            .collect();
        due.sort();
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            let n = inner.get_mut(&id).unwrap();
            n.status = NotificationStatus::Sending;
            n.updated_at = now;
            claimed.push(n.clone());
        }
        Ok(claimed)
    }

    async fn mark_sent(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(n) = inner.get_mut(&id) {
            if n.status != NotificationStatus::Sent {
                n.status = NotificationStatus::Sent;
                n.sent_at = Some(Utc::now());
                n.last_error = None;
            }
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        attempt_count: i32,
        error: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(n) = inner.get_mut(&id) {
            if n.status != NotificationStatus::Sent {
                n.status = NotificationStatus::Retrying;
                n.next_attempt_at = next_attempt_at;
                n.attempt_count = attempt_count;
                n.last_error = Some(error.to_string());
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempt_count: i32, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(n) = inner.get_mut(&id) {
            if n.status != NotificationStatus::Sent {
                n.status = NotificationStatus::Failed;
                n.attempt_count = attempt_count;
                n.last_error = Some(error.to_string());
            }
        }
        Ok(())
    }

    async fn list_for_event(&self, event_id: Uuid) -> Result<Vec<Notification>> {
        Ok(self.list_for_event_sync(event_id))
    }

    async fn reset_for_replay(&self, ids: &[Uuid]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut touched = 0;
        for id in ids {
            if let Some(n) = inner.get_mut(id) {
                if n.status != NotificationStatus::Sent {
                    n.status = NotificationStatus::Scheduled;
                    n.next_attempt_at = Utc::now();
                    n.attempt_count = 0;
                    n.last_error = None;
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    async fn accelerate(&self, ids: &[Uuid]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut touched = 0;
        for id in ids {
            if let Some(n) = inner.get_mut(id) {
                if n.status == NotificationStatus::Scheduled {
                    n.next_attempt_at = Utc::now();
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }
}

// =============================================================================
// RULES
// =============================================================================

#[derive(Default)]
pub struct MemRuleRepository {
    inner: Mutex<HashMap<Uuid, NotificationRule>>,
    fail_next: AtomicBool,
}

impl MemRuleRepository {
    pub fn seed(&self, tenant_id: Uuid, url: &str, event_types: Vec<&str>) -> Uuid {
        let id = new_v7();
        let now = Utc::now();
        self.inner.lock().unwrap().insert(
            id,
            NotificationRule {
                id,
                tenant_id,
                url: url.to_string(),
                secret: None,
                event_types: event_types.into_iter().map(String::from).collect(),
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// The next `list_active_for_event` call fails.
    pub fn fail_next_lookup(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleRepository for MemRuleRepository {
    async fn create(&self, req: CreateRuleRequest) -> Result<Uuid> {
        let id = self.seed(req.tenant_id, &req.url, vec![]);
        let mut inner = self.inner.lock().unwrap();
        let rule = inner.get_mut(&id).unwrap();
        rule.secret = req.secret;
        rule.event_types = req.event_types;
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRule>> {
        Ok(self.inner.lock().unwrap().get(&id).cloned())
    }

    async fn list_active_for_event(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<NotificationRule>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Internal("scripted rule lookup failure".to_string()));
        }
        let inner = self.inner.lock().unwrap();
        let mut rules: Vec<NotificationRule> = inner
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.is_active && r.matches(event_type))
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        if let Some(rule) = self.inner.lock().unwrap().get_mut(&id) {
            rule.is_active = active;
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.inner.lock().unwrap().remove(&id);
        Ok(())
    }
}

// =============================================================================
// MEMBERSHIPS
// =============================================================================

#[derive(Default)]
pub struct MemMembershipRepository {
    inner: Mutex<HashMap<(Uuid, Uuid), MemberRole>>,
}

impl MemMembershipRepository {
    pub fn seed(&self, tenant_id: Uuid, user_id: Uuid, role: MemberRole) {
        self.inner.lock().unwrap().insert((tenant_id, user_id), role);
    }
}

#[async_trait]
impl MembershipRepository for MemMembershipRepository {
    async fn role_for(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<MemberRole>> {
        Ok(self.inner.lock().unwrap().get(&(tenant_id, user_id)).copied())
    }

    async fn upsert(&self, tenant_id: Uuid, user_id: Uuid, role: MemberRole) -> Result<()> {
        self.seed(tenant_id, user_id, role);
        Ok(())
    }
}

// =============================================================================
// DELIVERY TRANSPORT
// =============================================================================

#[derive(Default)]
pub struct ScriptedTransport {
    delivered: Mutex<Vec<(String, String)>>,
    failures: Mutex<HashSet<String>>,
}

impl ScriptedTransport {
    /// Deliveries to this URL fail from now on.
    pub fn fail_url(&self, url: &str) {
        self.failures.lock().unwrap().insert(url.to_string());
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliveryTransport for ScriptedTransport {
    async fn deliver(
        &self,
        rule: &NotificationRule,
        event_type: &str,
        _payload: &JsonValue,
    ) -> Result<()> {
        if self.failures.lock().unwrap().contains(&rule.url) {
            return Err(Error::Delivery("endpoint returned 503".to_string()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((rule.url.clone(), event_type.to_string()));
        Ok(())
    }
}
