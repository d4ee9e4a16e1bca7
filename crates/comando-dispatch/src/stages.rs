//! In-process wiring of the two dispatch stages behind the orchestrator seam.

use async_trait::async_trait;

use comando_core::{DispatchStages, ProcessOutcome, Result, RunOutcome};

use crate::deliver::NotificationRunner;
use crate::process::EventProcessor;

/// `DispatchStages` implementation backed by the in-process stage services.
///
/// The stage HTTP endpoints stay exposed for external schedulers; the tick
/// orchestrator in the same binary goes through this instead of a loopback
/// HTTP hop.
pub struct LocalStages {
    processor: EventProcessor,
    runner: NotificationRunner,
}

impl LocalStages {
    pub fn new(processor: EventProcessor, runner: NotificationRunner) -> Self {
        Self { processor, runner }
    }
}

#[async_trait]
impl DispatchStages for LocalStages {
    async fn process_events(&self, limit: i64) -> Result<ProcessOutcome> {
        self.processor.run(limit).await
    }

    async fn run_notifications(&self, limit: i64) -> Result<RunOutcome> {
        self.runner.run(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        MemEventRepository, MemNotificationRepository, MemRuleRepository, ScriptedTransport,
    };
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn local_stages_run_both_phases_end_to_end() {
        let events = Arc::new(MemEventRepository::default());
        let notifications = Arc::new(MemNotificationRepository::default());
        let rules = Arc::new(MemRuleRepository::default());
        let transport = Arc::new(ScriptedTransport::default());

        let tenant = Uuid::new_v4();
        rules.seed(tenant, "https://hooks.example.com/orders", vec!["order.placed"]);
        events.seed_pending(tenant, "order.placed", json!({"order_id": "1"}));

        let stages = LocalStages::new(
            EventProcessor::new(events.clone(), notifications.clone(), rules.clone()),
            NotificationRunner::new(
                events.clone(),
                notifications.clone(),
                rules.clone(),
                transport.clone(),
            ),
        );

        let processed = stages.process_events(50).await.unwrap();
        assert_eq!(processed.processed_count, 1);
        assert_eq!(processed.notifications_created, 1);

        let delivered = stages.run_notifications(50).await.unwrap();
        assert_eq!(delivered.claimed_count, 1);
        assert_eq!(delivered.processed_success, 1);
        assert_eq!(transport.delivered_count(), 1);
    }
}
