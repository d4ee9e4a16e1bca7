//! Tick orchestrator: runs the two dispatch stages across bounded passes.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, instrument, warn};

use comando_core::defaults::{
    INTER_PASS_DELAY_SECS, STAGE_BUDGET_SECS, TICK_MAX_PASSES, TICK_PASSES, TICK_PROCESS_LIMIT,
    TICK_RUN_LIMIT,
};
use comando_core::{DispatchStages, PassRecord, TickSummary, TickTotals};

/// Configuration for one tick invocation.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Number of stage passes to run.
    pub passes: u32,
    /// Batch limit handed to the event-processing stage.
    pub process_limit: i64,
    /// Batch limit handed to the notification-delivery stage.
    pub run_limit: i64,
    /// Fixed delay between passes. Spaces passes roughly 30 seconds apart
    /// assuming ~5s of stage work, so a 1-minute cron invoking a 2-pass
    /// tick approximates a 30s polling cadence.
    pub inter_pass_delay: Duration,
    /// Wall-clock allowance per pass for the two stage calls combined,
    /// used in the tick budget.
    pub stage_budget: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            passes: TICK_PASSES,
            process_limit: TICK_PROCESS_LIMIT,
            run_limit: TICK_RUN_LIMIT,
            inter_pass_delay: Duration::from_secs(INTER_PASS_DELAY_SECS),
            stage_budget: Duration::from_secs(STAGE_BUDGET_SECS),
        }
    }
}

impl TickConfig {
    /// Set the pass count, clamped to a sane range.
    pub fn with_passes(mut self, passes: u32) -> Self {
        self.passes = passes.clamp(1, TICK_MAX_PASSES);
        self
    }

    /// Set the event-processing batch limit.
    pub fn with_process_limit(mut self, limit: i64) -> Self {
        self.process_limit = limit.max(1);
        self
    }

    /// Set the delivery batch limit.
    pub fn with_run_limit(mut self, limit: i64) -> Self {
        self.run_limit = limit.max(1);
        self
    }

    /// Maximum wall clock one invocation may consume:
    /// `passes × (stage_budget + inter_pass_delay)`. A slow downstream
    /// stage ends the tick explicitly instead of tripping an external
    /// execution limit.
    pub fn max_wall_clock(&self) -> Duration {
        (self.stage_budget + self.inter_pass_delay) * self.passes
    }
}

/// Orchestrates the dispatch stages for one tick invocation.
///
/// Purely a delegator: never reads or writes event/notification rows.
/// A failing stage is counted and the tick moves on, so one stage's
/// outage neither blocks the other stage nor later passes.
pub struct TickRunner {
    stages: Arc<dyn DispatchStages>,
    config: TickConfig,
}

impl TickRunner {
    pub fn new(stages: Arc<dyn DispatchStages>, config: TickConfig) -> Self {
        Self { stages, config }
    }

    /// Run the configured passes and return the aggregated summary.
    #[instrument(skip(self), fields(subsystem = "dispatch", component = "tick"))]
    pub async fn run(&self) -> TickSummary {
        let started_at = Utc::now();
        let start = Instant::now();
        let budget = self.config.max_wall_clock();

        let mut totals = TickTotals::default();
        let mut passes: Vec<PassRecord> = Vec::with_capacity(self.config.passes as usize);
        let mut truncated = false;

        for pass in 1..=self.config.passes {
            if pass > 1 {
                if start.elapsed() + self.config.inter_pass_delay >= budget {
                    warn!(
                        pass,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        budget_ms = budget.as_millis() as u64,
                        "Tick wall-clock budget exhausted, ending early"
                    );
                    truncated = true;
                    break;
                }
                sleep(self.config.inter_pass_delay).await;
            }

            let mut record = PassRecord {
                pass,
                ..Default::default()
            };

            match self.stages.process_events(self.config.process_limit).await {
                Ok(outcome) => {
                    record.events = outcome;
                    totals.events.absorb(outcome);
                }
                Err(e) => {
                    warn!(pass, error = %e, "Event-processing stage failed");
                    record.process_failed = true;
                    totals.process_errors += 1;
                }
            }

            match self.stages.run_notifications(self.config.run_limit).await {
                Ok(outcome) => {
                    record.notifications = outcome;
                    totals.notifications.absorb(outcome);
                }
                Err(e) => {
                    warn!(pass, error = %e, "Notification-delivery stage failed");
                    record.run_failed = true;
                    totals.run_errors += 1;
                }
            }

            passes.push(record);
        }

        let summary = TickSummary {
            started_at,
            finished_at: Utc::now(),
            passes_requested: self.config.passes,
            passes_executed: passes.len() as u32,
            truncated,
            totals,
            passes,
        };

        info!(
            passes = summary.passes_executed,
            truncated = summary.truncated,
            processed = summary.totals.events.processed_count,
            sent = summary.totals.notifications.processed_success,
            process_errors = summary.totals.process_errors,
            run_errors = summary.totals.run_errors,
            duration_ms = start.elapsed().as_millis() as u64,
            "Tick finished"
        );
        summary
    }
}
