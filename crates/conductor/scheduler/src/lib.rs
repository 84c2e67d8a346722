//! Step scheduler for conductor plans
//!
//! The scheduler turns an [`ExecutionPlan`](conductor_types::ExecutionPlan)
//! into successive parallel batches:
//!
//! 1. [`StepScheduler::prepare_batch`] propagates upstream failures
//!    (SKIPPED or held PENDING) and collects every dispatchable step.
//! 2. [`StepScheduler::run_batch`] runs the batch concurrently, one task
//!    per step, each under its own timeout and fresh `StepContext`.
//! 3. [`StepScheduler::apply_report`] folds the [`BatchReport`] back into
//!    the execution context.
//!
//! Batch N+1 is never prepared before batch N is fully terminal. Step
//! tasks never touch the execution context; they report over a channel
//! and the engine applies the result.

#![deny(unsafe_code)]

pub mod config;
pub mod executor;
pub mod prepare;
pub mod report;

pub use config::SchedulerConfig;
pub use executor::{BatchRequest, CancelSignal};
pub use report::{BatchReport, StepOutcome};

use std::time::Duration;

/// Dependency-aware batch scheduler.
#[derive(Clone, Debug, Default)]
pub struct StepScheduler {
    config: SchedulerConfig,
}

impl StepScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Timeout for one attempt: step override, then the tool's own
    /// timeout when set, then the configured default.
    pub fn effective_timeout(&self, step_timeout_ms: Option<u64>, tool_timeout_ms: u64) -> Duration {
        let ms = step_timeout_ms
            .or((tool_timeout_ms > 0).then_some(tool_timeout_ms))
            .unwrap_or(self.config.default_timeout_ms);
        Duration::from_millis(ms)
    }
}
