//! Batch preparation over the step dependency graph.

use crate::report::BatchReport;
use crate::StepScheduler;
use conductor_types::{step_result_key, BatchId, ExecutionContext, StepStatus, StructuredError};
use serde_json::Value;
use tracing::debug;

/// How an upstream step constrains its dependents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Upstream {
    Satisfied,
    Waiting,
    /// Failed retryably with budget left: dependents stay PENDING.
    Held,
    /// SKIPPED, failed for good, or out of retries.
    Dead,
}

impl StepScheduler {
    /// Retries consumed so far: every dispatch after the first.
    fn retries_used(ctx: &ExecutionContext, step_id: &str) -> u32 {
        ctx.attempts(step_id).saturating_sub(1)
    }

    /// FAILED with a retryable error and retry budget left.
    pub fn can_retry(&self, ctx: &ExecutionContext, step_id: &str) -> bool {
        ctx.status(step_id) == Some(StepStatus::Failed)
            && ctx
                .last_error_for(step_id)
                .map(|e| e.retryable)
                .unwrap_or(false)
            && Self::retries_used(ctx, step_id) < self.config.max_retries
    }

    fn upstream(&self, ctx: &ExecutionContext, dep: &str) -> Upstream {
        match ctx.status(dep) {
            Some(StepStatus::Completed) => Upstream::Satisfied,
            Some(StepStatus::Skipped) | None => Upstream::Dead,
            Some(StepStatus::Failed) if self.can_retry(ctx, dep) => Upstream::Held,
            Some(StepStatus::Failed) => Upstream::Dead,
            Some(StepStatus::Pending) | Some(StepStatus::Running) => Upstream::Waiting,
        }
    }

    /// Propagate dead upstreams until nothing changes. Returns the ids
    /// newly marked SKIPPED, in plan order.
    pub fn propagate_skips(&self, ctx: &mut ExecutionContext) -> Vec<String> {
        let Some(plan) = ctx.current_plan.clone() else {
            return Vec::new();
        };
        let mut skipped = Vec::new();
        loop {
            let mut changed = false;
            for step in &plan.steps {
                if ctx.status(&step.id) != Some(StepStatus::Pending) {
                    continue;
                }
                let dead = step
                    .dependencies
                    .iter()
                    .any(|dep| self.upstream(ctx, dep) == Upstream::Dead);
                if dead {
                    ctx.active_steps.insert(step.id.clone(), StepStatus::Skipped);
                    debug!(step_id = %step.id, "Step skipped after upstream failure");
                    skipped.push(step.id.clone());
                    changed = true;
                }
            }
            if !changed {
                return skipped;
            }
        }
    }

    /// Compute the next batch and record it in `current_batch` under a
    /// fresh batch id. An empty batch means nothing is left to run.
    pub fn prepare_batch(&self, ctx: &mut ExecutionContext) -> Vec<String> {
        self.propagate_skips(ctx);

        let batch: Vec<String> = match ctx.current_plan.as_ref() {
            Some(plan) => plan
                .steps
                .iter()
                .filter(|step| match ctx.status(&step.id) {
                    Some(StepStatus::Pending) => step
                        .dependencies
                        .iter()
                        .all(|dep| self.upstream(ctx, dep) == Upstream::Satisfied),
                    Some(StepStatus::Failed) => self.can_retry(ctx, &step.id),
                    _ => false,
                })
                .map(|step| step.id.clone())
                .collect(),
            None => Vec::new(),
        };

        self.install_batch(ctx, batch)
    }

    /// Re-dispatch the current batch's retryable failures that still have
    /// budget. Dependents of those steps stay held.
    pub fn retry_batch(&self, ctx: &mut ExecutionContext) -> Vec<String> {
        let batch: Vec<String> = ctx
            .current_batch
            .iter()
            .filter(|id| self.can_retry(ctx, id))
            .cloned()
            .collect();
        self.install_batch(ctx, batch)
    }

    /// Mark every planned step of the current batch RUNNING. Called after
    /// the batch checkpoint, right before dispatch; `apply_report` moves
    /// each step on to its terminal status.
    pub fn mark_running(&self, ctx: &mut ExecutionContext) -> usize {
        let Some(plan) = ctx.current_plan.as_ref() else {
            return 0;
        };
        let ids: Vec<String> = ctx
            .current_batch
            .iter()
            .filter(|id| plan.step(id).is_some())
            .cloned()
            .collect();
        for id in &ids {
            ctx.active_steps.insert(id.clone(), StepStatus::Running);
        }
        ids.len()
    }

    fn install_batch(&self, ctx: &mut ExecutionContext, batch: Vec<String>) -> Vec<String> {
        ctx.current_batch_id = (!batch.is_empty()).then(BatchId::generate);
        ctx.current_batch = batch.clone();
        if let Some(id) = &ctx.current_batch_id {
            debug!(batch_id = %id, steps = ?batch, "Batch prepared");
        }
        batch
    }

    /// Fold a finished batch into the context: statuses, attempt counts,
    /// outputs under `step:<id>`, and one error per failed step.
    pub fn apply_report(&self, ctx: &mut ExecutionContext, report: &BatchReport) {
        for outcome in &report.outcomes {
            ctx.active_steps
                .insert(outcome.step_id.clone(), outcome.status);
            *ctx.step_attempts.entry(outcome.step_id.clone()).or_insert(0) += outcome.attempts;

            if outcome.is_completed() {
                let output = outcome.result.output.clone().unwrap_or(Value::Null);
                ctx.intermediate_results
                    .insert(step_result_key(&outcome.step_id), output);
            } else {
                let error = outcome.result.error.clone().unwrap_or_else(|| {
                    StructuredError::warning(
                        conductor_types::codes::TOOL_FAILED,
                        format!("step {} failed without an error", outcome.step_id),
                    )
                });
                ctx.errors
                    .push(error.with_metadata("step_id", outcome.step_id.as_str()));
            }
        }
    }
}
