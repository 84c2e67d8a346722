//! Concurrent batch execution.
//!
//! One tokio task per step. Tasks report attempt starts and finishes over
//! an mpsc channel; this loop is the only place that emits tool trace
//! events. A rollback request arriving on the cancel signal aborts pure
//! steps and waits for side-effecting ones.

use crate::report::{BatchReport, StepOutcome};
use crate::StepScheduler;
use conductor_policy::{PermissionCheck, Policy};
use conductor_registry::{Tool, ToolRegistry};
use conductor_trace::{TraceEventType, Tracer};
use conductor_types::{
    codes, AgentRole, ExecutionContext, RollbackScope, StepContext, StepStatus, StructuredError,
    SuggestedAction, ToolExecutionResult, TraceId,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Receiving side of a rollback request. `None` until a scope is requested.
pub type CancelSignal = watch::Receiver<Option<RollbackScope>>;

/// Collaborators one batch run needs.
#[derive(Clone, Copy)]
pub struct BatchRequest<'a> {
    pub context: &'a ExecutionContext,
    pub tools: &'a ToolRegistry,
    pub policy: &'a dyn Policy,
    pub tracer: &'a dyn Tracer,
    pub trace_id: &'a TraceId,
}

enum StepEvent {
    Started {
        step_id: String,
        tool: String,
        attempt: u32,
    },
    Finished {
        step_id: String,
        attempt: u32,
        result: ToolExecutionResult,
    },
}

/// Everything a step task owns.
struct StepTask {
    step_id: String,
    tool: Arc<dyn Tool>,
    input: Value,
    timeout: Duration,
    /// Dispatches made for this step before this batch.
    prior_attempts: u32,
    /// Extra attempts allowed inside this batch.
    local_retries: u32,
    backoff: Duration,
}

struct Running {
    step_id: String,
    side_effect: bool,
    handle: JoinHandle<StepOutcome>,
}

/// Aborts the wrapped task when dropped, so cancelling a step task also
/// stops the tool call it is awaiting.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl StepScheduler {
    /// Run `context.current_batch` to completion (or cancellation).
    ///
    /// Returns once every dispatched step has reached a terminal outcome.
    #[instrument(skip_all, fields(batch_id = ?req.context.current_batch_id))]
    pub async fn run_batch(&self, req: BatchRequest<'_>, mut cancel: CancelSignal) -> BatchReport {
        let ctx = req.context;
        let mut report = BatchReport {
            batch_id: ctx.current_batch_id.clone(),
            ..Default::default()
        };
        let Some(plan) = ctx.current_plan.as_ref() else {
            return report;
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut running: Vec<Running> = Vec::new();
        let mut refused: Vec<StepOutcome> = Vec::new();

        for step_id in &ctx.current_batch {
            let Some(step) = plan.step(step_id) else {
                continue;
            };
            let tool = match self.admit(&req, &step.tool_name) {
                Ok(tool) => tool,
                Err(error) => {
                    warn!(step_id = %step.id, code = %error.code, "Step refused at dispatch");
                    refused.push(StepOutcome {
                        step_id: step.id.clone(),
                        status: StepStatus::Failed,
                        result: ToolExecutionResult::err(error),
                        attempts: 0,
                    });
                    continue;
                }
            };

            let prior_attempts = ctx.attempts(&step.id);
            // This dispatch is itself a retry unless it is the first one.
            let retries_after_dispatch = prior_attempts;
            let task = StepTask {
                step_id: step.id.clone(),
                input: step.input_schema.clone(),
                timeout: self.effective_timeout(step.timeout_ms, tool.timeout_ms()),
                prior_attempts,
                local_retries: self
                    .config
                    .local_retries
                    .min(self.config.max_retries.saturating_sub(retries_after_dispatch)),
                backoff: Duration::from_millis(self.config.retry_backoff_ms),
                tool: tool.clone(),
            };
            running.push(Running {
                step_id: step.id.clone(),
                side_effect: tool.has_side_effect(),
                handle: tokio::spawn(run_step(task, tx.clone())),
            });
        }
        drop(tx);

        let mut started: HashMap<String, u32> = HashMap::new();
        let mut watching = true;
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.trace_event(&req, &mut started, event).await,
                    None => break,
                },
                changed = cancel.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let requested = *cancel.borrow_and_update();
                    if let Some(scope) = requested {
                        info!(scope = %scope, "Rollback requested, cancelling batch");
                        report.cancelled = Some(scope);
                        watching = false;
                        for task in running.iter().filter(|t| !t.side_effect) {
                            task.handle.abort();
                        }
                    }
                }
            }
        }

        let mut outcomes: HashMap<String, StepOutcome> = refused
            .into_iter()
            .map(|o| (o.step_id.clone(), o))
            .collect();
        for task in running {
            let outcome = match task.handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => StepOutcome {
                    step_id: task.step_id.clone(),
                    status: StepStatus::Failed,
                    result: ToolExecutionResult::err(
                        StructuredError::warning(
                            codes::STEP_CANCELLED,
                            format!("step {} cancelled by rollback", task.step_id),
                        )
                        .retryable(true)
                        .with_action(SuggestedAction::Retry),
                    ),
                    attempts: started.get(&task.step_id).copied().unwrap_or(0),
                },
                Err(e) => StepOutcome {
                    step_id: task.step_id.clone(),
                    status: StepStatus::Failed,
                    result: ToolExecutionResult::err(panic_error(&task.step_id, &e.to_string())),
                    attempts: started.get(&task.step_id).copied().unwrap_or(1),
                },
            };
            outcomes.insert(task.step_id, outcome);
        }

        // Plan order, not completion order.
        report.outcomes = ctx
            .current_batch
            .iter()
            .filter_map(|id| outcomes.remove(id))
            .collect();

        debug!(
            success = report.is_success(),
            failed = report.failures().count(),
            "Batch finished"
        );
        report
    }

    /// Tool lookup plus the dispatch-time permission check.
    fn admit(&self, req: &BatchRequest<'_>, tool_name: &str) -> Result<Arc<dyn Tool>, StructuredError> {
        let tool = req.tools.get(tool_name).ok_or_else(|| {
            StructuredError::warning(codes::TOOL_NOT_FOUND, format!("unknown tool {}", tool_name))
                .with_action(SuggestedAction::Replan)
        })?;
        if req.context.approved_tools.contains(tool_name) {
            return Ok(tool);
        }
        match req.policy.check_tool_permission(AgentRole::StepExecutor, tool.as_ref()) {
            PermissionCheck::Allowed => Ok(tool),
            check => Err(StructuredError::warning(
                codes::PERMISSION_DENIED,
                format!("tool {} not permitted ({:?})", tool_name, check),
            )
            .with_action(SuggestedAction::Replan)
            .with_metadata("tool", tool_name)),
        }
    }

    async fn trace_event(
        &self,
        req: &BatchRequest<'_>,
        started: &mut HashMap<String, u32>,
        event: StepEvent,
    ) {
        let batch_id = &req.context.current_batch_id;
        let (event_type, payload) = match event {
            StepEvent::Started {
                step_id,
                tool,
                attempt,
            } => {
                started.insert(step_id.clone(), attempt);
                (
                    TraceEventType::ToolCallStart,
                    json!({ "step_id": step_id, "tool": tool, "attempt": attempt, "batch_id": batch_id }),
                )
            }
            StepEvent::Finished {
                step_id,
                attempt,
                result,
            } => (
                TraceEventType::ToolCallEnd,
                json!({
                    "step_id": step_id,
                    "attempt": attempt,
                    "batch_id": batch_id,
                    "success": result.success,
                    "latency_ms": result.latency_ms,
                    "error": result.error.as_ref().map(|e| e.code.as_str()),
                }),
            ),
        };
        if let Err(e) = req.tracer.record_event(event_type, payload, req.trace_id).await {
            warn!(error = %e, "Failed to record tool event");
        }
    }
}

/// Body of one step task: attempts with local retries.
async fn run_step(task: StepTask, tx: mpsc::UnboundedSender<StepEvent>) -> StepOutcome {
    let max_attempts = 1 + task.local_retries;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let number = task.prior_attempts + attempt;
        let mut step_ctx = StepContext::new(task.step_id.clone(), task.input.clone());
        let _ = tx.send(StepEvent::Started {
            step_id: task.step_id.clone(),
            tool: task.tool.name().to_string(),
            attempt: number,
        });

        let result = execute_once(&task, &step_ctx).await;
        step_ctx.finish(result.output.clone());
        let result = match result.latency_ms {
            Some(_) => result,
            None => result.with_latency(step_ctx.elapsed_ms()),
        };

        let _ = tx.send(StepEvent::Finished {
            step_id: task.step_id.clone(),
            attempt: number,
            result: result.clone(),
        });

        if result.success {
            return StepOutcome {
                step_id: task.step_id,
                status: StepStatus::Completed,
                result,
                attempts: attempt,
            };
        }

        let retry_here = attempt < max_attempts
            && result
                .error
                .as_ref()
                .map(StructuredError::is_locally_retryable)
                .unwrap_or(false);
        if !retry_here {
            return StepOutcome {
                step_id: task.step_id,
                status: StepStatus::Failed,
                result,
                attempts: attempt,
            };
        }

        debug!(step_id = %task.step_id, attempt = number, "Retrying step locally");
        if !task.backoff.is_zero() {
            tokio::time::sleep(task.backoff).await;
        }
    }
}

/// One tool call under the step timeout. Panics and timeouts become
/// structured errors.
async fn execute_once(task: &StepTask, step_ctx: &StepContext) -> ToolExecutionResult {
    let tool = task.tool.clone();
    let input = step_ctx.tool_input.clone();
    let mut call = AbortOnDrop(tokio::spawn(async move { tool.execute(input).await }));

    match tokio::time::timeout(task.timeout, &mut call.0).await {
        Ok(Ok(result)) if !result.success && result.error.is_none() => {
            ToolExecutionResult::err(StructuredError::warning(
                codes::TOOL_FAILED,
                format!("tool {} failed without an error", task.tool.name()),
            ))
        }
        Ok(Ok(result)) => result,
        Ok(Err(e)) => ToolExecutionResult::err(panic_error(&task.step_id, &e.to_string())),
        Err(_) => {
            let side_effect = task.tool.has_side_effect();
            let error = StructuredError::warning(
                codes::STEP_TIMEOUT,
                format!(
                    "step {} timed out after {}ms",
                    task.step_id,
                    task.timeout.as_millis()
                ),
            )
            .with_metadata("side_effect", side_effect);
            // Non-idempotent tools are never re-run after a timeout.
            let error = if side_effect {
                error.retryable(false).with_action(SuggestedAction::Replan)
            } else {
                error.retryable(true).with_action(SuggestedAction::Retry)
            };
            ToolExecutionResult::err(error)
        }
    }
}

fn panic_error(step_id: &str, detail: &str) -> StructuredError {
    StructuredError::warning(codes::TOOL_PANIC, format!("tool for step {} panicked: {}", step_id, detail))
        .with_action(SuggestedAction::Replan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SchedulerConfig;
    use conductor_policy::DefaultPolicy;
    use conductor_registry::mocks::{MockCall, MockTool};
    use conductor_trace::MemoryTracer;
    use conductor_types::{ExecutionPlan, PermissionLevel, PlanStep};

    struct Harness {
        ctx: ExecutionContext,
        tools: ToolRegistry,
        policy: DefaultPolicy,
        tracer: MemoryTracer,
        trace_id: TraceId,
        scheduler: StepScheduler,
    }

    impl Harness {
        fn new(plan: ExecutionPlan) -> Self {
            let mut ctx = ExecutionContext::new();
            ctx.install_plan(plan);
            Self {
                ctx,
                tools: ToolRegistry::new(),
                policy: DefaultPolicy::default(),
                tracer: MemoryTracer::new(),
                trace_id: TraceId::generate(),
                scheduler: StepScheduler::new(SchedulerConfig {
                    default_timeout_ms: 100,
                    ..Default::default()
                }),
            }
        }

        fn tool(&mut self, tool: Arc<MockTool>) {
            self.tools.register(tool);
        }

        async fn run(&mut self) -> BatchReport {
            let (_tx, rx) = watch::channel(None);
            self.run_with(rx).await
        }

        async fn run_with(&mut self, cancel: CancelSignal) -> BatchReport {
            self.scheduler.prepare_batch(&mut self.ctx);
            let report = self
                .scheduler
                .run_batch(
                    BatchRequest {
                        context: &self.ctx,
                        tools: &self.tools,
                        policy: &self.policy,
                        tracer: &self.tracer,
                        trace_id: &self.trace_id,
                    },
                    cancel,
                )
                .await;
            self.scheduler.apply_report(&mut self.ctx, &report);
            report
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pure_timeout_retries_locally() {
        let mut h = Harness::new(ExecutionPlan::new("g").with_step(PlanStep::new("a", "flaky")));
        let flaky = Arc::new(
            MockTool::new("flaky")
                .then(MockCall::sleep_ms(500))
                .then(MockCall::ok(json!("done"))),
        );
        h.tool(flaky.clone());

        let report = h.run().await;
        assert!(report.is_success());
        assert_eq!(report.outcomes[0].attempts, 2);
        assert_eq!(flaky.call_count(), 2);
        assert_eq!(h.ctx.attempts("a"), 2);
        assert_eq!(h.tracer.count(&h.trace_id, TraceEventType::ToolCallStart), 2);
        assert_eq!(h.tracer.count(&h.trace_id, TraceEventType::ToolCallEnd), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn side_effect_timeout_is_not_retried() {
        let mut h = Harness::new(ExecutionPlan::new("g").with_step(PlanStep::new("w", "write")));
        let write = Arc::new(
            MockTool::new("write")
                .with_side_effect(true)
                .always(MockCall::sleep_ms(500)),
        );
        h.tool(write.clone());

        let report = h.run().await;
        let error = report.outcomes[0].result.error.clone().unwrap();
        assert_eq!(error.code, codes::STEP_TIMEOUT);
        assert!(!error.retryable);
        assert!(error.suggests(SuggestedAction::Replan));
        assert_eq!(write.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_tool_becomes_structured_failure() {
        let mut h = Harness::new(ExecutionPlan::new("g").with_step(PlanStep::new("p", "bomb")));
        h.tool(Arc::new(MockTool::new("bomb").always(MockCall::Panic)));

        let report = h.run().await;
        assert_eq!(report.outcomes[0].status, StepStatus::Failed);
        assert_eq!(h.ctx.last_error_for("p").unwrap().code, codes::TOOL_PANIC);
    }

    #[tokio::test]
    async fn admin_tool_refused_without_approval() {
        let mut h = Harness::new(ExecutionPlan::new("g").with_step(PlanStep::new("d", "deploy")));
        let deploy = Arc::new(MockTool::new("deploy").with_permission(PermissionLevel::Admin));
        h.tool(deploy.clone());

        let report = h.run().await;
        assert_eq!(
            report.outcomes[0].result.error.as_ref().unwrap().code,
            codes::PERMISSION_DENIED
        );
        assert_eq!(deploy.call_count(), 0);

        h.ctx.approved_tools.insert("deploy".into());
        h.ctx.active_steps.insert("d".into(), StepStatus::Pending);
        assert!(h.run().await.is_success());
        assert_eq!(deploy.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_aborts_pure_steps_and_waits_for_side_effects() {
        let mut h = Harness::new(
            ExecutionPlan::new("g")
                .with_step(PlanStep::new("pure", "slow").with_timeout_ms(10_000))
                .with_step(PlanStep::new("effect", "charge").with_timeout_ms(10_000)),
        );
        let slow = Arc::new(MockTool::new("slow").always(MockCall::sleep_ms(5_000)));
        let charge = Arc::new(
            MockTool::new("charge")
                .with_side_effect(true)
                .always(MockCall::sleep_ms(1_000)),
        );
        h.tool(slow);
        h.tool(charge.clone());

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(Some(RollbackScope::Local));
            // Keep the sender alive until the batch is done.
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let report = h.run_with(rx).await;
        assert_eq!(report.cancelled, Some(RollbackScope::Local));

        let pure = report.outcome("pure").unwrap();
        assert_eq!(pure.result.error.as_ref().unwrap().code, codes::STEP_CANCELLED);
        assert!(pure.result.error.as_ref().unwrap().retryable);

        let effect = report.outcome("effect").unwrap();
        assert!(effect.is_completed());
        assert!(effect.result.side_effect_occurred);
        assert_eq!(charge.call_count(), 1);
    }
}
