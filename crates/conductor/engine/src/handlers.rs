//! One handler per lifecycle state.
//!
//! A handler runs the state's collaborator, applies its result to the
//! execution context and returns the guard's proposal. Routing and the
//! state swap happen afterwards in `Engine::transition`.

use crate::engine::{Engine, Proposal};
use conductor_scheduler::BatchRequest;
use conductor_trace::TraceEventType;
use conductor_types::{
    codes, AgentOutput, AgentRole, ExecutionPlan, GlobalState, LifecycleState, RollbackScope,
    StructuredError, SuggestedAction,
};
use serde_json::json;
use tracing::{debug, info, warn};

impl Engine {
    pub(crate) async fn run_handler(&mut self, global: &GlobalState) -> Proposal {
        use LifecycleState::*;

        match global.lifecycle_state() {
            Init => Proposal::to(ContextBuild),
            ContextBuild => self.build_context(global).await,
            PlanGeneration => self.generate_plan(global).await,
            PlanCheck => self.check_plan(global).await,
            ExecutionPrepare => self.prepare_execution(),
            StepExecution => self.execute_batch(global).await,
            StepReview => self.review_steps(global).await,
            GlobalReview => self.review_global(global).await,
            Replan => self.replan(global).await,
            Rollback => self.restore(global).await,
            // Handled before dispatch; never reached.
            WaitHuman | Completed | Failed => Proposal::to(global.lifecycle_state()),
        }
    }

    // ── Agent invocation ─────────────────────────────────────────────

    /// Run the agent registered for `role` under the agent timeout.
    ///
    /// Missing agents, panics, timeouts and outputs the agent itself
    /// rejects all come back as a failed [`AgentOutput`].
    pub(crate) async fn invoke_agent(&mut self, global: &GlobalState, role: AgentRole) -> AgentOutput {
        let (name, output) = match self.agents.get_by_role(role) {
            Ok(agent) => {
                let name = agent.name().to_string();
                let task_agent = agent.clone();
                let task_global = global.clone();
                let task_ctx = self.context.clone();
                let mut handle = tokio::spawn(async move {
                    task_agent.run(&task_global, &task_ctx, None).await
                });

                let output = match tokio::time::timeout(self.config.agent_timeout(), &mut handle).await {
                    Ok(Ok(output)) if agent.validate_output(&output) => output,
                    Ok(Ok(output)) => AgentOutput::failure(
                        role,
                        StructuredError::warning(
                            codes::INVALID_AGENT_OUTPUT,
                            format!("agent {} returned an output it does not accept", name),
                        )
                        .with_action(SuggestedAction::Replan)
                        .with_metadata("returned_role", json!(output.role)),
                    ),
                    Ok(Err(e)) => AgentOutput::failure(
                        role,
                        StructuredError::warning(codes::AGENT_PANIC, format!("agent {} panicked: {}", name, e))
                            .with_action(SuggestedAction::Replan),
                    ),
                    Err(_) => {
                        handle.abort();
                        AgentOutput::failure(
                            role,
                            StructuredError::warning(
                                codes::AGENT_TIMEOUT,
                                format!("agent {} timed out after {:?}", name, self.config.agent_timeout()),
                            )
                            .retryable(true)
                            .with_action(SuggestedAction::Retry),
                        )
                    }
                };
                (name, output)
            }
            Err(e) => (
                String::new(),
                AgentOutput::failure(
                    role,
                    StructuredError::critical(codes::AGENT_NOT_FOUND, e.to_string())
                        .with_action(SuggestedAction::Halt),
                ),
            ),
        };

        self.emit(
            global,
            TraceEventType::AgentDecision,
            json!({
                "agent": name,
                "role": role,
                "state": global.lifecycle_state(),
                "success": output.success,
                "confidence": output.confidence,
                "errors": output.errors,
            }),
        )
        .await;
        self.settle_output(global, &output).await;
        output
    }

    /// Fold an agent result into the failure counter and error log.
    ///
    /// A successful STEP_REVIEW reviewer leaves the counter alone. Only a
    /// clean batch or a successful agent in another state clears it.
    async fn settle_output(&mut self, global: &GlobalState, output: &AgentOutput) {
        if output.success {
            if global.lifecycle_state() != LifecycleState::StepReview {
                self.context.consecutive_failures = 0;
            }
            return;
        }
        self.context.consecutive_failures += 1;
        for error in &output.errors {
            self.record_error(global, error.clone()).await;
        }
    }

    // ── Planning ─────────────────────────────────────────────────────

    async fn build_context(&mut self, global: &GlobalState) -> Proposal {
        let output = self.invoke_agent(global, AgentRole::ContextBuilder).await;
        if !output.success {
            return Proposal::to(LifecycleState::Failed).with_output(output);
        }

        if let Some(data) = &output.data {
            self.context
                .intermediate_results
                .insert("context".to_string(), data.clone());
        }
        Proposal::to(LifecycleState::PlanGeneration).with_output(output)
    }

    async fn generate_plan(&mut self, global: &GlobalState) -> Proposal {
        let output = self.invoke_agent(global, AgentRole::Planner).await;
        if !output.success {
            return Proposal::to(LifecycleState::Replan).with_output(output);
        }

        let parsed = output
            .data
            .clone()
            .ok_or_else(|| "planner returned no data".to_string())
            .and_then(|data| serde_json::from_value::<ExecutionPlan>(data).map_err(|e| e.to_string()));

        match parsed {
            Ok(plan) => {
                info!(steps = plan.steps.len(), "Plan installed");
                self.context.install_plan(plan);
                Proposal::to(LifecycleState::PlanCheck).with_output(output)
            }
            Err(reason) => {
                let rejected = self.reject(
                    global,
                    AgentRole::Planner,
                    StructuredError::warning(codes::INVALID_PLAN, format!("unparseable plan: {}", reason))
                        .with_action(SuggestedAction::Replan),
                )
                .await;
                Proposal::to(LifecycleState::Replan).with_output(rejected)
            }
        }
    }

    async fn check_plan(&mut self, global: &GlobalState) -> Proposal {
        let verdict = match &self.context.current_plan {
            None => Err(StructuredError::warning(codes::NO_PLAN, "no plan installed")),
            Some(plan) => plan
                .validate_with_tools(|tool| self.tools.exists(tool))
                .map_err(|e| StructuredError::warning(codes::INVALID_PLAN, e.to_string())),
        };

        if let Err(error) = verdict {
            warn!(code = %error.code, reason = %error.message, "Plan rejected before critique");
            let rejected = self
                .reject(global, AgentRole::PlanCritic, error.with_action(SuggestedAction::Replan))
                .await;
            return Proposal::to(LifecycleState::Replan).with_output(rejected);
        }

        let output = self.invoke_agent(global, AgentRole::PlanCritic).await;
        let target = if output.success {
            LifecycleState::ExecutionPrepare
        } else {
            LifecycleState::Replan
        };
        Proposal::to(target).with_output(output)
    }

    /// A failed output produced by the engine on a collaborator's behalf.
    async fn reject(&mut self, global: &GlobalState, role: AgentRole, error: StructuredError) -> AgentOutput {
        let output = AgentOutput::failure(role, error);
        self.settle_output(global, &output).await;
        output
    }

    async fn replan(&mut self, global: &GlobalState) -> Proposal {
        let next = global.iteration_count() + 1;
        if next > self.config.max_iterations {
            self.record_error(
                global,
                StructuredError::critical(
                    codes::ITERATION_BUDGET_EXHAUSTED,
                    format!("plan iteration budget of {} exhausted", self.config.max_iterations),
                )
                .with_action(SuggestedAction::Halt),
            )
            .await;
            return Proposal::to(LifecycleState::Failed);
        }
        info!(iteration = next, "Replanning");
        Proposal::to(LifecycleState::PlanGeneration)
    }

    // ── Execution ────────────────────────────────────────────────────

    fn prepare_execution(&mut self) -> Proposal {
        let batch = self.scheduler.prepare_batch(&mut self.context);
        if batch.is_empty() {
            debug!("No dispatchable steps left");
            Proposal::to(LifecycleState::GlobalReview)
        } else {
            debug!(batch = ?batch, "Batch prepared");
            Proposal::to(LifecycleState::StepExecution)
        }
    }

    async fn execute_batch(&mut self, global: &GlobalState) -> Proposal {
        let cancel = self.rollback_handle.subscribe();
        let running = self.scheduler.mark_running(&mut self.context);
        debug!(steps = running, "Batch dispatched");
        let report = self
            .scheduler
            .run_batch(
                BatchRequest {
                    context: &self.context,
                    tools: &self.tools,
                    policy: self.policy.as_ref(),
                    tracer: self.tracer.as_ref(),
                    trace_id: global.trace_id(),
                },
                cancel,
            )
            .await;

        let before = self.context.errors.len();
        self.scheduler.apply_report(&mut self.context, &report);
        let fresh: Vec<StructuredError> = self.context.errors[before..].to_vec();
        for error in fresh {
            self.log_error(global, error).await;
        }

        if report.is_success() {
            self.context.consecutive_failures = 0;
        } else {
            self.context.consecutive_failures += 1;
        }
        info!(summary = %report.summary(), "Batch finished");

        let tool_result = report.failure_result().cloned();
        let proposal = match report.cancelled {
            Some(cancelled) => {
                let scope = self.rollback_handle.take().unwrap_or(cancelled);
                Proposal::rollback(scope)
            }
            None => Proposal::to(LifecycleState::StepReview),
        };
        self.last_report = Some(report);

        Proposal {
            tool_result,
            ..proposal
        }
    }

    async fn review_steps(&mut self, global: &GlobalState) -> Proposal {
        let output = self.invoke_agent(global, AgentRole::Reviewer).await;

        let mut failures: Vec<StructuredError> = output.errors.clone();
        if let Some(report) = self.last_report.take() {
            for outcome in report.failures() {
                let error = outcome
                    .result
                    .error
                    .clone()
                    .or_else(|| self.context.last_error_for(&outcome.step_id).cloned());
                failures.extend(error);
            }
        }

        let target = self.step_review_guard(&output, &failures);
        debug!(next = ?target, failures = failures.len(), "Step review");
        match target {
            Ok(state) => Proposal::to(state).with_output(output),
            Err(scope) => Proposal::rollback(scope).with_output(output),
        }
    }

    /// First matching review rule. `Err` carries a rollback scope.
    fn step_review_guard(
        &mut self,
        output: &AgentOutput,
        failures: &[StructuredError],
    ) -> Result<LifecycleState, RollbackScope> {
        let suggests = |action| failures.iter().any(|e| e.suggests(action));

        if suggests(SuggestedAction::Halt) {
            return Ok(LifecycleState::Failed);
        }
        if failures.iter().any(|e| e.is_critical() && !e.retryable) {
            return Err(RollbackScope::Global);
        }
        if suggests(SuggestedAction::Rollback) {
            return Err(RollbackScope::Local);
        }
        if failures.iter().any(StructuredError::is_locally_retryable) {
            if !self.scheduler.retry_batch(&mut self.context).is_empty() {
                return Ok(LifecycleState::StepExecution);
            }
            return Err(RollbackScope::Local);
        }
        if suggests(SuggestedAction::Replan) || (!output.success && failures.is_empty()) {
            return Ok(LifecycleState::Replan);
        }
        if self.context.has_status(conductor_types::StepStatus::Pending) {
            return Ok(LifecycleState::ExecutionPrepare);
        }
        Ok(LifecycleState::GlobalReview)
    }

    async fn review_global(&mut self, global: &GlobalState) -> Proposal {
        let output = self.invoke_agent(global, AgentRole::Reviewer).await;

        if output.success {
            let final_output = output
                .data
                .clone()
                .filter(|data| !data.is_null())
                .unwrap_or_else(|| json!(self.context.step_outputs()));
            self.final_output = Some(final_output);
            return Proposal::to(LifecycleState::Completed).with_output(output);
        }

        let suggests = |action| output.suggests(action);
        let proposal = if suggests(SuggestedAction::Halt) {
            Proposal::to(LifecycleState::Failed)
        } else if output.has_critical() {
            Proposal::rollback(RollbackScope::Global)
        } else if suggests(SuggestedAction::Rollback) {
            Proposal::rollback(RollbackScope::Local)
        } else if suggests(SuggestedAction::Replan) {
            Proposal::to(LifecycleState::Replan)
        } else if output.errors.iter().any(|e| e.retryable)
            && self.review_retries < self.config.max_review_retries
        {
            self.review_retries += 1;
            Proposal::to(LifecycleState::ExecutionPrepare)
        } else {
            Proposal::rollback(RollbackScope::Local)
        };
        proposal.with_output(output)
    }

    // ── Rollback ─────────────────────────────────────────────────────

    async fn restore(&mut self, global: &GlobalState) -> Proposal {
        if self.rollbacks >= self.config.max_rollbacks {
            self.record_error(
                global,
                StructuredError::critical(
                    codes::ROLLBACK_BUDGET_EXHAUSTED,
                    format!("rollback budget of {} exhausted", self.config.max_rollbacks),
                )
                .with_action(SuggestedAction::Halt),
            )
            .await;
            return Proposal::to(LifecycleState::Failed);
        }

        let requested = self.context.replan_scope.unwrap_or(RollbackScope::Local);
        let target = self
            .coordinator
            .snapshot_for(requested)
            .map(|id| (requested, id.clone()))
            .or_else(|| {
                self.coordinator
                    .snapshot_for(RollbackScope::Global)
                    .map(|id| (RollbackScope::Global, id.clone()))
            });
        let Some((scope, id)) = target else {
            return self
                .rollback_failed(global, format!("no snapshot for {} rollback", requested))
                .await;
        };
        if scope != requested {
            info!(requested = %requested, "No local snapshot, escalating to global rollback");
        }

        let record = match self.snapshots.fetch(&id).await {
            Ok(record) => record,
            Err(e) => return self.rollback_failed(global, e.to_string()).await,
        };
        let resume = match record.label.parse::<LifecycleState>() {
            Ok(state) => state,
            Err(e) => return self.rollback_failed(global, e).await,
        };

        self.context = record.execution_context;
        self.context.snapshot_id = Some(id.clone());
        self.coordinator.after_restore(scope);
        self.rollbacks += 1;
        self.last_report = None;

        self.emit(
            global,
            TraceEventType::SnapshotRestored,
            json!({
                "snapshot_id": id,
                "scope": scope,
                "label": record.label,
                "rollbacks": self.rollbacks,
            }),
        )
        .await;
        info!(snapshot_id = %id, scope = %scope, resume = %resume, "Rolled back");

        Proposal::to(resume)
    }

    async fn rollback_failed(&mut self, global: &GlobalState, reason: String) -> Proposal {
        self.record_error(
            global,
            StructuredError::critical(codes::ROLLBACK_FAILED, reason).with_action(SuggestedAction::Halt),
        )
        .await;
        Proposal::to(LifecycleState::Failed)
    }
}
