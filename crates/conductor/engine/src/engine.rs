//! Engine facade: owns the three state tiers and drives the lifecycle.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::lifecycle;
use crate::rollback::RollbackHandle;
use conductor_memory::{LocalMemory, Memory};
use conductor_policy::{DefaultPolicy, Policy, TransitionInput};
use conductor_registry::{Agent, AgentRegistry, RegistryError, Tool, ToolRegistry};
use conductor_scheduler::{BatchReport, StepScheduler};
use conductor_snapshot::{
    InMemorySnapshotStore, JsonFileSnapshotStore, SnapshotCoordinator, SnapshotManager,
    SnapshotStore,
};
use conductor_trace::{MemoryTracer, TraceEventType, Tracer};
use conductor_types::{
    codes, EngineResult, ExecutionContext, GlobalState, LifecycleState, PolicyDecision,
    RiskLevel, RollbackScope, StructuredError, SuggestedAction,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// What a state handler hands to the policy gate and the router.
#[derive(Debug)]
pub(crate) struct Proposal {
    pub target: LifecycleState,
    pub agent_output: Option<conductor_types::AgentOutput>,
    pub tool_result: Option<conductor_types::ToolExecutionResult>,
    /// Rollback scope the guard asked for, if it proposed ROLLBACK.
    pub scope: Option<RollbackScope>,
}

impl Proposal {
    pub fn to(target: LifecycleState) -> Self {
        Self {
            target,
            agent_output: None,
            tool_result: None,
            scope: None,
        }
    }

    pub fn rollback(scope: RollbackScope) -> Self {
        Self::to(LifecycleState::Rollback).with_scope(scope)
    }

    pub fn with_scope(mut self, scope: RollbackScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_output(mut self, output: conductor_types::AgentOutput) -> Self {
        self.agent_output = Some(output);
        self
    }
}

/// The orchestration engine. One instance governs one task.
///
/// Only this type produces successor [`GlobalState`] values and only it
/// mutates the [`ExecutionContext`]. Every method that advances the
/// lifecycle takes `&mut self`, so transitions are serialized.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) agents: AgentRegistry,
    pub(crate) tools: ToolRegistry,
    pub(crate) policy: Arc<dyn Policy>,
    pub(crate) memory: Arc<dyn Memory>,
    pub(crate) tracer: Arc<dyn Tracer>,
    pub(crate) snapshots: SnapshotManager,
    pub(crate) scheduler: StepScheduler,
    pub(crate) coordinator: SnapshotCoordinator,
    pub(crate) rollback_handle: RollbackHandle,

    pub(crate) global: Option<GlobalState>,
    pub(crate) context: ExecutionContext,

    /// Report of the last executed batch, read by STEP_REVIEW.
    pub(crate) last_report: Option<BatchReport>,
    /// Every error recorded during the run; survives rollbacks.
    pub(crate) error_log: Vec<StructuredError>,
    pub(crate) rollbacks: u32,
    pub(crate) review_retries: u32,
    /// State that requested the current WAIT_HUMAN pause.
    pub(crate) wait_origin: Option<LifecycleState>,
    pub(crate) wait_started_at: Option<Instant>,
    /// Tools the last denying decision blocked.
    pub(crate) blocked_tools: BTreeSet<String>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) final_output: Option<Value>,
}

/// Builder for [`Engine`]; every collaborator defaults to its in-process
/// implementation.
pub struct EngineBuilder {
    config: EngineConfig,
    agents: AgentRegistry,
    tools: ToolRegistry,
    policy: Option<Arc<dyn Policy>>,
    memory: Option<Arc<dyn Memory>>,
    tracer: Option<Arc<dyn Tracer>>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
}

impl EngineBuilder {
    pub fn agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    pub fn build(self) -> Engine {
        let config = self.config;
        let policy = self
            .policy
            .unwrap_or_else(|| Arc::new(DefaultPolicy::new(config.policy.clone())));
        let store = self
            .snapshot_store
            .unwrap_or_else(|| Arc::new(InMemorySnapshotStore::new()));

        Engine {
            scheduler: StepScheduler::new(config.scheduler.clone()),
            snapshots: SnapshotManager::new(store).with_ttl(config.snapshot.ttl()),
            agents: self.agents,
            tools: self.tools,
            policy,
            memory: self.memory.unwrap_or_else(|| Arc::new(LocalMemory::default())),
            tracer: self.tracer.unwrap_or_else(|| Arc::new(MemoryTracer::new())),
            coordinator: SnapshotCoordinator::new(),
            rollback_handle: RollbackHandle::new(),
            global: None,
            context: ExecutionContext::new(),
            last_report: None,
            error_log: Vec::new(),
            rollbacks: 0,
            review_retries: 0,
            wait_origin: None,
            wait_started_at: None,
            blocked_tools: BTreeSet::new(),
            started_at: None,
            final_output: None,
            config,
        }
    }
}

impl Engine {
    /// Engine with in-process defaults for every collaborator.
    pub fn new(config: EngineConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            agents: AgentRegistry::new(),
            tools: ToolRegistry::new(),
            policy: None,
            memory: None,
            tracer: None,
            snapshot_store: None,
        }
    }

    /// Like [`Engine::new`], but snapshots go to `config.snapshot.dir`
    /// when it is set.
    pub async fn from_config(config: EngineConfig) -> Result<Self> {
        let mut builder = Self::builder(config.clone());
        if let Some(dir) = &config.snapshot.dir {
            let store = JsonFileSnapshotStore::open(dir).await?;
            builder = builder.snapshot_store(Arc::new(store));
        }
        Ok(builder.build())
    }

    // ── Wiring ───────────────────────────────────────────────────────

    pub fn register_agent(&mut self, agent: Arc<dyn Agent>) -> Result<()> {
        self.agents.register(agent).map_err(|e| match e {
            RegistryError::DuplicateName(name) => EngineError::DuplicateName(name),
            other => EngineError::Registry(other),
        })
    }

    /// Re-registering a tool name replaces the earlier tool.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.register(tool);
    }

    pub fn set_policy(&mut self, policy: Arc<dyn Policy>) {
        self.policy = policy;
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn global_state(&self) -> Option<&GlobalState> {
        self.global.as_ref()
    }

    pub fn state(&self) -> Option<LifecycleState> {
        self.global.as_ref().map(GlobalState::lifecycle_state)
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn tracer(&self) -> &Arc<dyn Tracer> {
        &self.tracer
    }

    pub fn memory(&self) -> &Arc<dyn Memory> {
        &self.memory
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn coordinator(&self) -> &SnapshotCoordinator {
        &self.coordinator
    }

    /// Handle for requesting a rollback while a batch is running.
    pub fn rollback_handle(&self) -> RollbackHandle {
        self.rollback_handle.clone()
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Start the task and drive it until it completes, fails or waits
    /// for a human.
    #[instrument(skip(self, user_input))]
    pub async fn start(&mut self, user_input: impl Into<String>) -> Result<EngineResult> {
        if let Some(state) = self.state().filter(|s| !s.is_terminal()) {
            return Err(EngineError::InvalidState {
                expected: LifecycleState::Init,
                actual: state,
            });
        }

        self.reset();
        let global = GlobalState::initial(user_input);
        info!(
            execution_id = %global.execution_id(),
            trace_id = %global.trace_id(),
            "Task started"
        );
        self.global = Some(global);
        self.started_at = Some(Instant::now());

        self.drive().await
    }

    /// Apply one lifecycle transition and return the new state.
    ///
    /// Terminal states are returned unchanged. WAIT_HUMAN is left only
    /// through feedback, a rollback, or the configured wait timeout.
    pub async fn transition(&mut self) -> Result<LifecycleState> {
        let global = self.global.clone().ok_or(EngineError::NotStarted)?;
        let from = global.lifecycle_state();
        if from.is_terminal() {
            return Ok(from);
        }
        if from == LifecycleState::WaitHuman {
            return Ok(self.check_wait_timeout(&global).await);
        }

        let proposal = match self.take_rollback_request(from) {
            Some(scope) => {
                info!(scope = %scope, state = %from, "Operator rollback");
                Proposal::rollback(scope)
            }
            None => self.run_handler(&global).await,
        };

        let patterns = self.memory.failure_patterns().await;
        let decision = self.policy.evaluate_transition(&TransitionInput {
            global: &global,
            context: &self.context,
            agent_output: proposal.agent_output.as_ref(),
            tool_result: proposal.tool_result.as_ref(),
            tools: &self.tools,
            failure_patterns: &patterns,
        });
        self.record_decision(&global, &decision, proposal.target).await;

        let target = lifecycle::route(&decision, proposal.target);
        if target == LifecycleState::Rollback {
            let scope = if decision.risk_level == RiskLevel::Critical {
                RollbackScope::Global
            } else {
                proposal.scope.unwrap_or(RollbackScope::Local)
            };
            self.context.replan_scope = Some(scope);
        }

        Ok(self.commit(&global, target, decision.reason.clone()).await)
    }

    /// Record human feedback and resume from WAIT_HUMAN.
    #[instrument(skip(self, feedback))]
    pub async fn submit_human_feedback(
        &mut self,
        feedback: impl Into<String>,
    ) -> Result<EngineResult> {
        let global = self.global.clone().ok_or(EngineError::NotStarted)?;
        let state = global.lifecycle_state();
        if state != LifecycleState::WaitHuman {
            return Err(EngineError::InvalidState {
                expected: LifecycleState::WaitHuman,
                actual: state,
            });
        }

        let feedback = feedback.into();
        let origin = self.wait_origin.take().unwrap_or(LifecycleState::PlanGeneration);
        let approved = matches!(
            feedback.trim().to_ascii_lowercase().as_str(),
            "approve" | "approved"
        );
        if approved {
            let tools = std::mem::take(&mut self.blocked_tools);
            self.context.approved_tools.extend(tools);
        }

        let entry = json!({
            "feedback": feedback,
            "origin": origin,
            "approved": approved,
            "at": chrono::Utc::now(),
        });
        match self
            .context
            .intermediate_results
            .entry("human_feedback".to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => items.push(entry.clone()),
            other => *other = Value::Array(vec![entry.clone()]),
        }
        self.context.consecutive_failures = 0;
        self.emit(&global, TraceEventType::HumanInteraction, entry).await;

        let target = lifecycle::resume_after_wait(origin);
        if target == LifecycleState::StepExecution && origin != LifecycleState::ExecutionPrepare {
            // The batch already ran: resume with what still needs running.
            if self.scheduler.retry_batch(&mut self.context).is_empty() {
                self.scheduler.prepare_batch(&mut self.context);
            }
        }
        info!(origin = %origin, resume = %target, approved, "Human feedback received");
        self.commit(&global, target, Some("human feedback".to_string()))
            .await;

        self.drive().await
    }

    /// Restore the snapshot for `scope` and resume.
    #[instrument(skip(self))]
    pub async fn rollback(&mut self, scope: RollbackScope) -> Result<EngineResult> {
        let global = self.global.clone().ok_or(EngineError::NotStarted)?;
        let state = global.lifecycle_state();
        if !lifecycle::is_allowed(state, LifecycleState::Rollback) {
            return Err(EngineError::InvalidState {
                expected: LifecycleState::Rollback,
                actual: state,
            });
        }
        if self.coordinator.snapshot_for(scope).is_none() {
            return Err(EngineError::NoSnapshot(scope));
        }

        self.wait_origin = None;
        self.context.replan_scope = Some(scope);
        self.commit(&global, LifecycleState::Rollback, Some(format!("{} rollback requested", scope)))
            .await;

        self.drive().await
    }

    /// Current outcome of the task.
    pub fn result(&self) -> Result<EngineResult> {
        let global = self.global.as_ref().ok_or(EngineError::NotStarted)?;
        let state = global.lifecycle_state();
        Ok(EngineResult {
            success: state == LifecycleState::Completed,
            final_output: self.final_output.clone(),
            trace_id: global.trace_id().clone(),
            state,
            errors: self.error_log.clone(),
            total_latency_ms: self
                .started_at
                .map(|t| t.elapsed().as_millis() as u64),
        })
    }

    // ── Drive loop ───────────────────────────────────────────────────

    fn reset(&mut self) {
        self.global = None;
        self.context = ExecutionContext::new();
        self.coordinator = SnapshotCoordinator::new();
        self.rollback_handle.take();
        self.last_report = None;
        self.error_log.clear();
        self.rollbacks = 0;
        self.review_retries = 0;
        self.wait_origin = None;
        self.wait_started_at = None;
        self.blocked_tools.clear();
        self.final_output = None;
    }

    async fn drive(&mut self) -> Result<EngineResult> {
        loop {
            let state = self.transition().await?;
            if state.is_suspended() {
                break;
            }
        }
        let result = self.result()?;
        info!(
            trace_id = %result.trace_id,
            state = %result.state,
            success = result.success,
            errors = result.errors.len(),
            "Drive loop paused"
        );
        Ok(result)
    }

    /// A pending operator request, if `from` can act on it.
    ///
    /// States without a ROLLBACK edge leave the request pending for a
    /// later state. A request with no snapshot for its scope is dropped.
    fn take_rollback_request(&mut self, from: LifecycleState) -> Option<RollbackScope> {
        if !lifecycle::is_allowed(from, LifecycleState::Rollback) {
            if let Some(scope) = self.rollback_handle.pending() {
                debug!(scope = %scope, state = %from, "Rollback request deferred");
            }
            return None;
        }
        let scope = self.rollback_handle.take()?;
        if self.coordinator.snapshot_for(scope).is_none() {
            warn!(scope = %scope, state = %from, "Rollback request dropped, no snapshot for scope");
            return None;
        }
        Some(scope)
    }

    async fn check_wait_timeout(&mut self, global: &GlobalState) -> LifecycleState {
        let expired = match (self.config.human_wait_timeout(), self.wait_started_at) {
            (Some(limit), Some(since)) => since.elapsed() >= limit,
            _ => false,
        };
        if !expired {
            return LifecycleState::WaitHuman;
        }

        warn!("Human wait timed out");
        self.record_error(
            global,
            StructuredError::critical(codes::HUMAN_TIMEOUT, "no human feedback before timeout")
                .with_action(SuggestedAction::Halt),
        )
        .await;
        self.wait_origin = None;
        self.commit(global, LifecycleState::Failed, Some("human wait timed out".into()))
            .await
    }

    /// Apply `target`: table check, snapshot, bookkeeping, successor and
    /// the STATE_TRANSITION event.
    async fn commit(
        &mut self,
        global: &GlobalState,
        target: LifecycleState,
        reason: Option<String>,
    ) -> LifecycleState {
        let from = global.lifecycle_state();
        let mut target = target;

        if !lifecycle::is_allowed(from, target) {
            self.record_error(
                global,
                StructuredError::critical(
                    codes::ILLEGAL_TRANSITION,
                    format!("{} -> {} is not a lifecycle edge", from, target),
                )
                .with_action(SuggestedAction::Halt),
            )
            .await;
            target = LifecycleState::Failed;
        }

        if lifecycle::takes_snapshot(from, target) {
            if let Err(e) = self.checkpoint(global, target).await {
                self.record_error(
                    global,
                    StructuredError::critical(codes::SNAPSHOT_FAILED, e.to_string())
                        .with_action(SuggestedAction::Halt),
                )
                .await;
                target = LifecycleState::Failed;
            }
        }

        if target != LifecycleState::Completed {
            self.final_output = None;
        }
        match target {
            LifecycleState::ExecutionPrepare => self.coordinator.open_batch_window(),
            LifecycleState::WaitHuman => {
                self.wait_origin = Some(from);
                self.wait_started_at = Some(Instant::now());
            }
            LifecycleState::Rollback | LifecycleState::Failed => {
                self.remember_failure(global, target).await;
            }
            _ => {}
        }

        let iteration = if from == LifecycleState::Replan && target == LifecycleState::PlanGeneration {
            global.iteration_count() + 1
        } else {
            global.iteration_count()
        };
        let next = global.successor(target, iteration);

        self.emit(
            global,
            TraceEventType::StateTransition,
            json!({
                "from": from,
                "to": target,
                "iteration_count": iteration,
                "revision": next.revision(),
                "reason": reason,
            }),
        )
        .await;
        info!(
            trace_id = %global.trace_id(),
            from = %from,
            to = %target,
            iteration,
            "State transition"
        );

        self.global = Some(next);
        target
    }

    async fn checkpoint(
        &mut self,
        global: &GlobalState,
        label: LifecycleState,
    ) -> std::result::Result<(), conductor_snapshot::SnapshotError> {
        let id = self.snapshots.create_snapshot(&self.context, label.as_str()).await?;
        self.context.snapshot_id = Some(id.clone());
        self.coordinator.record(id.clone(), label);
        self.emit(
            global,
            TraceEventType::SnapshotCreated,
            json!({ "snapshot_id": id, "label": label }),
        )
        .await;
        Ok(())
    }

    // ── Recording helpers ────────────────────────────────────────────

    async fn record_decision(
        &mut self,
        global: &GlobalState,
        decision: &PolicyDecision,
        proposal: LifecycleState,
    ) {
        self.emit(
            global,
            TraceEventType::PolicyEvaluation,
            json!({
                "state": global.lifecycle_state(),
                "proposal": proposal,
                "decision": decision,
            }),
        )
        .await;

        if !decision.allow {
            let reason = decision.reason.clone().unwrap_or_else(|| "denied".into());
            self.record_error(
                global,
                StructuredError::warning(codes::POLICY_DENIED, reason)
                    .with_metadata("risk_level", json!(decision.risk_level)),
            )
            .await;
        }
        self.blocked_tools = decision.blocked_tools.clone();
        for tool in &decision.blocked_tools {
            self.record_error(
                global,
                StructuredError::warning(
                    codes::PERMISSION_DENIED,
                    format!("tool {} blocked by policy", tool),
                )
                .with_metadata("tool", tool.as_str()),
            )
            .await;
        }
    }

    /// Append to the context's errors and the run's error log.
    pub(crate) async fn record_error(&mut self, global: &GlobalState, error: StructuredError) {
        self.context.errors.push(error.clone());
        self.log_error(global, error).await;
    }

    /// Error log and trace only; for errors already in the context.
    pub(crate) async fn log_error(&mut self, global: &GlobalState, error: StructuredError) {
        debug!(code = %error.code, severity = ?error.severity, "Error recorded");
        self.emit(global, TraceEventType::ErrorOccurred, json!(error)).await;
        self.error_log.push(error);
    }

    async fn remember_failure(&self, global: &GlobalState, target: LifecycleState) {
        let recent: Vec<&str> = self
            .context
            .errors
            .iter()
            .rev()
            .take(5)
            .map(|e| e.code.as_str())
            .collect();
        self.memory
            .record_failure_pattern(json!({
                "goal": global.original_goal(),
                "from": global.lifecycle_state(),
                "to": target,
                "iteration_count": global.iteration_count(),
                "scope": self.context.replan_scope,
                "recent_errors": recent,
            }))
            .await;
    }

    pub(crate) async fn emit(&self, global: &GlobalState, event_type: TraceEventType, payload: Value) {
        if let Err(e) = self
            .tracer
            .record_event(event_type, payload, global.trace_id())
            .await
        {
            warn!(error = %e, event = %event_type, "Failed to record trace event");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("agents", &self.agents.len())
            .field("tools", &self.tools.len())
            .field("rollbacks", &self.rollbacks)
            .finish_non_exhaustive()
    }
}
