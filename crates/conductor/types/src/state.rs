//! The three state tiers: global, execution, step

use crate::{BatchId, ExecutionId, ExecutionPlan, LifecycleState, SnapshotId, StructuredError, TraceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

// ── Global State ─────────────────────────────────────────────────────

/// Immutable task-level state. One value per lifecycle revision.
///
/// Fields are private: a value is never edited, the engine builds a
/// successor with [`GlobalState::successor`] and swaps it in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    execution_id: ExecutionId,
    original_goal: String,
    lifecycle_state: LifecycleState,
    iteration_count: u32,
    trace_id: TraceId,
    created_at: DateTime<Utc>,
    revision: u64,
}

impl GlobalState {
    /// The INIT revision of a fresh task.
    pub fn initial(goal: impl Into<String>) -> Self {
        Self {
            execution_id: ExecutionId::generate(),
            original_goal: goal.into(),
            lifecycle_state: LifecycleState::Init,
            iteration_count: 0,
            trace_id: TraceId::generate(),
            created_at: Utc::now(),
            revision: 0,
        }
    }

    /// Build the next revision. Identity fields carry over unchanged.
    pub fn successor(&self, lifecycle_state: LifecycleState, iteration_count: u32) -> Self {
        Self {
            execution_id: self.execution_id.clone(),
            original_goal: self.original_goal.clone(),
            lifecycle_state,
            iteration_count,
            trace_id: self.trace_id.clone(),
            created_at: self.created_at,
            revision: self.revision + 1,
        }
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn original_goal(&self) -> &str {
        &self.original_goal
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle_state
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Monotonic revision number; 0 for the INIT value.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

// ── Step Status ──────────────────────────────────────────────────────

/// PENDING → RUNNING → {COMPLETED | FAILED | SKIPPED}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

// ── Rollback Scope ───────────────────────────────────────────────────

/// How far a rollback reaches back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackScope {
    /// Undo the current step batch.
    Local,
    /// Undo everything since the current plan iteration started.
    Global,
}

impl std::fmt::Display for RollbackScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackScope::Local => f.write_str("LOCAL"),
            RollbackScope::Global => f.write_str("GLOBAL"),
        }
    }
}

impl std::str::FromStr for RollbackScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(RollbackScope::Local),
            "GLOBAL" => Ok(RollbackScope::Global),
            other => Err(format!("unknown rollback scope: {}", other)),
        }
    }
}

// ── Execution Context ────────────────────────────────────────────────

/// The mutable unit of snapshot and rollback.
///
/// Owned by the engine and mutated only inside a transition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    pub current_plan: Option<ExecutionPlan>,
    #[serde(default)]
    pub active_steps: BTreeMap<String, StepStatus>,
    #[serde(default)]
    pub current_batch_id: Option<BatchId>,
    #[serde(default)]
    pub replan_scope: Option<RollbackScope>,
    #[serde(default)]
    pub intermediate_results: BTreeMap<String, Value>,
    #[serde(default)]
    pub errors: Vec<StructuredError>,
    #[serde(default)]
    pub snapshot_id: Option<SnapshotId>,
    /// Step ids of the prepared (or running) batch.
    #[serde(default)]
    pub current_batch: Vec<String>,
    /// Dispatch attempts per step, local retries included.
    #[serde(default)]
    pub step_attempts: BTreeMap<String, u32>,
    #[serde(default)]
    pub consecutive_failures: u32,
    /// ADMIN tools a human has approved for this task.
    #[serde(default)]
    pub approved_tools: BTreeSet<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh plan: every step PENDING, batch bookkeeping cleared.
    pub fn install_plan(&mut self, plan: ExecutionPlan) {
        self.active_steps = plan
            .steps
            .iter()
            .map(|s| (s.id.clone(), StepStatus::Pending))
            .collect();
        self.current_plan = Some(plan);
        self.current_batch.clear();
        self.current_batch_id = None;
        self.step_attempts.clear();
    }

    pub fn status(&self, step_id: &str) -> Option<StepStatus> {
        self.active_steps.get(step_id).copied()
    }

    pub fn attempts(&self, step_id: &str) -> u32 {
        self.step_attempts.get(step_id).copied().unwrap_or(0)
    }

    pub fn has_status(&self, status: StepStatus) -> bool {
        self.active_steps.values().any(|s| *s == status)
    }

    pub fn steps_with(&self, status: StepStatus) -> Vec<String> {
        self.active_steps
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Most recent error recorded for a step.
    pub fn last_error_for(&self, step_id: &str) -> Option<&StructuredError> {
        self.errors.iter().rev().find(|e| e.step_id() == Some(step_id))
    }

    pub fn has_error_code(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    /// Output of every COMPLETED step, keyed by step id.
    pub fn step_outputs(&self) -> BTreeMap<String, Value> {
        self.active_steps
            .iter()
            .filter(|(_, status)| **status == StepStatus::Completed)
            .filter_map(|(id, _)| {
                self.intermediate_results
                    .get(&step_result_key(id))
                    .map(|v| (id.clone(), v.clone()))
            })
            .collect()
    }
}

/// Key under which a step's output lives in `intermediate_results`.
pub fn step_result_key(step_id: &str) -> String {
    format!("step:{}", step_id)
}

// ── Step Context ─────────────────────────────────────────────────────

/// Ephemeral scratch space for one dispatched step.
///
/// Deliberately not serializable: it is never persisted or snapshotted.
#[derive(Clone, Debug, PartialEq)]
pub struct StepContext {
    pub step_id: String,
    pub tool_input: Value,
    pub tool_output: Option<Value>,
    pub validation_flags: BTreeMap<String, bool>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl StepContext {
    pub fn new(step_id: impl Into<String>, tool_input: Value) -> Self {
        Self {
            step_id: step_id.into(),
            tool_input,
            tool_output: None,
            validation_flags: BTreeMap::new(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn finish(&mut self, output: Option<Value>) {
        self.tool_output = output;
        self.end_time = Some(Utc::now());
    }

    pub fn elapsed_ms(&self) -> u64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds().max(0) as u64
    }
}
