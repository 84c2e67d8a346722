//! Conductor shared types
//!
//! Every other conductor crate speaks the vocabulary defined here:
//!
//! - [`GlobalState`]: immutable, one value per lifecycle revision
//! - [`ExecutionContext`]: the mutable unit of snapshot and rollback
//! - [`StepContext`]: ephemeral per-step scratch space, never persisted
//! - [`ExecutionPlan`] / [`PlanStep`]: the step dependency graph
//! - [`StructuredError`], [`PolicyDecision`], [`AgentOutput`],
//!   [`ToolExecutionResult`], [`EngineResult`]: the result and decision
//!   records exchanged across component boundaries
//!
//! # Three-tier state
//!
//! Only the engine produces successor [`GlobalState`] values and only the
//! engine mutates [`ExecutionContext`]. Concurrent step tasks write into
//! their own [`StepContext`] and report back over a channel.

#![deny(unsafe_code)]

pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod plan;
pub mod protocol;
pub mod state;

pub use error::{codes, Severity, StructuredError, SuggestedAction};
pub use ids::{BatchId, ExecutionId, SnapshotId, TraceId};
pub use lifecycle::LifecycleState;
pub use plan::{ExecutionPlan, PlanError, PlanResult, PlanStep};
pub use protocol::{
    AgentOutput, AgentRole, EngineResult, PermissionLevel, PolicyDecision, RiskLevel,
    ToolExecutionResult,
};
pub use state::{
    step_result_key, ExecutionContext, GlobalState, RollbackScope, StepContext, StepStatus,
};
