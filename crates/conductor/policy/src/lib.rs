//! Policy gate for the conductor engine
//!
//! Every proposed lifecycle transition is submitted to a [`Policy`] before
//! the engine produces a successor state. The gate is pure: it reads the
//! global state, the execution context and the collaborator's output, and
//! answers with a [`PolicyDecision`](conductor_types::PolicyDecision). It
//! never mutates anything itself.
//!
//! [`DefaultPolicy`] runs five ordered checks; the first failing check
//! decides:
//!
//! 1. consecutive failures against a threshold
//! 2. agent confidence against a minimum
//! 3. tool permission for the prepared batch
//! 4. CRITICAL errors reported by the collaborator
//! 5. error codes that keep turning up in recorded failure patterns

#![deny(unsafe_code)]

pub mod config;
pub mod default;
pub mod mocks;
pub mod permission;

pub use config::PolicyConfig;
pub use default::DefaultPolicy;
pub use permission::{check_tool_permission, PermissionCheck};

use conductor_memory::FailurePattern;
use conductor_registry::{Tool, ToolRegistry};
use conductor_types::{
    AgentOutput, AgentRole, ExecutionContext, GlobalState, PolicyDecision, ToolExecutionResult,
};

/// Everything the gate may look at when judging one transition.
#[derive(Clone, Copy)]
pub struct TransitionInput<'a> {
    pub global: &'a GlobalState,
    pub context: &'a ExecutionContext,
    pub agent_output: Option<&'a AgentOutput>,
    pub tool_result: Option<&'a ToolExecutionResult>,
    /// Tool lookup for permission checks on the prepared batch.
    pub tools: &'a ToolRegistry,
    /// Failure history from memory, oldest first.
    pub failure_patterns: &'a [FailurePattern],
}

/// Transition gate.
///
/// Implementations are swapped in at engine construction.
pub trait Policy: Send + Sync {
    fn evaluate_transition(&self, input: &TransitionInput<'_>) -> PolicyDecision;

    fn check_tool_permission(&self, role: AgentRole, tool: &dyn Tool) -> PermissionCheck;
}
