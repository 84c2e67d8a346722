use async_trait::async_trait;
use conductor_types::{
    AgentOutput, AgentRole, ExecutionContext, GlobalState, PermissionLevel, StepContext,
    ToolExecutionResult,
};
use serde_json::Value;

/// A cognitive collaborator bound to one role.
///
/// Agents read the global state and execution context but never write
/// them; everything they want to change travels back in [`AgentOutput`].
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique registration name.
    fn name(&self) -> &str;

    fn role(&self) -> AgentRole;

    /// Perform one reasoning pass.
    ///
    /// Failures are reported through `AgentOutput::errors`, not panics.
    /// The engine still converts a panic or a timeout into a structured
    /// error, but a well-behaved agent never relies on that.
    async fn run(
        &self,
        global: &GlobalState,
        ctx: &ExecutionContext,
        step: Option<&StepContext>,
    ) -> AgentOutput;

    /// Reject outputs that do not belong to this agent or are malformed.
    fn validate_output(&self, output: &AgentOutput) -> bool {
        output.role == self.role() && (0.0..=1.0).contains(&output.confidence)
    }
}

/// An executable tool invoked by plan steps.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn input_schema(&self) -> Value {
        Value::Null
    }

    fn output_schema(&self) -> Value {
        Value::Null
    }

    /// Tool-level timeout; 0 defers to the scheduler default.
    fn timeout_ms(&self) -> u64 {
        0
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Public
    }

    /// Non-idempotent tools are never force-cancelled and never retried
    /// after a timeout.
    fn has_side_effect(&self) -> bool {
        false
    }

    /// Run the tool. Must catch its own failures and report them as a
    /// structured error in the result.
    async fn execute(&self, input: Value) -> ToolExecutionResult;
}
