//! Scripted test doubles for agents and tools.
//!
//! Both doubles replay a queue of canned responses and fall back to a
//! fixed response once the queue is drained.

use crate::traits::{Agent, Tool};
use async_trait::async_trait;
use conductor_types::{
    AgentOutput, AgentRole, ExecutionContext, ExecutionPlan, GlobalState, PermissionLevel,
    StepContext, StructuredError, ToolExecutionResult,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ── Agents ───────────────────────────────────────────────────────────

/// Agent that replays scripted outputs.
pub struct ScriptedAgent {
    name: String,
    role: AgentRole,
    script: Mutex<VecDeque<AgentOutput>>,
    fallback: AgentOutput,
    delay: Option<Duration>,
    panics: bool,
    calls: AtomicUsize,
}

impl ScriptedAgent {
    /// Agent that always succeeds with `null` data.
    pub fn new(name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            name: name.into(),
            role,
            script: Mutex::new(VecDeque::new()),
            fallback: AgentOutput::success(role, Value::Null),
            delay: None,
            panics: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(name: impl Into<String>, role: AgentRole, data: Value) -> Self {
        Self::new(name, role).with_fallback(AgentOutput::success(role, data))
    }

    pub fn failing(name: impl Into<String>, role: AgentRole, error: StructuredError) -> Self {
        Self::new(name, role).with_fallback(AgentOutput::failure(role, error))
    }

    /// Planner that always proposes `plan`.
    pub fn planner(name: impl Into<String>, plan: &ExecutionPlan) -> Self {
        let data = serde_json::to_value(plan).unwrap_or_default();
        Self::succeeding(name, AgentRole::Planner, data)
    }

    /// Queue an output ahead of the fallback.
    pub fn then(self, output: AgentOutput) -> Self {
        self.script.lock().push_back(output);
        self
    }

    pub fn with_fallback(mut self, output: AgentOutput) -> Self {
        self.fallback = output;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> AgentRole {
        self.role
    }

    async fn run(
        &self,
        _global: &GlobalState,
        _ctx: &ExecutionContext,
        _step: Option<&StepContext>,
    ) -> AgentOutput {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics {
            panic!("scripted agent {} panicked", self.name);
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

// ── Tools ────────────────────────────────────────────────────────────

/// One scripted tool response.
#[derive(Clone, Debug)]
pub enum MockCall {
    Return(ToolExecutionResult),
    Delayed(Duration, ToolExecutionResult),
    Panic,
}

impl MockCall {
    pub fn ok(output: Value) -> Self {
        MockCall::Return(ToolExecutionResult::ok(output))
    }

    pub fn err(error: StructuredError) -> Self {
        MockCall::Return(ToolExecutionResult::err(error))
    }

    pub fn sleep_ms(ms: u64) -> Self {
        MockCall::Delayed(
            Duration::from_millis(ms),
            ToolExecutionResult::ok(Value::Null),
        )
    }
}

/// Tool that replays scripted responses. Without a script it echoes
/// its input back as output.
pub struct MockTool {
    name: String,
    version: String,
    permission: PermissionLevel,
    side_effect: bool,
    timeout_ms: u64,
    script: Mutex<VecDeque<MockCall>>,
    fallback: Option<MockCall>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<Value>>,
}

impl MockTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            permission: PermissionLevel::Public,
            side_effect: false,
            timeout_ms: 0,
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_permission(mut self, permission: PermissionLevel) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_side_effect(mut self, side_effect: bool) -> Self {
        self.side_effect = side_effect;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn then(self, call: MockCall) -> Self {
        self.script.lock().push_back(call);
        self
    }

    pub fn always(mut self, call: MockCall) -> Self {
        self.fallback = Some(call);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<Value> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    fn permission_level(&self) -> PermissionLevel {
        self.permission
    }

    fn has_side_effect(&self) -> bool {
        self.side_effect
    }

    async fn execute(&self, input: Value) -> ToolExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(input.clone());

        let call = self.script.lock().pop_front().or_else(|| self.fallback.clone());
        let result = match call {
            None => ToolExecutionResult::ok(input),
            Some(MockCall::Return(result)) => result,
            Some(MockCall::Delayed(delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            Some(MockCall::Panic) => panic!("mock tool {} panicked", self.name),
        };

        if result.success && self.side_effect {
            result.with_side_effect(true)
        } else {
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::codes;

    #[tokio::test]
    async fn scripted_agent_replays_then_falls_back() {
        let agent = ScriptedAgent::new("critic", AgentRole::PlanCritic).then(AgentOutput::failure(
            AgentRole::PlanCritic,
            StructuredError::warning(codes::INVALID_PLAN, "too vague"),
        ));
        let global = GlobalState::initial("goal");
        let ctx = ExecutionContext::new();

        assert!(!agent.run(&global, &ctx, None).await.success);
        assert!(agent.run(&global, &ctx, None).await.success);
        assert_eq!(agent.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_tool_echoes_by_default() {
        let tool = MockTool::new("echo");
        let result = tool.execute(serde_json::json!({"x": 1})).await;
        assert!(result.success);
        assert_eq!(result.output, Some(serde_json::json!({"x": 1})));
        assert_eq!(tool.inputs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mock_tool_scripted_sequence() {
        let tool = MockTool::new("flaky")
            .with_side_effect(true)
            .then(MockCall::err(StructuredError::warning("E", "first")))
            .then(MockCall::sleep_ms(10));

        assert!(!tool.execute(Value::Null).await.success);
        let second = tool.execute(Value::Null).await;
        assert!(second.success);
        assert!(second.side_effect_occurred);
        assert_eq!(tool.call_count(), 2);
    }
}
