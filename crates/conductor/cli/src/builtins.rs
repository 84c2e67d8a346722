//! Built-in agents and tools for `conductor run`.
//!
//! The agents are deliberately thin: the context builder echoes the
//! goal, the planner returns the plan file verbatim and the critic and
//! reviewer approve everything. They exist so a plan can be exercised
//! end to end without any model behind it.

use async_trait::async_trait;
use conductor_engine::Engine;
use conductor_registry::{Agent, Tool};
use conductor_types::{
    codes, AgentOutput, AgentRole, ExecutionContext, ExecutionPlan, GlobalState,
    PermissionLevel, StepContext, StructuredError, SuggestedAction, ToolExecutionResult,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Register every built-in agent and tool on `engine`.
pub fn install(engine: &mut Engine, plan: ExecutionPlan) -> conductor_engine::Result<()> {
    engine.register_agent(Arc::new(GoalEcho))?;
    engine.register_agent(Arc::new(StaticPlanner { plan }))?;
    engine.register_agent(Arc::new(Approver::new("approve-plan", AgentRole::PlanCritic)))?;
    engine.register_agent(Arc::new(Approver::new("approve-results", AgentRole::Reviewer)))?;

    engine.register_tool(Arc::new(EchoTool));
    engine.register_tool(Arc::new(SleepTool));
    engine.register_tool(Arc::new(WriteFileTool));
    Ok(())
}

// ── Agents ───────────────────────────────────────────────────────────

struct GoalEcho;

#[async_trait]
impl Agent for GoalEcho {
    fn name(&self) -> &str {
        "goal-echo"
    }

    fn role(&self) -> AgentRole {
        AgentRole::ContextBuilder
    }

    async fn run(
        &self,
        global: &GlobalState,
        _ctx: &ExecutionContext,
        _step: Option<&StepContext>,
    ) -> AgentOutput {
        AgentOutput::success(AgentRole::ContextBuilder, json!({ "goal": global.original_goal() }))
    }
}

struct StaticPlanner {
    plan: ExecutionPlan,
}

#[async_trait]
impl Agent for StaticPlanner {
    fn name(&self) -> &str {
        "static-planner"
    }

    fn role(&self) -> AgentRole {
        AgentRole::Planner
    }

    async fn run(
        &self,
        _global: &GlobalState,
        _ctx: &ExecutionContext,
        _step: Option<&StepContext>,
    ) -> AgentOutput {
        match serde_json::to_value(&self.plan) {
            Ok(data) => AgentOutput::success(AgentRole::Planner, data),
            Err(e) => AgentOutput::failure(
                AgentRole::Planner,
                StructuredError::critical(codes::INVALID_PLAN, e.to_string())
                    .with_action(SuggestedAction::Halt),
            ),
        }
    }
}

/// Critic or reviewer that accepts whatever it is shown.
struct Approver {
    name: &'static str,
    role: AgentRole,
}

impl Approver {
    fn new(name: &'static str, role: AgentRole) -> Self {
        Self { name, role }
    }
}

#[async_trait]
impl Agent for Approver {
    fn name(&self) -> &str {
        self.name
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
        AgentOutput::success(self.role, Value::Null)
    }
}

// ── Tools ────────────────────────────────────────────────────────────

fn bad_input(tool: &str, reason: impl std::fmt::Display) -> ToolExecutionResult {
    ToolExecutionResult::err(
        StructuredError::warning(codes::TOOL_FAILED, format!("{}: {}", tool, reason))
            .with_action(SuggestedAction::Replan),
    )
}

/// Returns its input unchanged.
struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, input: Value) -> ToolExecutionResult {
        ToolExecutionResult::ok(input)
    }
}

/// `{"ms": <u64>}`: sleeps, then reports how long it slept.
struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "ms": { "type": "integer" } } })
    }

    async fn execute(&self, input: Value) -> ToolExecutionResult {
        let Some(ms) = input.get("ms").and_then(Value::as_u64) else {
            return bad_input("sleep", "expected {\"ms\": <integer>}");
        };
        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(ms)).await;
        let elapsed = started.elapsed().as_millis() as u64;
        ToolExecutionResult::ok(json!({ "slept_ms": ms })).with_latency(elapsed)
    }
}

/// `{"path": <string>, "contents": <string>}`: writes a file.
struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Internal
    }

    fn has_side_effect(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "contents": { "type": "string" }
            },
            "required": ["path", "contents"]
        })
    }

    async fn execute(&self, input: Value) -> ToolExecutionResult {
        let (Some(path), Some(contents)) = (
            input.get("path").and_then(Value::as_str),
            input.get("contents").and_then(Value::as_str),
        ) else {
            return bad_input("write_file", "expected {\"path\", \"contents\"}");
        };

        match tokio::fs::write(path, contents).await {
            Ok(()) => ToolExecutionResult::ok(json!({ "path": path, "bytes": contents.len() }))
                .with_side_effect(true),
            Err(e) => ToolExecutionResult::err(
                StructuredError::warning(codes::TOOL_FAILED, format!("write {}: {}", path, e))
                    .with_action(SuggestedAction::Replan)
                    .with_metadata("path", path),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_engine::EngineConfig;
    use conductor_types::{LifecycleState, PlanStep};

    #[tokio::test]
    async fn write_file_writes_and_reports_side_effect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let result = WriteFileTool
            .execute(json!({ "path": path.to_str().unwrap(), "contents": "hello" }))
            .await;

        assert!(result.success);
        assert!(result.side_effect_occurred);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn malformed_input_is_a_structured_failure() {
        let result = SleepTool.execute(json!({ "seconds": 1 })).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, codes::TOOL_FAILED);
    }

    #[tokio::test]
    async fn builtins_run_a_plan_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("report.txt");
        let plan = ExecutionPlan::new("write a report")
            .with_step(PlanStep::new("greet", "echo").with_input(json!("hi")))
            .with_step(PlanStep::new("pause", "sleep").with_input(json!({ "ms": 5 })))
            .with_step(
                PlanStep::new("save", "write_file")
                    .with_input(json!({ "path": target.to_str().unwrap(), "contents": "done" }))
                    .depends_on("greet")
                    .depends_on("pause"),
            );

        let mut engine = Engine::new(EngineConfig::default());
        install(&mut engine, plan).unwrap();
        let result = engine.start("write a report").await.unwrap();

        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.state, LifecycleState::Completed);
        let output = result.final_output.unwrap();
        assert_eq!(output["greet"], json!("hi"));
        assert_eq!(output["save"]["bytes"], json!(4));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "done");
    }
}
