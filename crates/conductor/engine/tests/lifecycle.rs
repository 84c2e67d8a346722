//! End-to-end lifecycle runs against scripted agents and tools.

mod common;

use common::harness;
use conductor_engine::{Engine, EngineConfig, EngineError};
use conductor_memory::{LocalMemory, LocalMemoryConfig, Memory};
use conductor_policy::mocks::ScriptedPolicy;
use conductor_policy::PolicyConfig;
use conductor_registry::mocks::{MockCall, MockTool, ScriptedAgent};
use conductor_scheduler::SchedulerConfig;
use conductor_trace::TraceEventType;
use conductor_types::{
    codes, AgentOutput, AgentRole, ExecutionPlan, LifecycleState, PermissionLevel, PlanStep,
    PolicyDecision, RiskLevel, StepStatus, StructuredError, SuggestedAction, ToolExecutionResult,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use LifecycleState::*;

fn diamond() -> ExecutionPlan {
    ExecutionPlan::new("diamond")
        .with_step(PlanStep::new("A", "a_tool"))
        .with_step(PlanStep::new("B", "b_tool").with_timeout_ms(50))
        .with_step(PlanStep::new("C", "echo").depends_on("A").depends_on("B"))
}

#[tokio::test(start_paused = true)]
async fn happy_path_runs_every_batch_and_completes() {
    let b_tool = Arc::new(
        MockTool::new("b_tool")
            .then(MockCall::sleep_ms(1_000))
            .then(MockCall::ok(json!("b"))),
    );
    let mut h = harness(diamond())
        .tool(Arc::new(MockTool::new("a_tool").always(MockCall::ok(json!("a")))))
        .tool(b_tool.clone())
        .tool(Arc::new(MockTool::new("echo")))
        .build();

    let result = h.engine.start("run the diamond").await.unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.state, Completed);
    assert_eq!(b_tool.call_count(), 2);
    assert_eq!(h.engine.context().attempts("B"), 2);
    for id in ["A", "B", "C"] {
        assert_eq!(h.engine.context().status(id), Some(StepStatus::Completed));
    }

    let output = result.final_output.unwrap();
    assert_eq!(output["A"], json!("a"));
    assert_eq!(output["B"], json!("b"));

    let transitions = h.transitions();
    assert_eq!(transitions.first(), Some(&(Init, ContextBuild)));
    assert_eq!(transitions.last(), Some(&(GlobalReview, Completed)));
    // Two batches: {A, B} then {C}.
    let batches = transitions
        .iter()
        .filter(|t| **t == (ExecutionPrepare, StepExecution))
        .count();
    assert_eq!(batches, 2);
    // Plan start, two batches, one review.
    assert_eq!(h.count(TraceEventType::SnapshotCreated), 4);
    assert_eq!(
        h.count(TraceEventType::StateTransition),
        h.count(TraceEventType::PolicyEvaluation)
    );
    assert_eq!(h.engine.global_state().unwrap().iteration_count(), 0);
}

#[tokio::test]
async fn failed_critique_replans_and_counts_an_iteration() {
    let critic = ScriptedAgent::new("critic", AgentRole::PlanCritic).then(AgentOutput::failure(
        AgentRole::PlanCritic,
        StructuredError::warning("WEAK_PLAN", "steps do not cover the goal")
            .with_action(SuggestedAction::Replan),
    ));
    let mut h = harness(ExecutionPlan::new("g").with_step(PlanStep::new("only", "echo")))
        .tool(Arc::new(MockTool::new("echo")))
        .critic(critic)
        .build();

    let result = h.engine.start("goal").await.unwrap();

    assert!(result.success);
    assert_eq!(h.engine.global_state().unwrap().iteration_count(), 1);
    assert!(h.position_of(PlanCheck, Replan).is_some());
    assert!(h.position_of(Replan, PlanGeneration).is_some());

    let replan_decision = h
        .events()
        .into_iter()
        .find(|e| {
            e.event_type == TraceEventType::PolicyEvaluation && e.payload["state"] == "PLAN_CHECK"
        })
        .unwrap();
    assert_eq!(replan_decision.payload["decision"]["next_state"], "REPLAN");
    assert!(result.errors.iter().any(|e| e.code == "WEAK_PLAN"));
}

#[tokio::test]
async fn critical_tool_error_rolls_back_to_plan_start() {
    let disk = Arc::new(
        MockTool::new("disk")
            .then(MockCall::err(
                StructuredError::critical("DISK_GONE", "volume unmounted")
                    .with_action(SuggestedAction::Rollback),
            ))
            .then(MockCall::ok(json!("written"))),
    );
    let mut h = harness(ExecutionPlan::new("g").with_step(PlanStep::new("write", "disk")))
        .tool(disk.clone())
        .build();

    let result = h.engine.start("persist the report").await.unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(disk.call_count(), 2);
    assert!(result.errors.iter().any(|e| e.code == "DISK_GONE"));

    let into_rollback = h.position_of(StepExecution, Rollback).unwrap();
    let out_of_rollback = h.position_of(Rollback, PlanGeneration).unwrap();
    assert!(into_rollback < out_of_rollback);

    let events = h.events();
    let between = &events[into_rollback..out_of_rollback];
    assert!(between
        .iter()
        .all(|e| e.event_type != TraceEventType::SnapshotCreated));
    let restored = between
        .iter()
        .find(|e| e.event_type == TraceEventType::SnapshotRestored)
        .unwrap();
    assert_eq!(restored.payload["scope"], "GLOBAL");
    assert_eq!(restored.payload["label"], "PLAN_GENERATION");

    // A rollback is not a replan.
    assert_eq!(h.engine.global_state().unwrap().iteration_count(), 0);
    assert!(!h.engine.memory().failure_patterns().await.is_empty());
}

#[tokio::test]
async fn admin_tool_waits_for_approval_then_runs() {
    let wipe = Arc::new(
        MockTool::new("wipe")
            .with_permission(PermissionLevel::Admin)
            .with_side_effect(true),
    );
    let mut h = harness(ExecutionPlan::new("g").with_step(PlanStep::new("clean", "wipe")))
        .tool(wipe.clone())
        .build();

    let paused = h.engine.start("clean the staging bucket").await.unwrap();

    assert!(paused.awaiting_human());
    assert!(!paused.success);
    assert_eq!(wipe.call_count(), 0);
    assert!(h.position_of(ExecutionPrepare, WaitHuman).is_some());
    assert!(paused
        .errors
        .iter()
        .any(|e| e.code == codes::PERMISSION_DENIED && e.metadata["tool"] == "wipe"));

    // Still waiting: transition() leaves WAIT_HUMAN alone.
    assert_eq!(h.engine.transition().await.unwrap(), WaitHuman);

    let result = h.engine.submit_human_feedback("Approve").await.unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(wipe.call_count(), 1);
    assert!(h.position_of(WaitHuman, StepExecution).is_some());
    assert!(h.engine.context().approved_tools.contains("wipe"));
    assert_eq!(h.count(TraceEventType::HumanInteraction), 1);
}

#[tokio::test]
async fn feedback_outside_planning_redirects_to_plan_generation() {
    let hold = PolicyDecision::deny(RiskLevel::Medium, "confirm the goal").requiring_human();
    let mut h = harness(ExecutionPlan::new("g").with_step(PlanStep::new("only", "echo")))
        .tool(Arc::new(MockTool::new("echo")))
        .policy(Arc::new(ScriptedPolicy::new().once(ContextBuild, hold)))
        .build();

    let paused = h.engine.start("draft the memo").await.unwrap();
    assert_eq!(paused.state, WaitHuman);
    assert!(paused.errors.iter().any(|e| e.code == codes::POLICY_DENIED));

    let result = h
        .engine
        .submit_human_feedback("make it shorter")
        .await
        .unwrap();

    assert!(result.success);
    assert!(h.position_of(WaitHuman, PlanGeneration).is_some());
    let feedback = &h.engine.context().intermediate_results["human_feedback"];
    assert_eq!(feedback[0]["feedback"], "make it shorter");
    assert_eq!(feedback[0]["origin"], "CONTEXT_BUILD");
    assert!(h.engine.context().approved_tools.is_empty());
}

#[tokio::test]
async fn retryable_step_failure_is_retried_through_review() {
    let flaky = Arc::new(
        MockTool::new("flaky")
            .then(MockCall::err(
                StructuredError::warning("UPSTREAM_503", "try later")
                    .retryable(true)
                    .with_action(SuggestedAction::Retry),
            ))
            .then(MockCall::ok(json!("fetched"))),
    );
    let config = EngineConfig {
        scheduler: SchedulerConfig {
            local_retries: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut h = harness(ExecutionPlan::new("g").with_step(PlanStep::new("fetch", "flaky")))
        .config(config)
        .tool(flaky.clone())
        .build();

    let result = h.engine.start("fetch").await.unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(flaky.call_count(), 2);
    assert!(h.position_of(StepReview, StepExecution).is_some());
    assert_eq!(h.engine.context().attempts("fetch"), 2);
}

#[tokio::test]
async fn repeated_step_failures_escalate_to_a_human() {
    let down = Arc::new(MockTool::new("down").always(MockCall::err(
        StructuredError::warning("UPSTREAM_503", "try later")
            .retryable(true)
            .with_action(SuggestedAction::Retry),
    )));
    let config = EngineConfig {
        policy: PolicyConfig {
            max_consecutive_failures: 2,
            ..Default::default()
        },
        scheduler: SchedulerConfig {
            max_retries: 5,
            local_retries: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut h = harness(ExecutionPlan::new("g").with_step(PlanStep::new("fetch", "down")))
        .config(config)
        .tool(down.clone())
        .build();

    let result = h.engine.start("fetch").await.unwrap();

    assert_eq!(result.state, WaitHuman);
    assert_eq!(down.call_count(), 2);
    assert_eq!(h.engine.context().consecutive_failures, 2);
    assert!(h.position_of(StepReview, StepExecution).is_some());
    assert!(h.position_of(StepExecution, WaitHuman).is_some());
    assert_eq!(h.count(TraceEventType::SnapshotRestored), 0);
    assert!(result.errors.iter().any(|e| e.code == codes::POLICY_DENIED));
}

#[tokio::test]
async fn recurring_plan_rejection_waits_for_a_human() {
    let memory = Arc::new(LocalMemory::new(LocalMemoryConfig::default()));
    for _ in 0..3 {
        memory
            .record_failure_pattern(json!({
                "goal": "ship it",
                "from": PlanCheck,
                "to": Failed,
                "recent_errors": ["WEAK_PLAN"],
            }))
            .await;
    }
    let critic = ScriptedAgent::new("critic", AgentRole::PlanCritic).then(AgentOutput::failure(
        AgentRole::PlanCritic,
        StructuredError::warning("WEAK_PLAN", "steps do not cover the goal")
            .with_action(SuggestedAction::Replan),
    ));
    let mut h = harness(ExecutionPlan::new("p").with_step(PlanStep::new("s", "echo")))
        .memory(memory)
        .critic(critic)
        .tool(Arc::new(MockTool::new("echo")))
        .build();

    let result = h.engine.start("ship it").await.unwrap();

    assert_eq!(result.state, WaitHuman);
    assert!(h.position_of(PlanCheck, WaitHuman).is_some());
    assert!(h.position_of(PlanCheck, Replan).is_none());
    assert_eq!(h.engine.global_state().unwrap().iteration_count(), 0);
}

#[tokio::test]
async fn replan_budget_is_enforced() {
    let critic = ScriptedAgent::failing(
        "critic",
        AgentRole::PlanCritic,
        StructuredError::warning("WEAK_PLAN", "still wrong").with_action(SuggestedAction::Replan),
    );
    let mut h = harness(ExecutionPlan::new("g").with_step(PlanStep::new("only", "echo")))
        .tool(Arc::new(MockTool::new("echo")))
        .critic(critic)
        .build();

    let result = h.engine.start("goal").await.unwrap();

    assert_eq!(result.state, Failed);
    assert!(!result.success);
    assert_eq!(h.engine.global_state().unwrap().iteration_count(), 3);
    assert!(result
        .errors
        .iter()
        .any(|e| e.code == codes::ITERATION_BUDGET_EXHAUSTED));
    assert!(h.position_of(Replan, Failed).is_some());
}

#[tokio::test]
async fn plan_with_unknown_tool_never_reaches_the_critic() {
    let critic = Arc::new(ScriptedAgent::new("critic", AgentRole::PlanCritic));
    let mut engine = Engine::new(EngineConfig {
        max_iterations: 0,
        ..Default::default()
    });
    engine
        .register_agent(Arc::new(ScriptedAgent::new("ctx", AgentRole::ContextBuilder)))
        .unwrap();
    engine
        .register_agent(Arc::new(ScriptedAgent::planner(
            "planner",
            &ExecutionPlan::new("g").with_step(PlanStep::new("x", "teleport")),
        )))
        .unwrap();
    engine.register_agent(critic.clone()).unwrap();

    let result = engine.start("go").await.unwrap();

    assert_eq!(result.state, Failed);
    assert_eq!(critic.call_count(), 0);
    assert!(result.errors.iter().any(|e| e.code == codes::INVALID_PLAN));
}

#[tokio::test]
async fn missing_planner_fails_the_task() {
    let mut engine = Engine::new(EngineConfig::default());
    engine
        .register_agent(Arc::new(ScriptedAgent::new("ctx", AgentRole::ContextBuilder)))
        .unwrap();

    let result = engine.start("go").await.unwrap();

    assert_eq!(result.state, Failed);
    assert!(result.errors.iter().any(|e| e.code == codes::AGENT_NOT_FOUND));
}

#[tokio::test(start_paused = true)]
async fn slow_agent_times_out_as_a_structured_error() {
    let mut engine = Engine::new(EngineConfig {
        agent_timeout_ms: 100,
        ..Default::default()
    });
    engine
        .register_agent(Arc::new(
            ScriptedAgent::new("ctx", AgentRole::ContextBuilder).with_delay(Duration::from_secs(5)),
        ))
        .unwrap();

    let result = engine.start("go").await.unwrap();

    assert_eq!(result.state, Failed);
    let timeout = result
        .errors
        .iter()
        .find(|e| e.code == codes::AGENT_TIMEOUT)
        .unwrap();
    assert!(timeout.retryable);
}

#[tokio::test(start_paused = true)]
async fn human_wait_times_out() {
    let hold = PolicyDecision::deny(RiskLevel::High, "needs sign-off").requiring_human();
    let mut h = harness(ExecutionPlan::new("g").with_step(PlanStep::new("only", "echo")))
        .config(EngineConfig {
            human_wait_timeout_secs: Some(30),
            ..Default::default()
        })
        .policy(Arc::new(ScriptedPolicy::new().always(ContextBuild, hold)))
        .build();

    assert_eq!(h.engine.start("goal").await.unwrap().state, WaitHuman);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(h.engine.transition().await.unwrap(), WaitHuman);

    tokio::time::advance(Duration::from_secs(25)).await;
    assert_eq!(h.engine.transition().await.unwrap(), Failed);

    let result = h.engine.result().unwrap();
    assert!(result.errors.iter().any(|e| e.code == codes::HUMAN_TIMEOUT));
}

#[tokio::test]
async fn misuse_is_reported_as_engine_errors() {
    let mut engine = Engine::new(EngineConfig::default());
    assert!(matches!(
        engine.transition().await,
        Err(EngineError::NotStarted)
    ));

    engine
        .register_agent(Arc::new(ScriptedAgent::new("twin", AgentRole::Planner)))
        .unwrap();
    let duplicate = engine.register_agent(Arc::new(ScriptedAgent::new("twin", AgentRole::Reviewer)));
    assert!(matches!(duplicate, Err(EngineError::DuplicateName(name)) if name == "twin"));

    let mut h = harness(ExecutionPlan::new("g").with_step(PlanStep::new("only", "echo")))
        .tool(Arc::new(MockTool::new("echo")))
        .build();
    let done = h.engine.start("goal").await.unwrap();
    assert!(done.success);

    let feedback = h.engine.submit_human_feedback("approve").await;
    assert!(matches!(
        feedback,
        Err(EngineError::InvalidState {
            expected: WaitHuman,
            actual: Completed
        })
    ));
    // Terminal states are sticky.
    assert_eq!(h.engine.transition().await.unwrap(), Completed);
}

#[tokio::test]
async fn reviewer_output_becomes_the_final_output() {
    let reviewer = ScriptedAgent::succeeding(
        "reviewer",
        AgentRole::Reviewer,
        json!({"summary": "all good"}),
    );
    let mut h = harness(ExecutionPlan::new("g").with_step(PlanStep::new("only", "echo")))
        .tool(Arc::new(
            MockTool::new("echo").always(MockCall::Return(ToolExecutionResult::ok(json!(1)))),
        ))
        .reviewer(reviewer)
        .build();

    let result = h.engine.start("goal").await.unwrap();
    assert_eq!(result.final_output, Some(json!({"summary": "all good"})));
    assert!(result.total_latency_ms.is_some());
}
