//! The default five-check policy gate.

use crate::config::PolicyConfig;
use crate::permission::{check_tool_permission, PermissionCheck};
use crate::{Policy, TransitionInput};
use conductor_registry::Tool;
use conductor_types::{
    codes, AgentRole, LifecycleState, PolicyDecision, RiskLevel, StructuredError,
    SuggestedAction,
};
use std::collections::BTreeSet;
use tracing::debug;

/// Role every batch tool call is checked against.
const EXECUTING_ROLE: AgentRole = AgentRole::StepExecutor;

/// Ordered checks (a) to (e); the first failing check decides.
#[derive(Clone, Debug, Default)]
pub struct DefaultPolicy {
    config: PolicyConfig,
}

impl DefaultPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// States that invoked a collaborator. INIT, REPLAN, ROLLBACK and
    /// WAIT_HUMAN are bookkeeping and always pass.
    fn is_gated(state: LifecycleState) -> bool {
        matches!(
            state,
            LifecycleState::ContextBuild
                | LifecycleState::PlanGeneration
                | LifecycleState::PlanCheck
                | LifecycleState::ExecutionPrepare
                | LifecycleState::StepExecution
                | LifecycleState::StepReview
                | LifecycleState::GlobalReview
        )
    }

    fn check_failures(&self, input: &TransitionInput<'_>) -> Option<PolicyDecision> {
        let failures = input.context.consecutive_failures;
        (failures >= self.config.max_consecutive_failures).then(|| {
            PolicyDecision::deny(
                RiskLevel::High,
                format!("{} consecutive failures", failures),
            )
            .requiring_human()
        })
    }

    fn check_confidence(&self, input: &TransitionInput<'_>) -> Option<PolicyDecision> {
        let output = input.agent_output?;
        (output.confidence < self.config.min_confidence).then(|| {
            PolicyDecision::deny(
                RiskLevel::Medium,
                format!(
                    "confidence {:.2} below minimum {:.2}",
                    output.confidence, self.config.min_confidence
                ),
            )
            .with_next_state(LifecycleState::Replan)
        })
    }

    fn check_batch_permissions(&self, input: &TransitionInput<'_>) -> Option<PolicyDecision> {
        let state = input.global.lifecycle_state();
        if !matches!(
            state,
            LifecycleState::ExecutionPrepare | LifecycleState::StepExecution
        ) {
            return None;
        }
        let ctx = input.context;
        let plan = ctx.current_plan.as_ref()?;

        let mut denied = BTreeSet::new();
        let mut needs_approval = BTreeSet::new();
        for step_id in &ctx.current_batch {
            let Some(step) = plan.step(step_id) else {
                continue;
            };
            let Some(tool) = input.tools.get(&step.tool_name) else {
                return Some(
                    PolicyDecision::deny(
                        RiskLevel::High,
                        format!("step {} uses unknown tool {}", step.id, step.tool_name),
                    )
                    .with_next_state(LifecycleState::Replan),
                );
            };
            if ctx.approved_tools.contains(tool.name()) {
                continue;
            }
            match self.check_tool_permission(EXECUTING_ROLE, tool.as_ref()) {
                PermissionCheck::Allowed => {}
                PermissionCheck::Denied => {
                    denied.insert(tool.name().to_string());
                }
                PermissionCheck::RequiresApproval => {
                    needs_approval.insert(tool.name().to_string());
                }
            }
        }

        if !denied.is_empty() {
            let repeated = ctx.has_error_code(codes::PERMISSION_DENIED);
            let decision = PolicyDecision::deny(
                RiskLevel::High,
                format!("role {} may not invoke {:?}", EXECUTING_ROLE, denied),
            )
            .with_blocked_tools(denied);
            return Some(if repeated {
                decision.requiring_human()
            } else {
                decision.with_next_state(LifecycleState::Replan)
            });
        }
        if !needs_approval.is_empty() {
            return Some(
                PolicyDecision::deny(
                    RiskLevel::High,
                    format!("admin tools {:?} need human approval", needs_approval),
                )
                .requiring_human()
                .with_blocked_tools(needs_approval),
            );
        }
        None
    }

    /// An error code that already sits behind enough recorded failures of
    /// the same goal stops the automatic retry and replan loop. Runs after
    /// the critical check, so it only sees non-critical errors.
    fn check_history(&self, input: &TransitionInput<'_>) -> Option<PolicyDecision> {
        let threshold = self.config.failure_history_threshold;
        if threshold == 0 || input.failure_patterns.is_empty() {
            return None;
        }

        let mut reported: Vec<&str> = input
            .agent_output
            .map(|o| o.errors.iter().map(|e| e.code.as_str()).collect())
            .unwrap_or_default();
        if let Some(err) = input.tool_result.and_then(|r| r.error.as_ref()) {
            reported.push(err.code.as_str());
        }

        let goal = input.global.original_goal();
        reported.into_iter().find_map(|code| {
            let seen = input
                .failure_patterns
                .iter()
                .filter(|p| p.pattern["goal"].as_str() == Some(goal))
                .filter(|p| {
                    p.pattern["recent_errors"]
                        .as_array()
                        .map_or(false, |codes| codes.iter().any(|c| c.as_str() == Some(code)))
                })
                .count();
            (seen >= threshold).then(|| {
                PolicyDecision::deny(
                    RiskLevel::High,
                    format!("{} already behind {} recorded failures", code, seen),
                )
                .requiring_human()
            })
        })
    }

    fn check_critical(&self, input: &TransitionInput<'_>) -> Option<PolicyDecision> {
        let mut critical: Vec<&StructuredError> = input
            .agent_output
            .map(|o| o.errors.iter().filter(|e| e.is_critical()).collect())
            .unwrap_or_default();
        if let Some(err) = input.tool_result.and_then(|r| r.error.as_ref()) {
            if err.is_critical() {
                critical.push(err);
            }
        }
        let first = critical.first()?;

        let next = if critical.iter().any(|e| e.suggests(SuggestedAction::Halt)) {
            LifecycleState::Failed
        } else {
            LifecycleState::Rollback
        };
        Some(
            PolicyDecision::deny(
                RiskLevel::Critical,
                format!("critical error {}: {}", first.code, first.message),
            )
            .requiring_human()
            .with_next_state(next),
        )
    }

    /// All checks passed: still steer a failed agent output by its suggestions.
    fn recommend(&self, input: &TransitionInput<'_>) -> PolicyDecision {
        let Some(output) = input.agent_output.filter(|o| !o.success) else {
            return PolicyDecision::allow();
        };
        if output.suggests(SuggestedAction::Halt) {
            return PolicyDecision::deny(RiskLevel::High, "agent requested halt")
                .with_next_state(LifecycleState::Failed);
        }
        if output.suggests(SuggestedAction::Rollback) {
            return PolicyDecision::allow()
                .with_next_state(LifecycleState::Rollback)
                .with_reason("agent suggested rollback");
        }
        let planning = matches!(
            input.global.lifecycle_state(),
            LifecycleState::PlanGeneration | LifecycleState::PlanCheck
        );
        if output.suggests(SuggestedAction::Replan) || planning {
            return PolicyDecision::allow()
                .with_next_state(LifecycleState::Replan)
                .with_reason("agent output failed");
        }
        PolicyDecision::allow()
    }
}

impl Policy for DefaultPolicy {
    fn evaluate_transition(&self, input: &TransitionInput<'_>) -> PolicyDecision {
        let state = input.global.lifecycle_state();
        if !Self::is_gated(state) {
            return PolicyDecision::allow();
        }

        let decision = self
            .check_failures(input)
            .or_else(|| self.check_confidence(input))
            .or_else(|| self.check_batch_permissions(input))
            .or_else(|| self.check_critical(input))
            .or_else(|| self.check_history(input))
            .unwrap_or_else(|| self.recommend(input));

        debug!(
            state = %state,
            allow = decision.allow,
            risk = ?decision.risk_level,
            human = decision.require_human_approval,
            next = ?decision.next_state,
            "Policy evaluated"
        );
        decision
    }

    fn check_tool_permission(&self, role: AgentRole, tool: &dyn Tool) -> PermissionCheck {
        check_tool_permission(&self.config, role, tool.permission_level())
    }
}
