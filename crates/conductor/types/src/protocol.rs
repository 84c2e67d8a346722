//! Result and decision records exchanged between components

use crate::{LifecycleState, Severity, StructuredError, SuggestedAction, TraceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Cognitive role a registered agent plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRole {
    ContextBuilder,
    Planner,
    PlanCritic,
    StepExecutor,
    Reviewer,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentRole::ContextBuilder => "CONTEXT_BUILDER",
            AgentRole::Planner => "PLANNER",
            AgentRole::PlanCritic => "PLAN_CRITIC",
            AgentRole::StepExecutor => "STEP_EXECUTOR",
            AgentRole::Reviewer => "REVIEWER",
        };
        f.write_str(name)
    }
}

/// Risk attached to a policy decision.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Who may invoke a tool.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionLevel {
    #[default]
    Public,
    Internal,
    Admin,
}

/// The policy gate's verdict on a proposed transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_state: Option<LifecycleState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub require_human_approval: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub blocked_tools: BTreeSet<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            next_state: None,
            reason: None,
            risk_level: RiskLevel::Low,
            require_human_approval: false,
            blocked_tools: BTreeSet::new(),
        }
    }

    pub fn deny(risk_level: RiskLevel, reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            next_state: None,
            reason: Some(reason.into()),
            risk_level,
            require_human_approval: false,
            blocked_tools: BTreeSet::new(),
        }
    }

    pub fn with_next_state(mut self, state: LifecycleState) -> Self {
        self.next_state = Some(state);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn requiring_human(mut self) -> Self {
        self.require_human_approval = true;
        self
    }

    pub fn with_blocked_tools(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.blocked_tools.extend(tools);
        self
    }
}

/// What a cognitive agent returns from one invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub errors: Vec<StructuredError>,
    pub role: AgentRole,
}

fn default_confidence() -> f64 {
    1.0
}

impl AgentOutput {
    pub fn success(role: AgentRole, data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            confidence: 1.0,
            errors: Vec::new(),
            role,
        }
    }

    pub fn failure(role: AgentRole, error: StructuredError) -> Self {
        Self {
            success: false,
            data: None,
            confidence: 1.0,
            errors: vec![error],
            role,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_error(mut self, error: StructuredError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn has_critical(&self) -> bool {
        self.errors.iter().any(StructuredError::is_critical)
    }

    pub fn suggests(&self, action: SuggestedAction) -> bool {
        self.errors.iter().any(|e| e.suggests(action))
    }
}

/// What a tool returns from one execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub side_effect_occurred: bool,
}

impl ToolExecutionResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            latency_ms: None,
            side_effect_occurred: false,
        }
    }

    pub fn err(error: StructuredError) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
            latency_ms: None,
            side_effect_occurred: false,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_side_effect(mut self, occurred: bool) -> Self {
        self.side_effect_occurred = occurred;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.error
            .as_ref()
            .map(|e| e.severity == Severity::Critical)
            .unwrap_or(false)
    }
}

/// What the engine hands back from `start`, feedback and rollback.
///
/// `state` is `WAIT_HUMAN` when the drive loop paused for feedback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Value>,
    pub trace_id: TraceId,
    pub state: LifecycleState,
    #[serde(default)]
    pub errors: Vec<StructuredError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_latency_ms: Option<u64>,
}

impl EngineResult {
    pub fn awaiting_human(&self) -> bool {
        self.state == LifecycleState::WaitHuman
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;

    #[test]
    fn agent_output_defaults_confidence() {
        let out: AgentOutput =
            serde_json::from_str(r#"{"success":true,"role":"PLANNER"}"#).unwrap();
        assert_eq!(out.confidence, 1.0);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn confidence_is_clamped() {
        let out = AgentOutput::success(AgentRole::Reviewer, Value::Null).with_confidence(7.0);
        assert_eq!(out.confidence, 1.0);
    }

    #[test]
    fn decision_builders() {
        let d = PolicyDecision::deny(RiskLevel::High, "admin tool")
            .requiring_human()
            .with_blocked_tools(vec!["wipe".to_string()]);
        assert!(!d.allow);
        assert!(d.require_human_approval);
        assert!(d.blocked_tools.contains("wipe"));
        assert!(PolicyDecision::allow().allow);
    }

    #[test]
    fn tool_result_criticality() {
        let ok = ToolExecutionResult::ok(Value::Bool(true));
        assert!(!ok.is_critical());
        let bad = ToolExecutionResult::err(StructuredError::critical(codes::TOOL_FAILED, "x"));
        assert!(bad.is_critical());
    }

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::Medium > RiskLevel::Low);
    }
}
