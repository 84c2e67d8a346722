//! Structured errors
//!
//! Every agent or tool failure is converted into a [`StructuredError`] at
//! the component boundary. Nothing unstructured crosses into the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Error severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// What the reporting component thinks should happen next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestedAction {
    Retry,
    Replan,
    Rollback,
    Halt,
}

/// Error codes the engine and scheduler emit themselves.
pub mod codes {
    pub const AGENT_NOT_FOUND: &str = "AGENT_NOT_FOUND";
    pub const AGENT_TIMEOUT: &str = "AGENT_TIMEOUT";
    pub const AGENT_PANIC: &str = "AGENT_PANIC";
    pub const INVALID_AGENT_OUTPUT: &str = "INVALID_AGENT_OUTPUT";
    pub const INVALID_PLAN: &str = "INVALID_PLAN";
    pub const NO_PLAN: &str = "NO_PLAN";
    pub const TOOL_NOT_FOUND: &str = "TOOL_NOT_FOUND";
    pub const TOOL_PANIC: &str = "TOOL_PANIC";
    pub const TOOL_FAILED: &str = "TOOL_FAILED";
    pub const STEP_TIMEOUT: &str = "STEP_TIMEOUT";
    pub const STEP_CANCELLED: &str = "STEP_CANCELLED";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const POLICY_DENIED: &str = "POLICY_DENIED";
    pub const ILLEGAL_TRANSITION: &str = "ILLEGAL_TRANSITION";
    pub const SNAPSHOT_FAILED: &str = "SNAPSHOT_FAILED";
    pub const ROLLBACK_FAILED: &str = "ROLLBACK_FAILED";
    pub const ROLLBACK_BUDGET_EXHAUSTED: &str = "ROLLBACK_BUDGET_EXHAUSTED";
    pub const ITERATION_BUDGET_EXHAUSTED: &str = "ITERATION_BUDGET_EXHAUSTED";
    pub const HUMAN_TIMEOUT: &str = "HUMAN_TIMEOUT";
}

/// A typed failure record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<SuggestedAction>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl StructuredError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity,
            retryable: false,
            suggested_action: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn info(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, Severity::Info)
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, Severity::Warning)
    }

    pub fn critical(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, Severity::Critical)
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_action(mut self, action: SuggestedAction) -> Self {
        self.suggested_action = Some(action);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// Retryable and below CRITICAL: the scheduler may retry it locally.
    pub fn is_locally_retryable(&self) -> bool {
        self.retryable && self.severity != Severity::Critical
    }

    pub fn suggests(&self, action: SuggestedAction) -> bool {
        self.suggested_action == Some(action)
    }

    /// Step id this error was reported for, if any.
    pub fn step_id(&self) -> Option<&str> {
        self.metadata.get("step_id").and_then(Value::as_str)
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let err = StructuredError::warning(codes::STEP_TIMEOUT, "step a timed out")
            .retryable(true)
            .with_action(SuggestedAction::Retry)
            .with_metadata("step_id", "a");

        assert!(err.is_locally_retryable());
        assert!(err.suggests(SuggestedAction::Retry));
        assert_eq!(err.step_id(), Some("a"));
    }

    #[test]
    fn critical_is_never_locally_retryable() {
        let err = StructuredError::critical("BOOM", "disk gone").retryable(true);
        assert!(err.is_critical());
        assert!(!err.is_locally_retryable());
    }

    #[test]
    fn deserializes_minimal_record() {
        let err: StructuredError =
            serde_json::from_str(r#"{"code":"X","message":"m","severity":"INFO"}"#).unwrap();
        assert!(!err.retryable);
        assert!(err.suggested_action.is_none());
        assert!(err.metadata.is_empty());
    }
}
