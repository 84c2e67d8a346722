//! Lifecycle states of a task

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Top-level task-progress state, owned exclusively by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Init,
    ContextBuild,
    PlanGeneration,
    PlanCheck,
    ExecutionPrepare,
    StepExecution,
    StepReview,
    GlobalReview,
    Replan,
    WaitHuman,
    Rollback,
    Completed,
    Failed,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 13] = [
        LifecycleState::Init,
        LifecycleState::ContextBuild,
        LifecycleState::PlanGeneration,
        LifecycleState::PlanCheck,
        LifecycleState::ExecutionPrepare,
        LifecycleState::StepExecution,
        LifecycleState::StepReview,
        LifecycleState::GlobalReview,
        LifecycleState::Replan,
        LifecycleState::WaitHuman,
        LifecycleState::Rollback,
        LifecycleState::Completed,
        LifecycleState::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Completed | LifecycleState::Failed)
    }

    /// Whether the drive loop should stop and hand control back to the caller.
    pub fn is_suspended(&self) -> bool {
        self.is_terminal() || *self == LifecycleState::WaitHuman
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Init => "INIT",
            LifecycleState::ContextBuild => "CONTEXT_BUILD",
            LifecycleState::PlanGeneration => "PLAN_GENERATION",
            LifecycleState::PlanCheck => "PLAN_CHECK",
            LifecycleState::ExecutionPrepare => "EXECUTION_PREPARE",
            LifecycleState::StepExecution => "STEP_EXECUTION",
            LifecycleState::StepReview => "STEP_REVIEW",
            LifecycleState::GlobalReview => "GLOBAL_REVIEW",
            LifecycleState::Replan => "REPLAN",
            LifecycleState::WaitHuman => "WAIT_HUMAN",
            LifecycleState::Rollback => "ROLLBACK",
            LifecycleState::Completed => "COMPLETED",
            LifecycleState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot labels carry the state to resume into, so they parse back.
impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LifecycleState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown lifecycle state: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_from_str() {
        for state in LifecycleState::ALL {
            assert_eq!(state.as_str().parse::<LifecycleState>().unwrap(), state);
        }
        assert!("NOT_A_STATE".parse::<LifecycleState>().is_err());
    }

    #[test]
    fn serde_matches_display() {
        let json = serde_json::to_string(&LifecycleState::StepExecution).unwrap();
        assert_eq!(json, "\"STEP_EXECUTION\"");
    }

    #[test]
    fn terminal_and_suspended() {
        assert!(LifecycleState::Completed.is_terminal());
        assert!(LifecycleState::Failed.is_terminal());
        assert!(!LifecycleState::WaitHuman.is_terminal());
        assert!(LifecycleState::WaitHuman.is_suspended());
        assert!(!LifecycleState::Rollback.is_suspended());
    }
}
