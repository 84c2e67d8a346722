//! Batch results handed back to the engine.

use conductor_types::{BatchId, RollbackScope, Severity, StepStatus, ToolExecutionResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Terminal outcome of one step in one batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_id: String,
    /// COMPLETED or FAILED.
    pub status: StepStatus,
    /// Result of the last attempt.
    pub result: ToolExecutionResult,
    /// Dispatches made for this step in this batch.
    pub attempts: u32,
}

impl StepOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// Everything a batch produced, in plan order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Option<BatchId>,
    pub outcomes: Vec<StepOutcome>,
    /// Set when a rollback request interrupted the batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<RollbackScope>,
}

impl BatchReport {
    /// Every step COMPLETED and nothing cancelled.
    pub fn is_success(&self) -> bool {
        self.cancelled.is_none() && self.outcomes.iter().all(StepOutcome::is_completed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(|o| !o.is_completed())
    }

    pub fn outcome(&self, step_id: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.step_id == step_id)
    }

    /// The failed result the policy gate should look at: a CRITICAL one
    /// if any, else the first failure.
    pub fn failure_result(&self) -> Option<&ToolExecutionResult> {
        self.failures()
            .map(|o| &o.result)
            .find(|r| r.is_critical())
            .or_else(|| self.failures().map(|o| &o.result).next())
    }

    pub fn summary(&self) -> Value {
        let completed: Vec<&str> = self
            .outcomes
            .iter()
            .filter(|o| o.is_completed())
            .map(|o| o.step_id.as_str())
            .collect();
        let failed: Vec<Value> = self
            .failures()
            .map(|o| {
                let error = o.result.error.as_ref();
                json!({
                    "step_id": o.step_id,
                    "code": error.map(|e| e.code.as_str()),
                    "severity": error.map(|e| e.severity).unwrap_or(Severity::Warning),
                    "retryable": error.map(|e| e.retryable).unwrap_or(false),
                })
            })
            .collect();
        json!({
            "batch_id": self.batch_id,
            "success": self.is_success(),
            "completed": completed,
            "failed": failed,
            "cancelled": self.cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::{codes, StructuredError};

    fn outcome(id: &str, result: ToolExecutionResult) -> StepOutcome {
        let status = if result.success {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        StepOutcome {
            step_id: id.into(),
            status,
            result,
            attempts: 1,
        }
    }

    #[test]
    fn critical_failure_is_preferred_for_policy() {
        let report = BatchReport {
            batch_id: Some(BatchId::new("b1")),
            outcomes: vec![
                outcome("a", ToolExecutionResult::ok(json!(1))),
                outcome(
                    "b",
                    ToolExecutionResult::err(StructuredError::warning(codes::STEP_TIMEOUT, "slow")),
                ),
                outcome(
                    "c",
                    ToolExecutionResult::err(StructuredError::critical(codes::TOOL_FAILED, "disk")),
                ),
            ],
            cancelled: None,
        };

        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 2);
        let worst = report.failure_result().unwrap();
        assert_eq!(worst.error.as_ref().unwrap().code, codes::TOOL_FAILED);

        let summary = report.summary();
        assert_eq!(summary["completed"], json!(["a"]));
        assert_eq!(summary["failed"][0]["step_id"], "b");
    }

    #[test]
    fn cancelled_batch_is_not_a_success() {
        let report = BatchReport {
            batch_id: None,
            outcomes: vec![outcome("a", ToolExecutionResult::ok(json!(1)))],
            cancelled: Some(RollbackScope::Local),
        };
        assert!(!report.is_success());
    }
}
