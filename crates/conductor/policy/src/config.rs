use conductor_types::AgentRole;
use serde::{Deserialize, Serialize};

/// Thresholds for [`DefaultPolicy`](crate::DefaultPolicy).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Consecutive failed agent outputs or batches before a human is asked.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Agent outputs below this confidence are sent back to planning.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Roles allowed to invoke INTERNAL tools.
    #[serde(default = "default_trusted_roles")]
    pub trusted_roles: Vec<AgentRole>,

    /// An error code named by this many recorded failure patterns for the
    /// same goal goes to a human. 0 disables the check.
    #[serde(default = "default_failure_history_threshold")]
    pub failure_history_threshold: usize,
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_min_confidence() -> f64 {
    0.6
}

fn default_trusted_roles() -> Vec<AgentRole> {
    vec![AgentRole::StepExecutor]
}

fn default_failure_history_threshold() -> usize {
    3
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            min_confidence: default_min_confidence(),
            trusted_roles: default_trusted_roles(),
            failure_history_threshold: default_failure_history_threshold(),
        }
    }
}

impl PolicyConfig {
    pub fn is_trusted(&self, role: AgentRole) -> bool {
        self.trusted_roles.contains(&role)
    }
}
