use serde::{Deserialize, Serialize};

/// Step scheduler configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Per-attempt timeout when neither the step nor the tool sets one.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Total re-dispatch budget per step, in-batch retries included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Retries attempted inside one batch before the failure is surfaced.
    #[serde(default = "default_local_retries")]
    pub local_retries: u32,

    #[serde(default)]
    pub retry_backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_local_retries() -> u32 {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            local_retries: default_local_retries(),
            retry_backoff_ms: 0,
        }
    }
}
