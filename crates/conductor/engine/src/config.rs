//! Engine configuration.

use conductor_policy::PolicyConfig;
use conductor_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// REPLAN budget: plan iterations before the task fails.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Rollbacks per run before the task fails.
    #[serde(default = "default_max_rollbacks")]
    pub max_rollbacks: u32,

    /// GLOBAL_REVIEW loop-backs to EXECUTION_PREPARE.
    #[serde(default = "default_max_review_retries")]
    pub max_review_retries: u32,

    /// Per-invocation agent timeout.
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: u64,

    /// Fail a WAIT_HUMAN pause after this long. Unset waits indefinitely.
    #[serde(default)]
    pub human_wait_timeout_secs: Option<u64>,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_rollbacks: default_max_rollbacks(),
            max_review_retries: default_max_review_retries(),
            agent_timeout_ms: default_agent_timeout_ms(),
            human_wait_timeout_secs: None,
            policy: PolicyConfig::default(),
            scheduler: SchedulerConfig::default(),
            snapshot: SnapshotConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Snapshot storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Directory for JSON snapshot records. Unset keeps snapshots in memory.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default = "default_snapshot_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: None,
            ttl_secs: default_snapshot_ttl_secs(),
        }
    }
}

impl SnapshotConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_max_iterations() -> u32 {
    3
}

fn default_max_rollbacks() -> u32 {
    3
}

fn default_max_review_retries() -> u32 {
    1
}

fn default_agent_timeout_ms() -> u64 {
    60_000
}

fn default_snapshot_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Layer defaults, an optional config file and `CONDUCTOR_*`
    /// environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONDUCTOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }

    pub fn human_wait_timeout(&self) -> Option<Duration> {
        self.human_wait_timeout_secs.map(Duration::from_secs)
    }
}
