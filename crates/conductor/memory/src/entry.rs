use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifetime class of a memory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryScope {
    /// Scratch data for one step or agent call.
    Ephemeral,
    /// Data for the current task.
    Session,
    /// Data shared across tasks.
    Global,
}

/// A stored value with its expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: Value,
    pub scope: MemoryScope,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Case-insensitive substring match on key or serialized value.
    /// `needle` must already be lowercase.
    pub(crate) fn matches(&self, needle: &str) -> bool {
        self.key.to_lowercase().contains(needle)
            || self.value.to_string().to_lowercase().contains(needle)
    }
}

/// A timestamped record of something that went wrong.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailurePattern {
    pub recorded_at: DateTime<Utc>,
    pub pattern: Value,
}
