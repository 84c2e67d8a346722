use chrono::{DateTime, Utc};
use conductor_types::{ExecutionContext, SnapshotId};
use serde::{Deserialize, Serialize};

/// Persisted snapshot: `{id, label, timestamp, execution_context, expires_at}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: SnapshotId,
    /// Conventionally the lifecycle state to resume into.
    pub label: String,
    pub timestamp: DateTime<Utc>,
    pub execution_context: ExecutionContext,
    pub expires_at: DateTime<Utc>,
}

impl SnapshotRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id.clone(),
            label: self.label.clone(),
            timestamp: self.timestamp,
            expires_at: self.expires_at,
        }
    }
}

/// Listing entry without the context payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: SnapshotId,
    pub label: String,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
