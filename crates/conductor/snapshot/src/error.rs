//! Error types for conductor-snapshot.

use chrono::{DateTime, Utc};
use conductor_types::SnapshotId;
use thiserror::Error;

/// Errors from snapshot storage and restore.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Snapshot not found.
    #[error("snapshot not found: {0}")]
    NotFound(SnapshotId),

    /// Snapshot exists but is past its expiry.
    #[error("snapshot {id} has expired (expired at {expired_at})")]
    Expired {
        id: SnapshotId,
        expired_at: DateTime<Utc>,
    },

    /// Snapshot id cannot be used as a storage key.
    #[error("invalid snapshot id: {0}")]
    InvalidId(SnapshotId),

    /// Filesystem error.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for snapshot operations.
pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;
