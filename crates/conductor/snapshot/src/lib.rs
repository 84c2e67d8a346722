//! Execution-context checkpoints for conductor
//!
//! A snapshot is a persisted, timestamped, expiring copy of an
//! [`ExecutionContext`](conductor_types::ExecutionContext) plus a label
//! naming the lifecycle state to resume into.
//!
//! # Layers
//!
//! - [`SnapshotStore`]: where records live ([`InMemorySnapshotStore`],
//!   [`JsonFileSnapshotStore`])
//! - [`SnapshotManager`]: create / restore / list / delete / prune with TTL
//! - [`SnapshotCoordinator`]: which snapshot a LOCAL or GLOBAL rollback
//!   would restore

#![deny(unsafe_code)]

pub mod coordinator;
pub mod error;
pub mod file;
pub mod manager;
pub mod record;
pub mod store;

pub use coordinator::SnapshotCoordinator;
pub use error::{SnapshotError, SnapshotResult};
pub use file::JsonFileSnapshotStore;
pub use manager::{SnapshotManager, DEFAULT_SNAPSHOT_TTL};
pub use record::{SnapshotRecord, SnapshotSummary};
pub use store::{InMemorySnapshotStore, SnapshotStore};
