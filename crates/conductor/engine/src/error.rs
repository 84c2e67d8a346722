//! Error types for conductor-engine.
//!
//! Only caller misuse surfaces here. Task failures end up in the
//! returned `EngineResult` instead.

use conductor_registry::RegistryError;
use conductor_snapshot::SnapshotError;
use conductor_types::{LifecycleState, RollbackScope};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// An agent with this name is already registered.
    #[error("agent already registered: {0}")]
    DuplicateName(String),

    /// The operation is not valid in the current lifecycle state.
    #[error("invalid state: expected {expected}, found {actual}")]
    InvalidState {
        expected: LifecycleState,
        actual: LifecycleState,
    },

    /// No snapshot exists for the requested rollback scope.
    #[error("no snapshot available for {0} rollback")]
    NoSnapshot(RollbackScope),

    #[error("engine has not been started")]
    NotStarted,

    #[error("registry error: {0}")]
    Registry(RegistryError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
