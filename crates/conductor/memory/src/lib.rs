//! Memory contract for conductor collaborators
//!
//! Planning agents read and write scoped memory; the engine appends a
//! failure pattern every time a task rolls back or fails so later
//! planning passes can steer around it.

#![deny(unsafe_code)]

pub mod entry;
pub mod local;

pub use entry::{FailurePattern, MemoryEntry, MemoryScope};
pub use local::{LocalMemory, LocalMemoryConfig};

use async_trait::async_trait;
use serde_json::Value;

/// Scoped key/value memory with substring search.
#[async_trait]
pub trait Memory: Send + Sync {
    async fn store(&self, key: &str, value: Value, scope: MemoryScope);

    async fn retrieve(&self, key: &str, scope: MemoryScope) -> Option<Value>;

    /// Case-insensitive match on key or value.
    async fn search(&self, query: &str, scope: MemoryScope) -> Vec<MemoryEntry>;

    async fn record_failure_pattern(&self, pattern: Value);

    /// Recorded failure patterns, oldest first.
    async fn failure_patterns(&self) -> Vec<FailurePattern>;
}
