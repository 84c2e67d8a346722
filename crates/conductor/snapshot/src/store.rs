//! Snapshot storage backends.

use crate::error::SnapshotResult;
use crate::record::SnapshotRecord;
use async_trait::async_trait;
use conductor_types::SnapshotId;
use dashmap::DashMap;

/// Where snapshot records are kept.
///
/// Stores are dumb: expiry is the manager's concern.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace a record.
    async fn put(&self, record: &SnapshotRecord) -> SnapshotResult<()>;

    async fn get(&self, id: &SnapshotId) -> SnapshotResult<Option<SnapshotRecord>>;

    /// Every record, expired ones included.
    async fn list(&self) -> SnapshotResult<Vec<SnapshotRecord>>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &SnapshotId) -> SnapshotResult<bool>;
}

/// In-memory store for development and testing.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    records: DashMap<SnapshotId, SnapshotRecord>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn put(&self, record: &SnapshotRecord) -> SnapshotResult<()> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &SnapshotId) -> SnapshotResult<Option<SnapshotRecord>> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn list(&self) -> SnapshotResult<Vec<SnapshotRecord>> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }

    async fn delete(&self, id: &SnapshotId) -> SnapshotResult<bool> {
        Ok(self.records.remove(id).is_some())
    }
}
