//! Snapshot manager: TTL-aware create, restore and maintenance.

use crate::error::{SnapshotError, SnapshotResult};
use crate::record::{SnapshotRecord, SnapshotSummary};
use crate::store::SnapshotStore;
use chrono::Utc;
use conductor_types::{ExecutionContext, SnapshotId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Default snapshot lifetime: 24 hours.
pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Creates and restores execution-context snapshots.
#[derive(Clone)]
pub struct SnapshotManager {
    store: Arc<dyn SnapshotStore>,
    ttl: Duration,
}

impl SnapshotManager {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            ttl: DEFAULT_SNAPSHOT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Persist a copy of `ctx` under a fresh id.
    #[instrument(skip(self, ctx), fields(label = %label.as_ref()))]
    pub async fn create_snapshot(
        &self,
        ctx: &ExecutionContext,
        label: impl AsRef<str>,
    ) -> SnapshotResult<SnapshotId> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        let record = SnapshotRecord {
            id: SnapshotId::generate(),
            label: label.as_ref().to_string(),
            timestamp: now,
            execution_context: ctx.clone(),
            expires_at: now + ttl,
        };
        self.store.put(&record).await?;

        debug!(snapshot_id = %record.id, "Snapshot created");
        Ok(record.id)
    }

    /// Load a live record. Fails with NotFound or Expired.
    pub async fn fetch(&self, id: &SnapshotId) -> SnapshotResult<SnapshotRecord> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| SnapshotError::NotFound(id.clone()))?;

        if record.is_expired_at(Utc::now()) {
            return Err(SnapshotError::Expired {
                id: id.clone(),
                expired_at: record.expires_at,
            });
        }
        Ok(record)
    }

    /// The captured context, equal in value to what was snapshotted.
    pub async fn restore_snapshot(&self, id: &SnapshotId) -> SnapshotResult<ExecutionContext> {
        let record = self.fetch(id).await?;
        info!(snapshot_id = %id, label = %record.label, "Snapshot restored");
        Ok(record.execution_context)
    }

    /// Non-expired snapshots, oldest first.
    pub async fn list_snapshots(&self) -> SnapshotResult<Vec<SnapshotSummary>> {
        let now = Utc::now();
        let mut summaries: Vec<SnapshotSummary> = self
            .store
            .list()
            .await?
            .iter()
            .filter(|r| !r.is_expired_at(now))
            .map(SnapshotRecord::summary)
            .collect();
        summaries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    pub async fn delete_snapshot(&self, id: &SnapshotId) -> SnapshotResult<bool> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            debug!(snapshot_id = %id, "Snapshot deleted");
        }
        Ok(deleted)
    }

    /// Delete every expired snapshot; returns how many were removed.
    pub async fn prune_expired(&self) -> SnapshotResult<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for record in self.store.list().await? {
            if record.is_expired_at(now) && self.store.delete(&record.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Expired snapshots pruned");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
