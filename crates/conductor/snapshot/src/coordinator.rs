//! Rollback-scope bookkeeping.
//!
//! The coordinator remembers two snapshot ids: the one taken when the
//! current plan started (GLOBAL target) and the most recent one inside the
//! current execution window (LOCAL target). It never touches storage.

use conductor_types::{LifecycleState, RollbackScope, SnapshotId};
use tracing::debug;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotCoordinator {
    plan_start: Option<SnapshotId>,
    local: Option<SnapshotId>,
}

impl SnapshotCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a snapshot just taken on entry to `label`.
    pub fn record(&mut self, id: SnapshotId, label: LifecycleState) {
        match label {
            LifecycleState::PlanGeneration => {
                debug!(snapshot_id = %id, "Plan-start snapshot recorded");
                self.plan_start = Some(id);
                self.local = None;
            }
            LifecycleState::StepExecution | LifecycleState::GlobalReview => {
                debug!(snapshot_id = %id, state = %label, "Local snapshot recorded");
                self.local = Some(id);
            }
            _ => {}
        }
    }

    /// A new batch is being prepared; earlier local checkpoints no longer apply.
    pub fn open_batch_window(&mut self) {
        self.local = None;
    }

    /// Exact lookup, no fallback between scopes.
    pub fn snapshot_for(&self, scope: RollbackScope) -> Option<&SnapshotId> {
        match scope {
            RollbackScope::Local => self.local.as_ref(),
            RollbackScope::Global => self.plan_start.as_ref(),
        }
    }

    /// Bookkeeping after a successful restore in `scope`.
    pub fn after_restore(&mut self, scope: RollbackScope) {
        if scope == RollbackScope::Global {
            self.local = None;
        }
    }

    pub fn plan_start(&self) -> Option<&SnapshotId> {
        self.plan_start.as_ref()
    }

    pub fn local(&self) -> Option<&SnapshotId> {
        self.local.as_ref()
    }
}
