use conductor_types::RollbackScope;
use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable handle for requesting a rollback from outside the drive loop.
///
/// A request cancels the running batch (pure steps are aborted, steps
/// with side effects are awaited) and the next transition enters
/// ROLLBACK with the requested scope.
#[derive(Clone, Debug)]
pub struct RollbackHandle {
    tx: Arc<watch::Sender<Option<RollbackScope>>>,
}

impl RollbackHandle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn request(&self, scope: RollbackScope) {
        tracing::info!(scope = %scope, "Rollback requested");
        self.tx.send_replace(Some(scope));
    }

    pub fn pending(&self) -> Option<RollbackScope> {
        *self.tx.borrow()
    }

    /// Clear and return any pending request.
    pub(crate) fn take(&self) -> Option<RollbackScope> {
        self.tx.send_replace(None)
    }

    /// Receiver that only reports requests made after this call.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<RollbackScope>> {
        self.tx.subscribe()
    }
}
