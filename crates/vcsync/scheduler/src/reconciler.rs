//! Event-path reconciler capability

use async_trait::async_trait;
use vcsync_types::{ReconcileError, ReconcileResult, WorkItem};

/// Brings one object in the super cluster in line with its tenant source.
///
/// Items carry identity only: implementations re-read current state and must
/// be idempotent, since the same item can be dispatched again with nothing
/// changed in between.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, item: &WorkItem) -> Result<ReconcileResult, ReconcileError>;
}
