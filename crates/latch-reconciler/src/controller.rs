//! Controller contract for reconciliation.

use async_trait::async_trait;
use latch_commons::Result;
use std::time::Duration;

/// Outcome of one reconcile invocation.
///
/// A populated `requeue_after` tells the pipeline to re-enqueue the key
/// after the duration; otherwise the work item is considered complete.
#[derive(Debug, Clone, Default)]
pub struct ReconcileResult {
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// The key was fully reconciled; drop it.
    pub fn done() -> Self {
        Self::default()
    }

    /// Revisit the key after the given duration.
    pub fn requeue_after(duration: Duration) -> Self {
        Self {
            requeue_after: Some(duration),
        }
    }
}

/// Controller interface meant for registering with a reconciliation manager
/// to process changes occurring to entries of a store-backed table.
///
/// Returning an error re-enqueues the key immediately (with coalescing
/// against any fresh notification for the same key).
#[async_trait]
pub trait Controller<K>: Send + Sync
where
    K: Send + Sync,
{
    async fn reconcile(&self, key: &K) -> Result<ReconcileResult>;
}
