//! Coalescing work pipeline.
//!
//! Producers and consumers work at different speeds, so each pipeline is a
//! buffered channel (capacity 1024) paired with a membership set. The set
//! decides whether an enqueued key actually needs a channel slot: a key that
//! is already waiting absorbs the new notification. The key is removed from
//! the set at dequeue time, so a notification arriving while the key is
//! being reconciled queues one more pass.

use crate::controller::Controller;
use dashmap::DashSet;
use latch_commons::{Error, ErrorKind, Result};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Buffered channel length for every pipeline.
const BUFFER_LENGTH: usize = 1024;

struct PipelineInner<K> {
    token: CancellationToken,
    pending: DashSet<K>,
    tx: mpsc::Sender<K>,
}

impl<K> PipelineInner<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    async fn enqueue(&self, key: K) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::wrap(ErrorKind::Unknown, "pipeline is stopped"));
        }
        // Insert-or-check on the membership set compresses multiple
        // notifications for one key into a single pending pass.
        if self.pending.insert(key.clone()) {
            if self.tx.send(key.clone()).await.is_err() {
                self.pending.remove(&key);
                return Err(Error::wrap(ErrorKind::Unknown, "pipeline is stopped"));
            }
        }
        Ok(())
    }
}

/// Pipeline of keys to be processed by a controller upon notification.
///
/// Cloning is cheap and shares the same queue.
pub struct Pipeline<K> {
    inner: Arc<PipelineInner<K>>,
}

impl<K> Clone for Pipeline<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> Pipeline<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Creates a pipeline and starts its dequeue loop.
    ///
    /// The loop runs until `token` is cancelled; an in-flight reconcile
    /// completes before the loop observes the cancellation.
    pub fn new(token: CancellationToken, controller: Arc<dyn Controller<K>>) -> Self {
        let (tx, rx) = mpsc::channel(BUFFER_LENGTH);
        let inner = Arc::new(PipelineInner {
            token,
            pending: DashSet::new(),
            tx,
        });
        tokio::spawn(run(inner.clone(), rx, controller));
        Self { inner }
    }

    /// Enqueues a key for reconciliation.
    ///
    /// Absorbed when the key is already waiting. Returns an error when the
    /// pipeline is already stopped.
    pub async fn enqueue(&self, key: K) -> Result<()> {
        self.inner.enqueue(key).await
    }

    /// True once the pipeline's cancellation token fired.
    pub fn is_stopped(&self) -> bool {
        self.inner.token.is_cancelled()
    }
}

async fn run<K>(
    inner: Arc<PipelineInner<K>>,
    mut rx: mpsc::Receiver<K>,
    controller: Arc<dyn Controller<K>>,
) where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    loop {
        let key = tokio::select! {
            _ = inner.token.cancelled() => return,
            key = rx.recv() => match key {
                Some(key) => key,
                None => return,
            },
        };

        // Drop membership before reconciling so a change landing mid-flight
        // queues one more pass instead of being lost.
        inner.pending.remove(&key);

        match controller.reconcile(&key).await {
            Err(err) => {
                log::debug!("reconcile failed, requeuing: {err}");
                let _ = inner.enqueue(key).await;
            }
            Ok(result) => {
                if let Some(delay) = result.requeue_after {
                    let inner = inner.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = inner.token.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {
                                let _ = inner.enqueue(key).await;
                            }
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ReconcileResult;
    use async_trait::async_trait;
    use latch_commons::Error;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::sync::Notify;

    struct Counting {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl Controller<String> for Counting {
        async fn reconcile(&self, _key: &String) -> latch_commons::Result<ReconcileResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(Error::new("transient"));
            }
            Ok(ReconcileResult::done())
        }
    }

    #[tokio::test]
    async fn test_retry_on_error() {
        let controller = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_first: 2,
        });
        let pipeline = Pipeline::new(CancellationToken::new(), controller.clone());

        pipeline.enqueue("k".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(controller.calls.load(Ordering::SeqCst), 3);
    }

    struct Gated {
        started: Arc<Notify>,
        release: Arc<Notify>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Controller<String> for Gated {
        async fn reconcile(&self, _key: &String) -> latch_commons::Result<ReconcileResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            Ok(ReconcileResult::done())
        }
    }

    #[tokio::test]
    async fn test_duplicate_enqueues_coalesce() {
        let controller = Arc::new(Gated {
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
        });
        let pipeline = Pipeline::new(CancellationToken::new(), controller.clone());

        pipeline.enqueue("k".to_string()).await.unwrap();
        controller.started.notified().await;

        // Five notifications while the first reconcile is in flight compress
        // into a single follow-up pass.
        for _ in 0..5 {
            pipeline.enqueue("k".to_string()).await.unwrap();
        }
        controller.release.notify_one();
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.release.notify_one();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(controller.calls.load(Ordering::SeqCst), 2);
    }

    struct DeferredOnce {
        times: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl Controller<String> for DeferredOnce {
        async fn reconcile(&self, _key: &String) -> latch_commons::Result<ReconcileResult> {
            let mut times = self.times.lock();
            times.push(Instant::now());
            if times.len() == 1 {
                return Ok(ReconcileResult::requeue_after(Duration::from_millis(80)));
            }
            Ok(ReconcileResult::done())
        }
    }

    #[tokio::test]
    async fn test_deferred_requeue() {
        let controller = Arc::new(DeferredOnce {
            times: Mutex::new(Vec::new()),
        });
        let pipeline = Pipeline::new(CancellationToken::new(), controller.clone());

        pipeline.enqueue("k".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let times = controller.times.lock();
        assert_eq!(times.len(), 2);
        assert!(times[1].duration_since(times[0]) >= Duration::from_millis(70));
    }

    #[tokio::test]
    async fn test_enqueue_after_cancel_fails() {
        let token = CancellationToken::new();
        let controller = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_first: 0,
        });
        let pipeline = Pipeline::new(token.clone(), controller);

        token.cancel();
        assert!(pipeline.enqueue("k".to_string()).await.is_err());
        assert!(pipeline.is_stopped());
    }

    #[tokio::test]
    async fn test_deferred_requeue_noops_after_cancel() {
        let token = CancellationToken::new();
        let controller = Arc::new(DeferredOnce {
            times: Mutex::new(Vec::new()),
        });
        let pipeline = Pipeline::new(token.clone(), controller.clone());

        pipeline.enqueue("k".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(controller.times.lock().len(), 1);
    }
}
