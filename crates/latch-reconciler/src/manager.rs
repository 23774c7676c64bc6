//! Reconciliation manager.
//!
//! Owned by a typed table or the provider registry's observer set. Holds a
//! map from controller name to pipeline, fans change notifications out to
//! every pipeline, and bootstraps each newly registered controller against
//! the keys that already exist in the parent.

use crate::controller::Controller;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use latch_commons::{Error, ErrorKind, Result};
use std::hash::Hash;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// Enumerates the keys currently present in the parent entity.
///
/// For a store-backed table this queries the store for all primary keys;
/// for the provider registry's observer set it snapshots the in-memory set.
#[async_trait]
pub trait KeySource<K>: Send + Sync
where
    K: Send + Sync,
{
    async fn all_keys(&self) -> Vec<K>;
}

struct ManagerState<K>
where
    K: Send + Sync + 'static,
{
    token: CancellationToken,
    parent: Weak<dyn KeySource<K>>,
}

/// Manager fanning reconciliation work out to registered controllers.
///
/// Initialization is write-once: a second `initialize` fails
/// *already-exists*, and `register` before initialization fails
/// *invalid-argument*.
pub struct Manager<K>
where
    K: Send + Sync + 'static,
{
    state: once_cell::sync::OnceCell<ManagerState<K>>,
    controllers: DashMap<String, Pipeline<K>>,
}

impl<K> Default for Manager<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Manager<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            state: once_cell::sync::OnceCell::new(),
            controllers: DashMap::new(),
        }
    }

    /// Initializes the manager with its cancellation scope and parent.
    ///
    /// The parent is held weakly; tables embed a manager and hand in a weak
    /// reference to themselves.
    pub fn initialize(&self, token: CancellationToken, parent: Weak<dyn KeySource<K>>) -> Result<()> {
        self.state
            .set(ManagerState { token, parent })
            .map_err(|_| Error::wrap(ErrorKind::AlreadyExists, "initialization already done"))
    }

    /// True once `initialize` succeeded.
    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    /// Registers a controller under a unique name.
    ///
    /// Creates the controller's pipeline, then asynchronously enqueues every
    /// key the parent currently knows so the controller reconciles existing
    /// state before (and interleaved with) live notifications.
    pub fn register(&self, name: &str, controller: Arc<dyn Controller<K>>) -> Result<()> {
        let state = self
            .state
            .get()
            .ok_or_else(|| Error::wrap(ErrorKind::InvalidArgument, "manager is not initialized"))?;

        let pipeline = match self.controllers.entry(name.to_string()) {
            Entry::Occupied(_) => {
                return Err(Error::wrap(
                    ErrorKind::AlreadyExists,
                    format!("reconciler {name} already exists"),
                ))
            }
            Entry::Vacant(slot) => {
                let pipeline = Pipeline::new(state.token.child_token(), controller);
                slot.insert(pipeline.clone());
                pipeline
            }
        };

        // Trigger reconciliation of existing entries separately, so
        // registration returns without waiting on the store.
        let parent = state.parent.clone();
        tokio::spawn(async move {
            let Some(parent) = parent.upgrade() else {
                return;
            };
            for key in parent.all_keys().await {
                if pipeline.enqueue(key).await.is_err() {
                    return;
                }
            }
        });

        Ok(())
    }

    /// Callback invoked by the owning entity's watch handler.
    ///
    /// Enqueues the key on every registered pipeline. Pipelines that were
    /// already stopped by cancellation are skipped silently.
    pub async fn notify(&self, key: &K) {
        for entry in self.controllers.iter() {
            if let Err(err) = entry.value().enqueue(key.clone()).await {
                log::debug!(
                    "skipping notification for stopped pipeline {}: {err}",
                    entry.key()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ReconcileResult;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct FixedSource {
        keys: Vec<String>,
    }

    #[async_trait]
    impl KeySource<String> for FixedSource {
        async fn all_keys(&self) -> Vec<String> {
            self.keys.clone()
        }
    }

    struct Collecting {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Controller<String> for Collecting {
        async fn reconcile(&self, key: &String) -> Result<ReconcileResult> {
            self.seen.lock().push(key.clone());
            Ok(ReconcileResult::done())
        }
    }

    #[tokio::test]
    async fn test_register_requires_initialize() {
        let manager: Manager<String> = Manager::new();
        let controller = Arc::new(Collecting {
            seen: Mutex::new(Vec::new()),
        });
        let err = manager.register("c", controller).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_double_initialize_fails() {
        let manager: Manager<String> = Manager::new();
        let parent: Arc<dyn KeySource<String>> = Arc::new(FixedSource { keys: vec![] });
        manager
            .initialize(CancellationToken::new(), Arc::downgrade(&parent))
            .unwrap();
        let err = manager
            .initialize(CancellationToken::new(), Arc::downgrade(&parent))
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_register_bootstraps_existing_keys() {
        let manager: Manager<String> = Manager::new();
        let parent: Arc<dyn KeySource<String>> = Arc::new(FixedSource {
            keys: vec!["a".into(), "b".into(), "c".into()],
        });
        manager
            .initialize(CancellationToken::new(), Arc::downgrade(&parent))
            .unwrap();

        let controller = Arc::new(Collecting {
            seen: Mutex::new(Vec::new()),
        });
        manager.register("boot", controller.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut seen = controller.seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let manager: Manager<String> = Manager::new();
        let parent: Arc<dyn KeySource<String>> = Arc::new(FixedSource { keys: vec![] });
        manager
            .initialize(CancellationToken::new(), Arc::downgrade(&parent))
            .unwrap();

        let mk = || {
            Arc::new(Collecting {
                seen: Mutex::new(Vec::new()),
            })
        };
        manager.register("same", mk()).unwrap();
        let err = manager.register("same", mk()).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_notify_reaches_all_controllers() {
        let manager: Manager<String> = Manager::new();
        let parent: Arc<dyn KeySource<String>> = Arc::new(FixedSource { keys: vec![] });
        manager
            .initialize(CancellationToken::new(), Arc::downgrade(&parent))
            .unwrap();

        let c1 = Arc::new(Collecting {
            seen: Mutex::new(Vec::new()),
        });
        let c2 = Arc::new(Collecting {
            seen: Mutex::new(Vec::new()),
        });
        manager.register("one", c1.clone()).unwrap();
        manager.register("two", c2.clone()).unwrap();

        manager.notify(&"k".to_string()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(c1.seen.lock().as_slice(), &["k".to_string()]);
        assert_eq!(c2.seen.lock().as_slice(), &["k".to_string()]);
    }
}
