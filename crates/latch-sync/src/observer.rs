//! Observer set for provider availability.
//!
//! Derived, per-process state: the set of external keys that currently have
//! at least one live provider. Insertions and removals are idempotent, and
//! only actual transitions notify the registered controllers; a second
//! provider appearing for a key that is already present is absorbed.

use async_trait::async_trait;
use latch_commons::Result;
use latch_reconciler::{Controller, KeySource, Manager};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// In-memory set of external keys with at least one live provider, with a
/// reconciliation manager fanning transitions out to controllers.
pub struct ObserverTable {
    manager: Manager<String>,
    providers: RwLock<HashSet<String>>,
}

#[async_trait]
impl KeySource<String> for ObserverTable {
    async fn all_keys(&self) -> Vec<String> {
        self.provider_list()
    }
}

impl ObserverTable {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            manager: Manager::new(),
            providers: RwLock::new(HashSet::new()),
        })
    }

    pub(crate) fn initialize(self: &Arc<Self>, token: CancellationToken) -> Result<()> {
        let source: Arc<dyn KeySource<String>> = self.clone();
        self.manager.initialize(token, Arc::downgrade(&source))
    }

    /// Registers a controller notified on availability transitions.
    pub fn register(&self, name: &str, controller: Arc<dyn Controller<String>>) -> Result<()> {
        self.manager.register(name, controller)
    }

    /// Snapshot of the external keys currently available.
    pub fn provider_list(&self) -> Vec<String> {
        self.providers.read().iter().cloned().collect()
    }

    /// True when at least one live provider exists for the key.
    pub fn is_provider_available(&self, key: &str) -> bool {
        self.providers.read().contains(key)
    }

    /// Records that the key has at least one provider; notifies controllers
    /// on the absent-to-present transition only.
    pub(crate) async fn insert_provider(&self, key: &str) {
        let inserted = {
            let mut providers = self.providers.write();
            providers.insert(key.to_string())
        };
        if inserted {
            self.manager.notify(&key.to_string()).await;
        }
    }

    /// Records that the key has no providers left; notifies controllers on
    /// the present-to-absent transition only.
    pub(crate) async fn delete_provider(&self, key: &str) {
        let removed = {
            let mut providers = self.providers.write();
            providers.remove(key)
        };
        if removed {
            self.manager.notify(&key.to_string()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latch_reconciler::ReconcileResult;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Transitions {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Controller<String> for Transitions {
        async fn reconcile(&self, key: &String) -> Result<ReconcileResult> {
            self.seen.lock().push(key.clone());
            Ok(ReconcileResult::done())
        }
    }

    #[tokio::test]
    async fn test_idempotent_transitions() {
        let observer = ObserverTable::new();
        observer.initialize(CancellationToken::new()).unwrap();

        let controller = Arc::new(Transitions {
            seen: Mutex::new(Vec::new()),
        });
        observer.register("watch", controller.clone()).unwrap();

        observer.insert_provider("cap-x").await;
        observer.insert_provider("cap-x").await;
        observer.insert_provider("cap-x").await;
        assert!(observer.is_provider_available("cap-x"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        observer.delete_provider("cap-x").await;
        observer.delete_provider("cap-x").await;
        assert!(!observer.is_provider_available("cap-x"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // One notification per actual transition: present, then absent.
        assert_eq!(controller.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_provider_list_snapshot() {
        let observer = ObserverTable::new();
        observer.initialize(CancellationToken::new()).unwrap();

        observer.insert_provider("a").await;
        observer.insert_provider("b").await;

        let mut list = observer.provider_list();
        list.sort();
        assert_eq!(list, vec!["a".to_string(), "b".to_string()]);
    }
}
