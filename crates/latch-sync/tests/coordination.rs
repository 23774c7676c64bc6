//! Fleet-level coordination scenarios.
//!
//! Each "process" is an explicit owner handle plus its dependent tables,
//! all sharing one in-memory store. That is the same topology a real fleet
//! has against a shared document store, minus the network.

use async_trait::async_trait;
use latch_commons::Result;
use latch_reconciler::{Controller, ReconcileResult};
use latch_store::{MemoryClient, Store, StoreClient};
use latch_sync::{LockTable, OwnerTable, ProviderTable};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct TestLockKey {
    scope: String,
    name: String,
}

async fn start_owner(store: &Arc<dyn Store>, name: &str, interval: Duration) -> Arc<OwnerTable> {
    OwnerTable::start(CancellationToken::new(), store.clone(), name, interval)
        .await
        .expect("owner registration")
}

async fn wait_for_count(
    col: &Arc<dyn latch_store::Collection>,
    expected: i64,
    within: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if col.count(None).await.unwrap() == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    col.count(None).await.unwrap() == expected
}

/// A stalled process is aged out by a peer, and its locks die with it.
#[tokio::test]
async fn owner_age_out_reclaims_locks() {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = MemoryClient::new().data_store("ageout");

    // Process A registers but never heartbeats again (its interval is far
    // beyond the test horizon), simulating a crash or partition.
    let owner_a = start_owner(&store, "proc-a", Duration::from_secs(3600)).await;
    let locks_a = LockTable::<TestLockKey>::open(owner_a.clone(), &store, "age-locks").unwrap();
    let _held = locks_a
        .try_acquire(&TestLockKey {
            scope: "scope-1".into(),
            name: "test-key".into(),
        })
        .await
        .unwrap();

    // Process B heartbeats every second with the standard missed threshold.
    let owner_b = start_owner(&store, "proc-b", Duration::from_secs(1)).await;
    let _locks_b = LockTable::<TestLockKey>::open(owner_b.clone(), &store, "age-locks").unwrap();

    let owner_col = store.collection("owner-table");
    let lock_col = store.collection("age-locks");

    // B observes both owners before A goes stale.
    assert_eq!(owner_col.count(None).await.unwrap(), 2);
    assert_eq!(lock_col.count(None).await.unwrap(), 1);

    // Within missed-threshold x interval (plus one sweep), B ages A out.
    let aged = wait_for_count(&owner_col, 1, Duration::from_secs(8)).await;
    assert!(aged, "peer should age out the stalled owner");

    // A's locks are deleted as a consequence of the owner release.
    let reclaimed = wait_for_count(&lock_col, 0, Duration::from_secs(3)).await;
    assert!(reclaimed, "stalled owner's locks should be reclaimed");

    owner_b.token().cancel();
}

/// Lock contention across two processes: first writer wins, release hands
/// the lock over.
#[tokio::test]
async fn lock_contention_and_handover() {
    let store = MemoryClient::new().data_store("contention");
    let owner_a = start_owner(&store, "a", Duration::from_secs(60)).await;
    let owner_b = start_owner(&store, "b", Duration::from_secs(60)).await;

    let locks_a = LockTable::<TestLockKey>::open(owner_a.clone(), &store, "c-locks").unwrap();
    let locks_b = LockTable::<TestLockKey>::open(owner_b.clone(), &store, "c-locks").unwrap();

    let key = TestLockKey {
        scope: "scope-1".into(),
        name: "test-key".into(),
    };

    let held = locks_a.try_acquire(&key).await.unwrap();
    let err = locks_b.try_acquire(&key).await.unwrap_err();
    assert!(err.is_already_exists());

    held.close().await.unwrap();
    let handed_over = locks_b.try_acquire(&key).await.unwrap();
    handed_over.close().await.unwrap();

    owner_a.token().cancel();
    owner_b.token().cancel();
}

struct AvailabilityObserver {
    table: Arc<ProviderTable>,
    available: Mutex<HashSet<String>>,
    invocations: Mutex<Vec<String>>,
}

#[async_trait]
impl Controller<String> for AvailabilityObserver {
    async fn reconcile(&self, key: &String) -> Result<ReconcileResult> {
        self.invocations.lock().push(key.clone());
        if self.table.is_provider_available(key) {
            self.available.lock().insert(key.clone());
        } else {
            self.available.lock().remove(key);
        }
        Ok(ReconcileResult::done())
    }
}

/// Provider fan-out across three processes: de-duplicated availability,
/// one notification per transition.
#[tokio::test]
async fn provider_fan_out_across_processes() {
    let store = MemoryClient::new().data_store("fanout");

    let owner_a = start_owner(&store, "a", Duration::from_secs(60)).await;
    let owner_b = start_owner(&store, "b", Duration::from_secs(60)).await;
    let owner_c = start_owner(&store, "c", Duration::from_secs(60)).await;

    let prov_a = ProviderTable::open(owner_a.clone(), &store, "prov").unwrap();
    let prov_b = ProviderTable::open(owner_b.clone(), &store, "prov").unwrap();
    let prov_c = ProviderTable::open(owner_c.clone(), &store, "prov").unwrap();

    let observer = Arc::new(AvailabilityObserver {
        table: prov_c.clone(),
        available: Mutex::new(HashSet::new()),
        invocations: Mutex::new(Vec::new()),
    });
    prov_c.register("availability", observer.clone()).unwrap();

    // Two processes provide the same capability.
    let p_a = prov_a.create_provider("capability-X").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let p_b = prov_b.create_provider("capability-X").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Every process's observer set contains the key exactly once.
    assert_eq!(prov_a.provider_list(), vec!["capability-X".to_string()]);
    assert_eq!(prov_b.provider_list(), vec!["capability-X".to_string()]);
    assert_eq!(prov_c.provider_list(), vec!["capability-X".to_string()]);
    assert!(observer.available.lock().contains("capability-X"));
    let invocations_after_create = observer.invocations.lock().len();

    // One provider closes: the key stays available, no new transition.
    p_a.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(prov_c.is_provider_available("capability-X"));
    assert_eq!(observer.invocations.lock().len(), invocations_after_create);

    // The last provider closes: the key disappears and the controller sees
    // the absent state.
    p_b.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!prov_c.is_provider_available("capability-X"));
    assert!(!observer.available.lock().contains("capability-X"));
    assert!(observer.invocations.lock().len() > invocations_after_create);

    owner_a.token().cancel();
    owner_b.token().cancel();
    owner_c.token().cancel();
}
