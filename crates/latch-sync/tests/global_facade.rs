//! Process-wide singleton facade.
//!
//! Runs as its own test binary so the write-once globals start clean.

use latch_store::{MemoryClient, StoreClient};
use latch_sync::{
    initialize_owner_with_interval, locate_lock_table, locate_provider_table, owner,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct NameKey {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct NumberKey {
    number: i64,
}

#[tokio::test]
async fn singleton_initialization_and_lookup() {
    let store = MemoryClient::new().data_store("facade");

    // Lock and provider infra refuse to come up before the owner does.
    assert!(locate_lock_table::<NameKey>(&store, "early-locks")
        .unwrap_err()
        .is_invalid_argument());
    assert!(locate_provider_table(&store).unwrap_err().is_invalid_argument());
    assert!(owner().unwrap_err().is_invalid_argument());

    let token = CancellationToken::new();
    let registered =
        initialize_owner_with_interval(token.clone(), store.clone(), "svc", Duration::from_secs(60))
            .await
            .unwrap();
    assert!(registered.name().starts_with("svc-"));

    // A second initialization in the same process is refused.
    let err = initialize_owner_with_interval(
        CancellationToken::new(),
        store.clone(),
        "svc",
        Duration::from_secs(60),
    )
    .await
    .unwrap_err();
    assert!(err.is_already_exists());

    // Repeated lookups return the same lock table instance.
    let locks_a = locate_lock_table::<NameKey>(&store, "app-locks").unwrap();
    let locks_b = locate_lock_table::<NameKey>(&store, "app-locks").unwrap();
    assert!(std::sync::Arc::ptr_eq(&locks_a, &locks_b));

    // The same collection with a different key type is refused.
    let err = locate_lock_table::<NumberKey>(&store, "app-locks").unwrap_err();
    assert!(err.is_already_exists());

    // Locks acquired through the facade carry the singleton owner.
    let held = locks_a
        .try_acquire(&NameKey { name: "k".into() })
        .await
        .unwrap();
    held.close().await.unwrap();

    // Provider table is a singleton as well.
    let prov_a = locate_provider_table(&store).unwrap();
    let prov_b = locate_provider_table(&store).unwrap();
    assert!(std::sync::Arc::ptr_eq(&prov_a, &prov_b));

    let provider = prov_a.create_provider("facade-cap").await.unwrap();
    for _ in 0..50 {
        if prov_a.is_provider_available("facade-cap") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(prov_a.is_provider_available("facade-cap"));
    provider.close().await.unwrap();

    token.cancel();
}
