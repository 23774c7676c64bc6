//! Cross-process cache convergence.
//!
//! Two cached tables over the same collection model two processes sharing a
//! store: a write in one process reaches the other's cache through the
//! change feed within the staleness bound.

use latch_tables::{CacheMode, CachedTable};
use latch_store::{MemoryClient, StoreClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct UserKey {
    id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    email: String,
}

async fn eventually<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check().await
}

#[tokio::test]
async fn cached_table_write_through_between_processes() {
    let client = MemoryClient::new();

    let local: Arc<CachedTable<UserKey, User>> = CachedTable::new();
    local
        .initialize(
            client.collection("app", "users"),
            CacheMode::Eager,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let remote: Arc<CachedTable<UserKey, User>> = CachedTable::new();
    remote
        .initialize(
            client.collection("app", "users"),
            CacheMode::Eager,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let alice = UserKey { id: "alice".into() };

    // Local insert; the remote cache converges via the change feed.
    local
        .insert(
            &alice,
            &User {
                email: "a@x".into(),
            },
        )
        .await
        .unwrap();

    let seen = eventually(|| {
        let remote = remote.clone();
        let alice = alice.clone();
        async move {
            matches!(remote.find(&alice).await, Ok(user) if user.email == "a@x")
        }
    })
    .await;
    assert!(seen, "insert should reach the remote cache");

    // Remote update; the local cache follows.
    remote
        .update(
            &alice,
            &User {
                email: "a@y".into(),
            },
        )
        .await
        .unwrap();

    let seen = eventually(|| {
        let local = local.clone();
        let alice = alice.clone();
        async move {
            matches!(local.find(&alice).await, Ok(user) if user.email == "a@y")
        }
    })
    .await;
    assert!(seen, "update should reach the local cache");

    // Strong reads bypass the cache either way.
    assert_eq!(local.db_find(&alice).await.unwrap().email, "a@y");

    // Remote delete clears the local cache entry.
    remote.delete_key(&alice).await.unwrap();
    let gone = eventually(|| {
        let local = local.clone();
        let alice = alice.clone();
        async move { local.find(&alice).await.is_err() }
    })
    .await;
    assert!(gone, "delete should clear the local cache");
}
