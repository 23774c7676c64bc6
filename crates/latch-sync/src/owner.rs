//! Owner registry.
//!
//! Every process participating in coordination registers exactly one owner
//! entry: a unique `<name>-<uuid>` identity with a `lastSeen` heartbeat.
//! A heartbeat task refreshes the entry at a fixed interval and ages out
//! peers that missed enough updates, so any process can detect and clean up
//! after a crashed peer. On clean shutdown the process deletes its own
//! entry.
//!
//! The update interval and missed threshold must be uniform across the
//! fleet; a process observing the deletion of its own live entry has been
//! declared dead by a peer and must fail loudly.

use async_trait::async_trait;
use latch_commons::time::unix_now;
use latch_commons::{Error, ErrorKind, Result};
use latch_store::{Collection, EventOp, Filter, Store, WatchHandler};
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Collection name for the ownership table.
pub(crate) const OWNERSHIP_COLLECTION: &str = "owner-table";

/// Default periodic interval for refreshing the owner's last-seen time.
const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// Number of missed refresh iterations before an entry is aged out.
const AGE_UPDATE_MISSED: u32 = 3;

/// Unique process identity within the owner collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey {
    pub name: String,
}

/// Stored owner record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerRecord {
    #[serde(rename = "lastSeen")]
    pub last_seen: i64,
}

/// One process's anchored identity in the coordination fabric.
///
/// Obtained through [`initialize_owner`] (process singleton) or
/// [`OwnerTable::start`] (explicit handle; tests run several against one
/// store to model a fleet).
pub struct OwnerTable {
    token: CancellationToken,
    store: Arc<dyn Store>,
    col: Arc<dyn Collection>,
    key: OwnerKey,
    update_interval: Duration,
}

impl std::fmt::Debug for OwnerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerTable")
            .field("key", &self.key)
            .field("update_interval", &self.update_interval)
            .finish_non_exhaustive()
    }
}

struct SelfDeleteWatcher {
    self_key: OwnerKey,
}

#[async_trait]
impl WatchHandler for SelfDeleteWatcher {
    async fn on_event(&self, _op: EventOp, key: &Value) {
        let Ok(key) = serde_json::from_value::<OwnerKey>(key.clone()) else {
            panic!("owner table: undecodable delete notification key {key}");
        };
        if key.name == self.self_key.name {
            // A peer aged us out while we are still alive. Coordination
            // state anchored to this identity is gone fleet-wide.
            panic!("owner table: receiving delete notification of self");
        }
    }
}

impl OwnerTable {
    /// Registers this process in the owner collection and starts the
    /// heartbeat task.
    ///
    /// The heartbeat refreshes `lastSeen` every `update_interval` and
    /// deletes peers whose `lastSeen` fell behind by more than
    /// `AGE_UPDATE_MISSED` intervals. Cancelling `token` releases the
    /// self entry and stops the task.
    pub async fn start(
        token: CancellationToken,
        store: Arc<dyn Store>,
        name: &str,
        update_interval: Duration,
    ) -> Result<Arc<Self>> {
        let col = store.collection(OWNERSHIP_COLLECTION);

        let id = if name.is_empty() { "unknown" } else { name };
        let key = OwnerKey {
            name: format!("{}-{}", id, Uuid::new_v4()),
        };

        // Watch only for delete notifications; observing our own deletion
        // is fatal.
        col.watch(
            token.child_token(),
            Some(vec![EventOp::Delete]),
            Arc::new(SelfDeleteWatcher {
                self_key: key.clone(),
            }),
        )?;

        let record = OwnerRecord {
            last_seen: unix_now(),
        };
        col.insert_one(
            &serde_json::to_value(&key)
                .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, e.to_string()))?,
            &serde_json::to_value(&record)
                .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, e.to_string()))?,
        )
        .await?;

        let table = Arc::new(Self {
            token,
            store,
            col,
            key,
            update_interval,
        });

        table.clone().spawn_heartbeat();
        Ok(table)
    }

    /// Keep the self entry active and age out peers that stopped updating.
    fn spawn_heartbeat(self: Arc<Self>) {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.update_interval;
            let mut ticker = tokio::time::interval_at(start, self.update_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.update_last_seen().await;
                        self.delete_aged_entries().await;
                    }
                    _ = self.token.cancelled() => {
                        // Exiting the update loop; release self ownership so
                        // peers do not need to wait for the age-out.
                        let key = serde_json::to_value(&self.key)
                            .expect("owner key serializes");
                        if let Err(err) = self.col.delete_one(&key).await {
                            log::warn!(
                                "failed deleting self owner entry {}: {err}",
                                self.key.name
                            );
                        }
                        return;
                    }
                }
            }
        });
    }

    async fn update_last_seen(&self) {
        let key = serde_json::to_value(&self.key).expect("owner key serializes");
        let record = OwnerRecord {
            last_seen: unix_now(),
        };
        let data = serde_json::to_value(&record).expect("owner record serializes");
        if let Err(err) = self.col.update_one(&key, &data, false).await {
            // The process can no longer anchor coordination primitives.
            panic!("failed to update ownership table: {err}");
        }
    }

    async fn delete_aged_entries(&self) {
        let cutoff =
            unix_now() - (AGE_UPDATE_MISSED as i64) * (self.update_interval.as_secs() as i64);
        let filter = Filter::lt("lastSeen", cutoff);
        if let Err(err) = self.col.delete_many(Some(&filter)).await {
            if !err.is_not_found() {
                log::warn!("failed to delete aged owner table entries: {err}");
            }
        }
    }

    /// Full unique identity of this owner (`<name>-<uuid>`).
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// The owner key of this process.
    pub fn key(&self) -> &OwnerKey {
        &self.key
    }

    /// Cancellation scope all dependent primitives derive from.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The store this owner is registered in.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn collection(&self) -> &Arc<dyn Collection> {
        &self.col
    }
}

static OWNER_TABLE: OnceCell<Arc<OwnerTable>> = OnceCell::new();
static OWNER_INIT: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

/// Initializes the process-wide owner registry with the default heartbeat
/// interval.
///
/// Anyone working with this library must call this before consuming locks
/// or providers. It is the caller's responsibility to provide a uniform
/// store definition across all consuming processes.
pub async fn initialize_owner(
    token: CancellationToken,
    store: Arc<dyn Store>,
    name: &str,
) -> Result<Arc<OwnerTable>> {
    initialize_owner_with_interval(token, store, name, DEFAULT_UPDATE_INTERVAL).await
}

/// Initializes the process-wide owner registry with a configurable
/// heartbeat interval.
///
/// Fails *already-exists* when the registry is already initialized. The
/// interval must match across the fleet for age-out to behave.
pub async fn initialize_owner_with_interval(
    token: CancellationToken,
    store: Arc<dyn Store>,
    name: &str,
    interval: Duration,
) -> Result<Arc<OwnerTable>> {
    let _guard = OWNER_INIT.lock().await;
    if OWNER_TABLE.get().is_some() {
        return Err(Error::wrap(
            ErrorKind::AlreadyExists,
            "sync owner table is already initialized",
        ));
    }
    let table = OwnerTable::start(token, store, name, interval).await?;
    let _ = OWNER_TABLE.set(table.clone());
    Ok(table)
}

/// Returns the process-wide owner registry.
///
/// Fails *invalid-argument* when [`initialize_owner`] has not been called.
pub fn owner() -> Result<Arc<OwnerTable>> {
    OWNER_TABLE
        .get()
        .cloned()
        .ok_or_else(|| Error::wrap(ErrorKind::InvalidArgument, "owner table infra not initialized"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use latch_store::{MemoryClient, StoreClient};
    use serde_json::json;

    #[tokio::test]
    async fn test_owner_registers_with_unique_suffix() {
        let store = MemoryClient::new().data_store("owner-unit");
        let token = CancellationToken::new();

        let a = OwnerTable::start(token.child_token(), store.clone(), "svc", Duration::from_secs(60))
            .await
            .unwrap();
        let b = OwnerTable::start(token.child_token(), store.clone(), "svc", Duration::from_secs(60))
            .await
            .unwrap();

        assert_ne!(a.name(), b.name());
        assert!(a.name().starts_with("svc-"));

        let col = store.collection(OWNERSHIP_COLLECTION);
        assert_eq!(col.count(None).await.unwrap(), 2);
        token.cancel();
    }

    #[tokio::test]
    async fn test_empty_name_falls_back_to_unknown() {
        let store = MemoryClient::new().data_store("owner-unknown");
        let token = CancellationToken::new();
        let owner = OwnerTable::start(token.clone(), store, "", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(owner.name().starts_with("unknown-"));
        token.cancel();
    }

    #[tokio::test]
    async fn test_clean_shutdown_deletes_self_entry() {
        let store = MemoryClient::new().data_store("owner-shutdown");
        let token = CancellationToken::new();
        let owner = OwnerTable::start(token.clone(), store.clone(), "svc", Duration::from_secs(1))
            .await
            .unwrap();

        let col = store.collection(OWNERSHIP_COLLECTION);
        assert_eq!(col.count(None).await.unwrap(), 1);

        token.cancel();
        for _ in 0..50 {
            if col.count(None).await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(col.count(None).await.unwrap(), 0);

        let key = json!({"name": owner.name()});
        assert!(col.find_one(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_last_seen() {
        let store = MemoryClient::new().data_store("owner-heartbeat");
        let token = CancellationToken::new();
        let owner = OwnerTable::start(token.clone(), store.clone(), "hb", Duration::from_secs(1))
            .await
            .unwrap();

        let col = store.collection(OWNERSHIP_COLLECTION);
        let key = json!({"name": owner.name()});
        let before = col.find_one(&key).await.unwrap()["lastSeen"].as_i64().unwrap();

        tokio::time::sleep(Duration::from_millis(2200)).await;
        let after = col.find_one(&key).await.unwrap()["lastSeen"].as_i64().unwrap();
        assert!(after > before, "heartbeat should refresh lastSeen");
        token.cancel();
    }
}
