//! Provider registry with observer fan-out.
//!
//! Providers are the multi-holder analogue of locks: many owners may
//! register under the same external key, each under a fresh provider id, so
//! uniqueness is on the composite `{extKey, providerId, createTime}` key.
//! Every process derives an observer set from the collection (the external
//! keys with at least one live provider) and registered controllers are
//! notified on each availability transition.
//!
//! Cleanup mirrors the lock table: an owner's death removes every provider
//! it created, via the owner-delete subscription and the convergence check
//! on provider-collection events.

use async_trait::async_trait;
use latch_commons::time::unix_now;
use latch_commons::{Error, ErrorKind, Result};
use latch_reconciler::Controller;
use latch_store::{Collection, EventOp, Filter, FindOptions, Store, WatchHandler};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::observer::ObserverTable;
use crate::owner::{owner, OwnerKey, OwnerTable};

/// Standard provider table collection name.
pub const DEFAULT_PROVIDER_TABLE: &str = "provider-table";

/// Composite provider identity.
///
/// The external key is the application-meaningful capability name; the
/// provider id is a fresh UUID per registration so several providers for
/// one external key coexist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderKey {
    #[serde(rename = "extKey")]
    pub ext_key: String,
    #[serde(rename = "providerId")]
    pub provider_id: Uuid,
    #[serde(rename = "createTime")]
    pub create_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProviderRecord {
    owner: String,
}

/// A registered provider. Closing deletes the provider document.
pub struct ProviderHandle {
    key: Value,
    col: Arc<dyn Collection>,
}

impl ProviderHandle {
    /// Withdraws this provider.
    pub async fn close(self) -> Result<()> {
        self.col.delete_one(&self.key).await
    }
}

/// Process-wide provider registry over one collection.
pub struct ProviderTable {
    col: Arc<dyn Collection>,
    owner: Arc<OwnerTable>,
    observer: Arc<ObserverTable>,
}

impl std::fmt::Debug for ProviderTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTable").finish_non_exhaustive()
    }
}

/// Deletes every provider created by a released owner.
struct OwnerReleaseWatcher {
    provider_col: Arc<dyn Collection>,
}

#[async_trait]
impl WatchHandler for OwnerReleaseWatcher {
    async fn on_event(&self, _op: EventOp, key: &Value) {
        let Ok(key) = serde_json::from_value::<OwnerKey>(key.clone()) else {
            panic!("provider table: undecodable owner release key {key}");
        };
        let filter = Filter::eq("owner", key.name.clone());
        if let Err(err) = self.provider_col.delete_many(Some(&filter)).await {
            if !err.is_not_found() {
                panic!("failed to delete providers for owner {}: {err}", key.name);
            }
        }
    }
}

struct ProviderWatcher {
    table: Weak<ProviderTable>,
}

#[async_trait]
impl WatchHandler for ProviderWatcher {
    async fn on_event(&self, op: EventOp, key: &Value) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let Ok(key) = serde_json::from_value::<ProviderKey>(key.clone()) else {
            panic!("provider table: undecodable change-feed key {key}");
        };
        table.provider_callback(op, &key).await;
    }
}

impl ProviderTable {
    /// Opens a provider table over the named collection.
    ///
    /// Wires the observer set, the owner-delete cleanup subscription and
    /// the provider change feed, then asynchronously replays existing
    /// provider documents to warm the observer set. The replay runs
    /// concurrently with live events; idempotent observer transitions make
    /// the final state independent of the interleaving.
    pub fn open(
        owner: Arc<OwnerTable>,
        store: &Arc<dyn Store>,
        name: &str,
    ) -> Result<Arc<Self>> {
        let token: CancellationToken = owner.token().child_token();
        let col = store.collection(name);

        let observer = ObserverTable::new();
        observer.initialize(token.child_token())?;

        // Watch only for delete notifications of provider owners.
        owner.collection().watch(
            token.child_token(),
            Some(vec![EventOp::Delete]),
            Arc::new(OwnerReleaseWatcher {
                provider_col: col.clone(),
            }),
        )?;

        let table = Arc::new(Self {
            col: col.clone(),
            owner,
            observer,
        });

        col.watch(
            token,
            None,
            Arc::new(ProviderWatcher {
                table: Arc::downgrade(&table),
            }),
        )?;

        // Warm the observer set from documents that predate this process.
        let warm = table.clone();
        tokio::spawn(async move {
            let docs = match warm.col.find_many(None, &FindOptions::new()).await {
                Ok(docs) => docs,
                Err(err) => {
                    log::warn!("failed enumerating existing providers: {err}");
                    return;
                }
            };
            for doc in docs {
                let Some(id) = doc.get("_id") else { continue };
                if let Ok(key) = serde_json::from_value::<ProviderKey>(id.clone()) {
                    warm.provider_callback(EventOp::Insert, &key).await;
                }
            }
        });

        Ok(table)
    }

    /// Maintains the observer set from provider-collection events and
    /// clears providers whose owner no longer exists.
    async fn provider_callback(&self, _op: EventOp, key: &ProviderKey) {
        let filter = Filter::eq("_id.extKey", key.ext_key.clone());
        let count = match self.col.count(Some(&filter)).await {
            Ok(count) => count,
            Err(err) => panic!("failed to fetch count of providers: {err}"),
        };
        if count == 0 {
            self.observer.delete_provider(&key.ext_key).await;
        } else {
            self.observer.insert_provider(&key.ext_key).await;
        }

        // Cross-node convergence: drop providers whose owner is gone.
        let key_value = serde_json::to_value(key).expect("provider key serializes");
        let record = match self.col.find_one(&key_value).await {
            Ok(doc) => match serde_json::from_value::<ProviderRecord>(doc) {
                Ok(record) => record,
                Err(_) => return,
            },
            Err(err) if err.is_not_found() => return,
            Err(err) => panic!("failed to find provider entry: {err}"),
        };

        let owner_key = serde_json::json!({ "name": record.owner });
        match self.owner.collection().find_one(&owner_key).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                let filter = Filter::eq("owner", record.owner.clone());
                if let Err(err) = self.col.delete_many(Some(&filter)).await {
                    if !err.is_not_found() {
                        panic!(
                            "failed to delete providers for owner {}: {err}",
                            record.owner
                        );
                    }
                }
            }
            Err(err) => panic!("failed to look up provider owner {}: {err}", record.owner),
        }
    }

    /// Declares this process a provider of `ext_key`.
    ///
    /// Returns a handle whose `close` withdraws the provider.
    pub async fn create_provider(&self, ext_key: &str) -> Result<ProviderHandle> {
        let key = ProviderKey {
            ext_key: ext_key.to_string(),
            provider_id: Uuid::new_v4(),
            create_time: unix_now(),
        };
        let record = ProviderRecord {
            owner: self.owner.name().to_string(),
        };

        let key_value = serde_json::to_value(&key)
            .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, e.to_string()))?;
        let data = serde_json::to_value(&record)
            .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, e.to_string()))?;
        self.col.insert_one(&key_value, &data).await?;

        Ok(ProviderHandle {
            key: key_value,
            col: self.col.clone(),
        })
    }

    /// Registers a controller notified for availability and unavailability
    /// of providers.
    pub fn register(&self, name: &str, controller: Arc<dyn Controller<String>>) -> Result<()> {
        self.observer.register(name, controller)
    }

    /// Snapshot of the external keys currently provided.
    pub fn provider_list(&self) -> Vec<String> {
        self.observer.provider_list()
    }

    /// True when at least one live provider exists for the key.
    pub fn is_provider_available(&self, key: &str) -> bool {
        self.observer.is_provider_available(key)
    }
}

static PROVIDER_TABLE: OnceCell<Arc<ProviderTable>> = OnceCell::new();

/// Locates the process-wide provider table on the standard collection.
pub fn locate_provider_table(store: &Arc<dyn Store>) -> Result<Arc<ProviderTable>> {
    locate_provider_table_with_name(store, DEFAULT_PROVIDER_TABLE)
}

/// Locates the process-wide provider table on a specific collection, for
/// consumers working out of non-standard provider tables.
///
/// The first call creates the singleton; later calls return it regardless
/// of the requested name. Fails *invalid-argument* before
/// [`crate::initialize_owner`].
pub fn locate_provider_table_with_name(
    store: &Arc<dyn Store>,
    name: &str,
) -> Result<Arc<ProviderTable>> {
    if let Some(table) = PROVIDER_TABLE.get() {
        return Ok(table.clone());
    }
    let owner = owner()?;
    let table = ProviderTable::open(owner, store, name)?;
    let _ = PROVIDER_TABLE.set(table.clone());
    Ok(PROVIDER_TABLE.get().expect("just set").clone())
}
