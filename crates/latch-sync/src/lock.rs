//! Distributed lock tables.
//!
//! A lock table maps application-defined keys to single-writer locks. The
//! store's unique insert provides mutual exclusion; the record carries the
//! acquiring owner's name so locks are released when the owner dies, either
//! through the owner-delete subscription or through the convergence check
//! that runs on every lock-collection event.
//!
//! Failure model: a holder partitioned from the store long enough to miss
//! the age-out threshold loses its owner entry and, with it, its locks,
//! while possibly still believing it holds them. Store-anchored mutual
//! exclusion cannot exclude that window; callers needing a stronger fence
//! must treat the owner record's age as authoritative.

use async_trait::async_trait;
use latch_commons::time::unix_now;
use latch_commons::{Error, ErrorKind, Result};
use latch_store::{Collection, EventOp, Filter, Store, WatchHandler};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::owner::{owner, OwnerKey, OwnerTable};

/// Stored lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    #[serde(rename = "createTime")]
    pub create_time: i64,
    pub owner: String,
}

/// An acquired lock. Dropping the handle does not release the lock;
/// call [`LockHandle::close`] or let owner cleanup reclaim it.
pub struct LockHandle<K> {
    key: Value,
    col: Arc<dyn Collection>,
    _key_type: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for LockHandle<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<K> LockHandle<K> {
    /// Releases the lock by deleting its record.
    pub async fn close(self) -> Result<()> {
        self.col.delete_one(&self.key).await
    }
}

/// Per-namespace table of single-writer locks keyed by `K`.
pub struct LockTable<K> {
    col: Arc<dyn Collection>,
    owner: Arc<OwnerTable>,
    _key_type: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for LockTable<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockTable").finish_non_exhaustive()
    }
}

/// Deletes every lock owned by a released owner.
struct OwnerReleaseWatcher {
    lock_col: Arc<dyn Collection>,
}

#[async_trait]
impl WatchHandler for OwnerReleaseWatcher {
    async fn on_event(&self, _op: EventOp, key: &Value) {
        let Ok(key) = serde_json::from_value::<OwnerKey>(key.clone()) else {
            panic!("lock table: undecodable owner release key {key}");
        };
        let filter = Filter::eq("owner", key.name.clone());
        if let Err(err) = self.lock_col.delete_many(Some(&filter)).await {
            if !err.is_not_found() {
                panic!("failed to delete locks for owner {}: {err}", key.name);
            }
        }
    }
}

/// Convergence check on lock-collection events: if the lock's owner is no
/// longer present in the owner table (a missed owner-delete event), remove
/// every lock held under that name.
struct LockChangeWatcher {
    lock_col: Arc<dyn Collection>,
    owner_col: Arc<dyn Collection>,
}

#[async_trait]
impl WatchHandler for LockChangeWatcher {
    async fn on_event(&self, _op: EventOp, key: &Value) {
        let doc = match self.lock_col.find_one(key).await {
            Ok(doc) => doc,
            Err(err) if err.is_not_found() => return,
            Err(err) => panic!("failed to find lock entry for key {key}: {err}"),
        };
        let Ok(record) = serde_json::from_value::<LockRecord>(doc) else {
            return;
        };

        let owner_key = serde_json::json!({ "name": record.owner });
        match self.owner_col.find_one(&owner_key).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                let filter = Filter::eq("owner", record.owner.clone());
                if let Err(err) = self.lock_col.delete_many(Some(&filter)).await {
                    if !err.is_not_found() {
                        panic!("failed to delete locks for owner {}: {err}", record.owner);
                    }
                }
            }
            Err(err) => panic!("failed to look up lock owner {}: {err}", record.owner),
        }
    }
}

impl<K> LockTable<K>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Opens a lock table over the named collection, wiring the owner
    /// release and convergence subscriptions on a scope derived from the
    /// owner's context.
    pub fn open(owner: Arc<OwnerTable>, store: &Arc<dyn Store>, name: &str) -> Result<Arc<Self>> {
        let token: CancellationToken = owner.token().child_token();
        let col = store.collection(name);

        // Watch only for delete notifications of lock owners.
        owner.collection().watch(
            token.child_token(),
            Some(vec![EventOp::Delete]),
            Arc::new(OwnerReleaseWatcher {
                lock_col: col.clone(),
            }),
        )?;

        // Watch the lock collection itself for release notification and
        // cross-node cleanup convergence.
        col.watch(
            token,
            None,
            Arc::new(LockChangeWatcher {
                lock_col: col.clone(),
                owner_col: owner.collection().clone(),
            }),
        )?;

        Ok(Arc::new(Self {
            col,
            owner,
            _key_type: PhantomData,
        }))
    }

    /// Attempts to acquire the lock for `key`.
    ///
    /// Mutual exclusion comes from the store's unique insert: a collision
    /// surfaces as *already-exists*. On success the returned handle's
    /// `close` releases the lock.
    pub async fn try_acquire(&self, key: &K) -> Result<LockHandle<K>> {
        let record = LockRecord {
            create_time: unix_now(),
            owner: self.owner.name().to_string(),
        };
        let key_value = serde_json::to_value(key)
            .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, format!("bad lock key: {e}")))?;
        let data = serde_json::to_value(&record)
            .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, e.to_string()))?;

        self.col.insert_one(&key_value, &data).await?;

        Ok(LockHandle {
            key: key_value,
            col: self.col.clone(),
            _key_type: PhantomData,
        })
    }
}

type LockTableSlot = (TypeId, Arc<dyn Any + Send + Sync>);

/// Registry of located lock tables, keyed by `(store, collection)`.
static LOCK_TABLES: Lazy<Mutex<HashMap<(String, String), LockTableSlot>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Locates (or creates) the process-wide lock table for the named
/// collection.
///
/// Repeated calls with the same name return the same instance. Requesting
/// an existing name with a different key type fails *already-exists*;
/// calling before [`crate::initialize_owner`] fails *invalid-argument*.
pub fn locate_lock_table<K>(store: &Arc<dyn Store>, name: &str) -> Result<Arc<LockTable<K>>>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut tables = LOCK_TABLES.lock();
    let slot = (store.name().to_string(), name.to_string());

    if let Some((type_id, table)) = tables.get(&slot) {
        if *type_id != TypeId::of::<K>() {
            return Err(Error::wrap(
                ErrorKind::AlreadyExists,
                format!("lock table {name} already exists with a different key type"),
            ));
        }
        let table = table
            .clone()
            .downcast::<LockTable<K>>()
            .expect("registry slot type checked above");
        return Ok(table);
    }

    // Owner table must be initialized before lock infra can be used.
    let owner = owner()?;
    let table = LockTable::<K>::open(owner, store, name)?;
    tables.insert(slot, (TypeId::of::<K>(), table.clone()));
    Ok(table)
}
