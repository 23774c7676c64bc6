//! Cached typed table.
//!
//! Same contract as the direct table with an in-memory mirror of the
//! collection kept in sync by the change feed. The cache trades a bounded
//! amount of staleness (the change-feed delivery delay) for reads that never
//! touch the store on the fast path; callers needing read-your-writes use
//! the `db_*` variants.
//!
//! Cache synchronization protocol, driven by the watch handler:
//! 1. insert/update event: re-read from store; found → replace cache entry;
//!    not found (delete race) → drop cache entry.
//! 2. delete event: drop cache entry.
//! 3. after the cache mutation, forward the key to the reconciliation
//!    manager. The cache lock is never held across the notify.

use async_trait::async_trait;
use latch_commons::{Error, ErrorKind, Result};
use latch_reconciler::{Controller, KeySource, Manager};
use latch_store::{Collection, EventOp, Filter, FindOptions, WatchHandler};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

use crate::typed::TypedCollection;

/// Cache population strategy, selected at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Fetch all entries during `initialize` and serve reads from memory.
    /// A miss is answered *not-found* without consulting the store.
    #[default]
    Eager,
    /// Start empty; a miss consults the store and populates the cache on a
    /// hit. Reads never touch the store on a cache hit.
    ReadThrough,
}

struct CachedState<K, E>
where
    K: Send + Sync,
    E: Send + Sync,
{
    typed: TypedCollection<K, E>,
    mode: CacheMode,
}

/// Typed table with an in-memory mirror of its collection.
///
/// Consistency model is bounded-staleness: the cache never contains a value
/// that was never written, and it may lag by the change-feed delivery delay.
pub struct CachedTable<K, E>
where
    K: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    manager: Manager<K>,
    cache: RwLock<HashMap<K, E>>,
    state: OnceCell<CachedState<K, E>>,
}

struct CachedWatcher<K, E>
where
    K: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    table: Weak<CachedTable<K, E>>,
}

#[async_trait]
impl<K, E> WatchHandler for CachedWatcher<K, E>
where
    K: Serialize + DeserializeOwned + Clone + Eq + Hash + Send + Sync + 'static,
    E: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn on_event(&self, op: EventOp, key: &Value) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let key = TypedCollection::<K, E>::decode_key(key)
            .unwrap_or_else(|err| panic!("undecodable change-feed key: {err}"));
        table.apply_event(op, &key).await;
        table.manager.notify(&key).await;
    }
}

#[async_trait]
impl<K, E> KeySource<K> for CachedTable<K, E>
where
    K: Serialize + DeserializeOwned + Clone + Eq + Hash + Send + Sync + 'static,
    E: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn all_keys(&self) -> Vec<K> {
        let Some(state) = self.state.get() else {
            return Vec::new();
        };
        match state.typed.all_keys().await {
            Ok(keys) => keys,
            Err(err) => panic!("failed fetching all keys: {err}"),
        }
    }
}

impl<K, E> CachedTable<K, E>
where
    K: Serialize + DeserializeOwned + Clone + Eq + Hash + Send + Sync + 'static,
    E: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            manager: Manager::new(),
            cache: RwLock::new(HashMap::new()),
            state: OnceCell::new(),
        })
    }

    /// Binds the table to a collection, starts the change-feed wiring and,
    /// in eager mode, preloads the cache before returning.
    pub async fn initialize(
        self: &Arc<Self>,
        col: Arc<dyn Collection>,
        mode: CacheMode,
        token: CancellationToken,
    ) -> Result<()> {
        if self.state.get().is_some() {
            return Err(Error::wrap(ErrorKind::AlreadyExists, "table is already initialized"));
        }

        col.watch(
            token.child_token(),
            None,
            Arc::new(CachedWatcher {
                table: Arc::downgrade(self),
            }),
        )?;

        let source: Arc<dyn KeySource<K>> = self.clone();
        self.manager.initialize(token, Arc::downgrade(&source))?;

        let typed = TypedCollection::new(col);
        if mode == CacheMode::Eager {
            let docs = typed.raw().find_many(None, &FindOptions::new()).await?;
            let mut cache = self.cache.write();
            for doc in docs {
                let Some(id) = doc.get("_id") else { continue };
                let key = TypedCollection::<K, E>::decode_key(id)?;
                let entry = TypedCollection::<K, E>::decode_entry(doc.clone())?;
                cache.insert(key, entry);
            }
        }

        self.state
            .set(CachedState { typed, mode })
            .map_err(|_| Error::wrap(ErrorKind::AlreadyExists, "table is already initialized"))
    }

    fn state(&self) -> Result<&CachedState<K, E>> {
        self.state
            .get()
            .ok_or_else(|| Error::wrap(ErrorKind::InvalidArgument, "table not initialized"))
    }

    async fn apply_event(&self, op: EventOp, key: &K) {
        let Some(state) = self.state.get() else {
            return;
        };
        if op == EventOp::Delete {
            self.cache.write().remove(key);
            return;
        }
        match state.typed.find_one(key).await {
            Ok(entry) => {
                self.cache.write().insert(key.clone(), entry);
            }
            Err(err) if err.is_not_found() => {
                // Deleted between the event and our re-read.
                self.cache.write().remove(key);
            }
            Err(err) => {
                log::warn!("failed refreshing cache entry: {err}");
            }
        }
    }

    /// Registers a reconciliation controller for this table's keys.
    pub fn register(&self, name: &str, controller: Arc<dyn Controller<K>>) -> Result<()> {
        self.manager.register(name, controller)
    }

    /// Inserts a new entry. The cache converges via the change feed.
    pub async fn insert(&self, key: &K, entry: &E) -> Result<()> {
        self.state()?.typed.insert_one(key, entry).await
    }

    /// Locates an entry: inserts if absent, updates the data if present.
    pub async fn locate(&self, key: &K, entry: &E) -> Result<()> {
        self.state()?.typed.update_one(key, entry, true).await
    }

    /// Updates an existing entry.
    pub async fn update(&self, key: &K, entry: &E) -> Result<()> {
        self.state()?.typed.update_one(key, entry, false).await
    }

    /// Retrieves an entry from the cache.
    ///
    /// In read-through mode a miss consults the store and populates the
    /// cache on a hit; in eager mode a miss is *not-found*.
    pub async fn find(&self, key: &K) -> Result<E> {
        let state = self.state()?;
        if let Some(entry) = self.cache.read().get(key) {
            return Ok(entry.clone());
        }
        match state.mode {
            CacheMode::Eager => Err(Error::wrap(
                ErrorKind::NotFound,
                "failed to find entry in cache",
            )),
            CacheMode::ReadThrough => {
                let entry = state.typed.find_one(key).await?;
                self.cache.write().insert(key.clone(), entry.clone());
                Ok(entry)
            }
        }
    }

    /// Queries the cache with filter and options, never touching the store.
    pub async fn find_many(&self, filter: Option<&Filter>, opts: &FindOptions) -> Result<Vec<E>> {
        self.state()?;
        let mut docs: Vec<Value> = {
            let cache = self.cache.read();
            cache
                .iter()
                .map(|(key, entry)| {
                    let mut doc = serde_json::to_value(entry).unwrap_or(Value::Null);
                    if let (Value::Object(map), Ok(id)) =
                        (&mut doc, TypedCollection::<K, E>::encode_key(key))
                    {
                        map.insert("_id".to_string(), id);
                    }
                    doc
                })
                .filter(|doc| filter.map_or(true, |f| f.matches(doc)))
                .collect()
        };
        opts.apply_sort(&mut docs);
        opts.apply_page(docs)
            .into_iter()
            .map(TypedCollection::<K, E>::decode_entry)
            .collect()
    }

    /// Retrieves an entry from the store, bypassing the cache.
    pub async fn db_find(&self, key: &K) -> Result<E> {
        self.state()?.typed.find_one(key).await
    }

    /// Queries the store directly, bypassing the cache.
    pub async fn db_find_many(&self, filter: Option<&Filter>, opts: &FindOptions) -> Result<Vec<E>> {
        self.state()?.typed.find_many(filter, opts).await
    }

    /// Counts store entries matching the filter.
    pub async fn count(&self, filter: Option<&Filter>) -> Result<i64> {
        self.state()?.typed.count(filter).await
    }

    /// Deletes a specific key. The cache converges via the change feed.
    pub async fn delete_key(&self, key: &K) -> Result<()> {
        self.state()?.typed.delete_one(key).await
    }

    /// Deletes entries matching the filter, returning the deleted count.
    pub async fn delete_by_filter(&self, filter: Option<&Filter>) -> Result<i64> {
        self.state()?.typed.delete_many(filter).await
    }

    /// Every primary key currently in the collection.
    pub async fn get_all_keys(&self) -> Result<Vec<K>> {
        self.state()?.typed.all_keys().await
    }

    /// Number of entries currently mirrored in memory.
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}
