//! In-memory reference store.
//!
//! A complete implementation of the store contract backed by process memory,
//! used by tests and single-process embeddings. Each collection carries its
//! own change feed built on a broadcast channel (capacity 1024); every watch
//! subscription gets an independent receiver whose events are forwarded
//! serially to the handler, preserving per-document order.
//!
//! A subscriber that falls behind far enough to lose feed history is in the
//! same position as a change-stream consumer whose resume window was lost:
//! the subscription cannot continue correctly, and the forwarder panics with
//! a diagnostic.

use crate::document::{canonical_key, Filter, FindOptions};
use crate::store::{Collection, EventOp, Store, StoreClient, WatchHandler};
use async_trait::async_trait;
use dashmap::DashMap;
use latch_commons::{Error, ErrorKind, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Change feed buffer length per collection.
///
/// Producers never block on the feed; a subscription that misses this many
/// events has lost the feed window and is terminated.
const FEED_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
struct ChangeEvent {
    op: EventOp,
    key: Arc<Value>,
}

/// One in-memory collection: documents plus a change feed.
pub struct MemoryCollection {
    store_name: String,
    name: String,
    // canonical key string -> merged document ({entry fields} + "_id")
    docs: RwLock<HashMap<String, Value>>,
    feed: broadcast::Sender<ChangeEvent>,
}

impl MemoryCollection {
    fn new(store_name: &str, name: &str) -> Self {
        let (feed, _) = broadcast::channel(FEED_BUFFER);
        Self {
            store_name: store_name.to_string(),
            name: name.to_string(),
            docs: RwLock::new(HashMap::new()),
            feed,
        }
    }

    fn emit(&self, op: EventOp, key: &Value) {
        // A send error only means no live subscribers.
        let _ = self.feed.send(ChangeEvent {
            op,
            key: Arc::new(key.clone()),
        });
    }

    fn merged_doc(key: &Value, data: &Value) -> Result<Value> {
        let mut doc = match data {
            Value::Object(map) => Value::Object(map.clone()),
            _ => {
                return Err(Error::wrap(
                    ErrorKind::InvalidArgument,
                    "store insert error: data must be a document",
                ))
            }
        };
        doc.as_object_mut()
            .expect("doc constructed as object above")
            .insert("_id".to_string(), key.clone());
        Ok(doc)
    }

    fn check_key_data(key: &Value, data: &Value) -> Result<()> {
        if key.is_null() {
            return Err(Error::wrap(
                ErrorKind::InvalidArgument,
                "store error: no key specified",
            ));
        }
        if data.is_null() {
            return Err(Error::wrap(
                ErrorKind::InvalidArgument,
                "store error: no data to store",
            ));
        }
        Ok(())
    }

    fn snapshot_matching(&self, filter: Option<&Filter>) -> Vec<Value> {
        self.docs
            .read()
            .values()
            .filter(|doc| filter.map_or(true, |f| f.matches(doc)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, key: &Value, data: &Value) -> Result<()> {
        Self::check_key_data(key, data)?;
        let doc = Self::merged_doc(key, data)?;
        let slot = canonical_key(key);
        {
            let mut docs = self.docs.write();
            if docs.contains_key(&slot) {
                return Err(Error::wrap(
                    ErrorKind::AlreadyExists,
                    format!("document with key {key} already exists"),
                ));
            }
            docs.insert(slot, doc);
        }
        // Notify after the lock is released.
        self.emit(EventOp::Insert, key);
        Ok(())
    }

    async fn update_one(&self, key: &Value, data: &Value, upsert: bool) -> Result<()> {
        Self::check_key_data(key, data)?;
        let fields = match data {
            Value::Object(map) => map.clone(),
            _ => {
                return Err(Error::wrap(
                    ErrorKind::InvalidArgument,
                    "store update error: data must be a document",
                ))
            }
        };
        let slot = canonical_key(key);
        let op;
        {
            let mut docs = self.docs.write();
            match docs.get_mut(&slot) {
                Some(existing) => {
                    let target = existing
                        .as_object_mut()
                        .expect("stored documents are objects");
                    for (k, v) in fields {
                        target.insert(k, v);
                    }
                    op = EventOp::Update;
                }
                None => {
                    if !upsert {
                        return Err(Error::wrap(
                            ErrorKind::NotFound,
                            format!("no document found for key {key}"),
                        ));
                    }
                    docs.insert(slot, Self::merged_doc(key, data)?);
                    op = EventOp::Insert;
                }
            }
        }
        self.emit(op, key);
        Ok(())
    }

    async fn find_one(&self, key: &Value) -> Result<Value> {
        let slot = canonical_key(key);
        self.docs.read().get(&slot).cloned().ok_or_else(|| {
            Error::wrap(ErrorKind::NotFound, format!("no document found for key {key}"))
        })
    }

    async fn find_many(&self, filter: Option<&Filter>, opts: &FindOptions) -> Result<Vec<Value>> {
        let mut docs = self.snapshot_matching(filter);
        opts.apply_sort(&mut docs);
        Ok(opts.apply_page(docs))
    }

    async fn count(&self, filter: Option<&Filter>) -> Result<i64> {
        Ok(self.snapshot_matching(filter).len() as i64)
    }

    async fn delete_one(&self, key: &Value) -> Result<()> {
        let slot = canonical_key(key);
        let removed = self.docs.write().remove(&slot);
        if removed.is_none() {
            return Err(Error::wrap(
                ErrorKind::NotFound,
                format!("no document found for key {key}"),
            ));
        }
        self.emit(EventOp::Delete, key);
        Ok(())
    }

    async fn delete_many(&self, filter: Option<&Filter>) -> Result<i64> {
        let removed_keys: Vec<Value>;
        {
            let mut docs = self.docs.write();
            let slots: Vec<String> = docs
                .iter()
                .filter(|(_, doc)| filter.map_or(true, |f| f.matches(doc)))
                .map(|(slot, _)| slot.clone())
                .collect();
            removed_keys = slots
                .iter()
                .filter_map(|slot| docs.remove(slot))
                .filter_map(|doc| doc.get("_id").cloned())
                .collect();
        }
        if removed_keys.is_empty() {
            return Err(Error::wrap(
                ErrorKind::NotFound,
                "no matching entries found to delete",
            ));
        }
        let count = removed_keys.len() as i64;
        for key in &removed_keys {
            self.emit(EventOp::Delete, key);
        }
        Ok(count)
    }

    fn watch(
        &self,
        token: CancellationToken,
        ops: Option<Vec<EventOp>>,
        handler: Arc<dyn WatchHandler>,
    ) -> Result<()> {
        let mut rx = self.feed.subscribe();
        let store_name = self.store_name.clone();
        let col_name = self.name.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    event = rx.recv() => match event {
                        Ok(event) => {
                            if ops.as_ref().map_or(true, |ops| ops.contains(&event.op)) {
                                handler.on_event(event.op, &event.key).await;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            log::error!(
                                "change feed for {store_name}:{col_name} lost {missed} events"
                            );
                            panic!(
                                "end of change stream observed: feed window lost for {store_name}:{col_name}"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });
        Ok(())
    }
}

/// One in-memory database: a set of named collections.
pub struct MemoryStore {
    name: String,
    collections: DashMap<String, Arc<MemoryCollection>>,
}

impl MemoryStore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collections: DashMap::new(),
        }
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        let col = self
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new(&self.name, name)))
            .clone();
        col
    }
}

/// In-memory store client hosting multiple named databases.
///
/// ## Example
///
/// ```rust
/// use latch_store::{MemoryClient, StoreClient};
///
/// let client = MemoryClient::new();
/// let store = client.data_store("test-sync");
/// let col = store.collection("owner-table");
/// assert_eq!(col.name(), "owner-table");
/// ```
pub struct MemoryClient {
    stores: DashMap<String, Arc<MemoryStore>>,
}

impl MemoryClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stores: DashMap::new(),
        })
    }
}

#[async_trait]
impl StoreClient for MemoryClient {
    fn data_store(&self, db_name: &str) -> Arc<dyn Store> {
        let store = self
            .stores
            .entry(db_name.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(db_name)))
            .clone();
        store
    }

    fn collection(&self, db_name: &str, col: &str) -> Arc<dyn Collection> {
        self.data_store(db_name).collection(col)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
