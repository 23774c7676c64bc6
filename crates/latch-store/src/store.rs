//! Store and collection contracts.
//!
//! A [`Collection`] is a named set of documents keyed by a structured `_id`
//! value, offering unique inserts, field updates, typed queries and a
//! change-feed subscription. A [`Store`] groups collections by name inside
//! one logical database; a [`StoreClient`] produces stores and answers
//! health checks.
//!
//! The store is expected to guarantee majority-acknowledged writes, change
//! events ordered per document, and no spurious events. A subscription that
//! terminates for any reason other than cancellation is fatal for the
//! consuming component (see `latch-sync` and `latch-tables` watch handlers).

use crate::document::{Filter, FindOptions};
use async_trait::async_trait;
use latch_commons::Result;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Change-feed operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOp {
    Insert,
    Update,
    Delete,
}

impl EventOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOp::Insert => "insert",
            EventOp::Update => "update",
            EventOp::Delete => "delete",
        }
    }
}

impl fmt::Display for EventOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver side of a change-feed subscription.
///
/// Events for one subscription are delivered serially, preserving the
/// per-document commit order the store guarantees. Handlers may issue store
/// operations of their own; they must not assume any global order across
/// unrelated keys.
#[async_trait]
pub trait WatchHandler: Send + Sync {
    /// Called once per matching change event with the decoded document key.
    async fn on_event(&self, op: EventOp, key: &Value);
}

/// Interface definition for a collection in a store.
///
/// Document keys are structured values carried in the `_id` field of the
/// stored document, so change-feed consumers can decode a typed key and
/// filters can address key subfields (`_id.extKey`).
#[async_trait]
pub trait Collection: Send + Sync {
    /// Name of this collection.
    fn name(&self) -> &str;

    /// Inserts one entry with the given key and data.
    ///
    /// Fails *already-exists* if the primary key collides and
    /// *invalid-argument* when key or data is null or data is not a
    /// document.
    async fn insert_one(&self, key: &Value, data: &Value) -> Result<()>;

    /// Updates the fields of an existing entry.
    ///
    /// With `upsert` set, inserts the entry when it does not exist;
    /// otherwise fails *not-found* on absence.
    async fn update_one(&self, key: &Value, data: &Value, upsert: bool) -> Result<()>;

    /// Finds one entry by key. Fails *not-found* on absence.
    async fn find_one(&self, key: &Value) -> Result<Value>;

    /// Finds entries matching the filter, honoring sort, offset and limit.
    async fn find_many(&self, filter: Option<&Filter>, opts: &FindOptions) -> Result<Vec<Value>>;

    /// Counts entries matching the filter.
    async fn count(&self, filter: Option<&Filter>) -> Result<i64>;

    /// Removes one entry by key. Fails *not-found* on absence.
    async fn delete_one(&self, key: &Value) -> Result<()>;

    /// Removes every entry matching the filter.
    ///
    /// Returns the deleted count; fails *not-found* when nothing matched
    /// (callers tolerate this).
    async fn delete_many(&self, filter: Option<&Filter>) -> Result<i64>;

    /// Starts a change-feed subscription on this collection.
    ///
    /// `ops` optionally restricts delivery to a subset of operations (the
    /// owner and lock tables subscribe to deletes only). The subscription
    /// runs until `token` is cancelled; termination for any other reason is
    /// fatal and panics with a diagnostic.
    fn watch(
        &self,
        token: CancellationToken,
        ops: Option<Vec<EventOp>>,
        handler: Arc<dyn WatchHandler>,
    ) -> Result<()>;
}

/// Interface definition for a store, responsible for holding a group of
/// collections inside one logical database.
pub trait Store: Send + Sync {
    /// Name of the database this store works in.
    fn name(&self) -> &str;

    /// Gets the collection for the given name, creating it on first use.
    ///
    /// Repeated calls with the same name return the same live collection
    /// handle, so every consumer observes the same change feed.
    fn collection(&self, name: &str) -> Arc<dyn Collection>;
}

/// Client interface for a store server hosting multiple databases.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Gets the data store for the given database name.
    fn data_store(&self, db_name: &str) -> Arc<dyn Store>;

    /// Gets a collection inside the given database.
    fn collection(&self, db_name: &str, col: &str) -> Arc<dyn Collection>;

    /// Health check; returns `Ok` when the store is connectable and healthy.
    async fn health_check(&self) -> Result<()>;
}
