//! Direct typed table.
//!
//! Generic table type providing the common operations each store-backed
//! table is built from. Every read and write goes straight to the store;
//! the embedded reconciliation manager receives every change-feed key so
//! registered controllers can react to table mutations from any process.

use async_trait::async_trait;
use latch_commons::{Error, ErrorKind, Result};
use latch_reconciler::{Controller, KeySource, Manager};
use latch_store::{Collection, EventOp, Filter, FindOptions, WatchHandler};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

use crate::typed::TypedCollection;

/// Generic table over a `(K, E)` key/entry pair.
///
/// `initialize` must be called exactly once before any other operation;
/// a second call fails *already-exists* and operations on an uninitialized
/// table fail *invalid-argument*.
///
/// ## Example
///
/// ```rust,ignore
/// use latch_tables::Table;
///
/// let products: Arc<Table<ProductKey, Product>> = Table::new();
/// products.initialize(store.collection("products-table"), token).await?;
/// products.insert(&key, &product).await?;
/// ```
pub struct Table<K, E>
where
    K: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    manager: Manager<K>,
    typed: OnceCell<TypedCollection<K, E>>,
}

struct TableWatcher<K, E>
where
    K: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    table: Weak<Table<K, E>>,
}

#[async_trait]
impl<K, E> WatchHandler for TableWatcher<K, E>
where
    K: Serialize + DeserializeOwned + Clone + Eq + Hash + Send + Sync + 'static,
    E: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn on_event(&self, _op: EventOp, key: &Value) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        // A key this subscription cannot decode means the table and the
        // collection disagree about the key type; continuing would drop
        // events silently.
        let key = TypedCollection::<K, E>::decode_key(key)
            .unwrap_or_else(|err| panic!("undecodable change-feed key: {err}"));
        table.manager.notify(&key).await;
    }
}

#[async_trait]
impl<K, E> KeySource<K> for Table<K, E>
where
    K: Serialize + DeserializeOwned + Clone + Eq + Hash + Send + Sync + 'static,
    E: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn all_keys(&self) -> Vec<K> {
        let Some(typed) = self.typed.get() else {
            return Vec::new();
        };
        match typed.all_keys().await {
            Ok(keys) => keys,
            Err(err) => panic!("failed fetching all keys: {err}"),
        }
    }
}

impl<K, E> Table<K, E>
where
    K: Serialize + DeserializeOwned + Clone + Eq + Hash + Send + Sync + 'static,
    E: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            manager: Manager::new(),
            typed: OnceCell::new(),
        })
    }

    /// Binds the table to a collection and starts the change-feed wiring.
    ///
    /// Subscribes to all events on the collection, forwards decoded keys to
    /// the reconciliation manager, and remembers the collection handle.
    pub fn initialize(
        self: &Arc<Self>,
        col: Arc<dyn Collection>,
        token: CancellationToken,
    ) -> Result<()> {
        if self.typed.get().is_some() {
            return Err(Error::wrap(ErrorKind::AlreadyExists, "table is already initialized"));
        }

        col.watch(
            token.child_token(),
            None,
            Arc::new(TableWatcher {
                table: Arc::downgrade(self),
            }),
        )?;

        let source: Arc<dyn KeySource<K>> = self.clone();
        self.manager.initialize(token, Arc::downgrade(&source))?;

        self.typed
            .set(TypedCollection::new(col))
            .map_err(|_| Error::wrap(ErrorKind::AlreadyExists, "table is already initialized"))
    }

    fn typed(&self) -> Result<&TypedCollection<K, E>> {
        self.typed
            .get()
            .ok_or_else(|| Error::wrap(ErrorKind::InvalidArgument, "table not initialized"))
    }

    /// Registers a reconciliation controller for this table's keys.
    pub fn register(&self, name: &str, controller: Arc<dyn Controller<K>>) -> Result<()> {
        self.manager.register(name, controller)
    }

    /// Inserts a new entry to the table.
    pub async fn insert(&self, key: &K, entry: &E) -> Result<()> {
        self.typed()?.insert_one(key, entry).await
    }

    /// Locates an entry: inserts if absent, updates the data if present.
    pub async fn locate(&self, key: &K, entry: &E) -> Result<()> {
        self.typed()?.update_one(key, entry, true).await
    }

    /// Updates an existing entry.
    pub async fn update(&self, key: &K, entry: &E) -> Result<()> {
        self.typed()?.update_one(key, entry, false).await
    }

    /// Finds an existing entry by key.
    pub async fn find(&self, key: &K) -> Result<E> {
        self.typed()?.find_one(key).await
    }

    /// Finds entries matching a filter with offset and limit.
    pub async fn find_many(
        &self,
        filter: Option<&Filter>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<E>> {
        let opts = FindOptions::new().offset(offset).limit(limit);
        self.typed()?.find_many(filter, &opts).await
    }

    /// Finds entries with full query options (sort, offset, limit).
    pub async fn find_many_with_opts(
        &self,
        filter: Option<&Filter>,
        opts: &FindOptions,
    ) -> Result<Vec<E>> {
        self.typed()?.find_many(filter, opts).await
    }

    /// Counts entries matching the filter.
    pub async fn count(&self, filter: Option<&Filter>) -> Result<i64> {
        self.typed()?.count(filter).await
    }

    /// Deletes a specific key from the table.
    pub async fn delete_key(&self, key: &K) -> Result<()> {
        self.typed()?.delete_one(key).await
    }

    /// Deletes entries matching the filter, returning the deleted count.
    pub async fn delete_by_filter(&self, filter: Option<&Filter>) -> Result<i64> {
        self.typed()?.delete_many(filter).await
    }

    /// Every primary key currently in the collection.
    pub async fn get_all_keys(&self) -> Result<Vec<K>> {
        self.typed()?.all_keys().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latch_reconciler::ReconcileResult;
    use latch_store::{MemoryClient, SortDirection, StoreClient};
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    struct ProductKey {
        id: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Product {
        name: String,
        price: i64,
        category: String,
        stock: i64,
    }

    fn product(name: &str, price: i64, category: &str, stock: i64) -> Product {
        Product {
            name: name.into(),
            price,
            category: category.into(),
            stock,
        }
    }

    async fn test_table(col_name: &str) -> Arc<Table<ProductKey, Product>> {
        let table = Table::new();
        let col = MemoryClient::new().collection("test", col_name);
        table.initialize(col, CancellationToken::new()).unwrap();
        table
    }

    #[tokio::test]
    async fn test_basic_crud() {
        let table = test_table("products").await;
        let key = ProductKey { id: "prod-001".into() };

        table
            .insert(&key, &product("Laptop", 1200, "Electronics", 10))
            .await
            .unwrap();

        let found = table.find(&key).await.unwrap();
        assert_eq!(found.name, "Laptop");

        table
            .update(&key, &product("Laptop", 1100, "Electronics", 10))
            .await
            .unwrap();
        let found = table.find(&key).await.unwrap();
        assert_eq!(found.price, 1100);

        table.delete_key(&key).await.unwrap();
        assert!(table.find(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_locate_upserts() {
        let table = test_table("locate").await;
        let key = ProductKey { id: "loc-1".into() };

        table
            .locate(&key, &product("Desk", 200, "Furniture", 5))
            .await
            .unwrap();
        table
            .locate(&key, &product("Desk", 180, "Furniture", 5))
            .await
            .unwrap();

        assert_eq!(table.find(&key).await.unwrap().price, 180);
        assert_eq!(table.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_uninitialized_operations_fail() {
        let table: Arc<Table<ProductKey, Product>> = Table::new();
        let key = ProductKey { id: "x".into() };
        let err = table.find(&key).await.unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_double_initialize_fails() {
        let table = test_table("double").await;
        let col = MemoryClient::new().collection("test", "other");
        let err = table.initialize(col, CancellationToken::new()).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_sorted_pagination() {
        let table = test_table("paging").await;
        for i in 1..=10 {
            table
                .insert(
                    &ProductKey { id: format!("page-{i}") },
                    &product(&format!("Product {i}"), i * 10, "Misc", i),
                )
                .await
                .unwrap();
        }

        let opts = FindOptions::new()
            .offset(3)
            .limit(3)
            .sort("price", SortDirection::Ascending);
        let results = table.find_many_with_opts(None, &opts).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].price, 40);
        assert_eq!(results[1].price, 50);
        assert_eq!(results[2].price, 60);
    }

    #[tokio::test]
    async fn test_multi_key_sort() {
        let table = test_table("multisort").await;
        let rows = [
            ("multi-1", "Books", 30),
            ("multi-2", "Books", 20),
            ("multi-3", "Electronics", 100),
            ("multi-4", "Electronics", 50),
            ("multi-5", "Books", 25),
        ];
        for (id, category, price) in rows {
            table
                .insert(&ProductKey { id: id.into() }, &product(id, price, category, 1))
                .await
                .unwrap();
        }

        let opts = FindOptions::new()
            .sort("category", SortDirection::Ascending)
            .sort("price", SortDirection::Ascending);
        let results = table.find_many_with_opts(None, &opts).await.unwrap();

        let got: Vec<(String, i64)> = results
            .iter()
            .map(|p| (p.category.clone(), p.price))
            .collect();
        assert_eq!(
            got,
            vec![
                ("Books".to_string(), 20),
                ("Books".to_string(), 25),
                ("Books".to_string(), 30),
                ("Electronics".to_string(), 50),
                ("Electronics".to_string(), 100),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_by_filter() {
        let table = test_table("filterdel").await;
        for i in 1..=5 {
            table
                .insert(
                    &ProductKey { id: format!("f-{i}") },
                    &product("x", i * 10, "Misc", 1),
                )
                .await
                .unwrap();
        }
        let deleted = table
            .delete_by_filter(Some(&Filter::gte("price", 30)))
            .await
            .unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(table.count(None).await.unwrap(), 2);
    }

    struct Watching {
        seen: Mutex<Vec<ProductKey>>,
    }

    #[async_trait]
    impl Controller<ProductKey> for Watching {
        async fn reconcile(&self, key: &ProductKey) -> Result<ReconcileResult> {
            self.seen.lock().push(key.clone());
            Ok(ReconcileResult::done())
        }
    }

    #[tokio::test]
    async fn test_controller_notified_on_mutation() {
        let table = test_table("notify").await;
        let controller = Arc::new(Watching {
            seen: Mutex::new(Vec::new()),
        });
        table.register("audit", controller.clone()).unwrap();

        let key = ProductKey { id: "n-1".into() };
        table
            .insert(&key, &product("Chair", 150, "Furniture", 25))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(controller.seen.lock().contains(&key));
    }

    #[tokio::test]
    async fn test_register_replays_existing_keys() {
        let table = test_table("replay").await;
        let key = ProductKey { id: "pre".into() };
        table
            .insert(&key, &product("Mouse", 25, "Electronics", 30))
            .await
            .unwrap();

        let controller = Arc::new(Watching {
            seen: Mutex::new(Vec::new()),
        });
        table.register("late", controller.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(controller.seen.lock().contains(&key));
    }
}
