//! Serde codec layer over a raw collection.
//!
//! Constructing a [`TypedCollection`] is the point where the key and entry
//! types of a collection are fixed: change-feed keys and query results are
//! decoded with serde from here on. Decoded entries tolerate the `_id`
//! field the store merges into every document.

use latch_commons::{Error, ErrorKind, Result};
use latch_store::{Collection, Filter, FindOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed view over a collection for one `(K, E)` pair.
pub struct TypedCollection<K, E> {
    col: Arc<dyn Collection>,
    _types: PhantomData<fn() -> (K, E)>,
}

impl<K, E> TypedCollection<K, E>
where
    K: Serialize + DeserializeOwned + Send + Sync,
    E: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(col: Arc<dyn Collection>) -> Self {
        Self {
            col,
            _types: PhantomData,
        }
    }

    /// The underlying raw collection.
    pub fn raw(&self) -> &Arc<dyn Collection> {
        &self.col
    }

    pub fn encode_key(key: &K) -> Result<Value> {
        serde_json::to_value(key)
            .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, format!("failed to encode key: {e}")))
    }

    /// Decodes a change-feed or `_id` key value.
    pub fn decode_key(value: &Value) -> Result<K> {
        serde_json::from_value(value.clone()).map_err(|e| {
            Error::wrap(
                ErrorKind::InvalidArgument,
                format!("failed to decode key {value}: {e}"),
            )
        })
    }

    fn encode_entry(entry: &E) -> Result<Value> {
        serde_json::to_value(entry).map_err(|e| {
            Error::wrap(ErrorKind::InvalidArgument, format!("failed to encode entry: {e}"))
        })
    }

    pub fn decode_entry(doc: Value) -> Result<E> {
        serde_json::from_value(doc)
            .map_err(|e| Error::wrap(ErrorKind::Unknown, format!("failed to decode entry: {e}")))
    }

    pub async fn insert_one(&self, key: &K, entry: &E) -> Result<()> {
        self.col
            .insert_one(&Self::encode_key(key)?, &Self::encode_entry(entry)?)
            .await
    }

    pub async fn update_one(&self, key: &K, entry: &E, upsert: bool) -> Result<()> {
        self.col
            .update_one(&Self::encode_key(key)?, &Self::encode_entry(entry)?, upsert)
            .await
    }

    pub async fn find_one(&self, key: &K) -> Result<E> {
        let doc = self.col.find_one(&Self::encode_key(key)?).await?;
        Self::decode_entry(doc)
    }

    pub async fn find_many(&self, filter: Option<&Filter>, opts: &FindOptions) -> Result<Vec<E>> {
        let docs = self.col.find_many(filter, opts).await?;
        docs.into_iter().map(Self::decode_entry).collect()
    }

    pub async fn count(&self, filter: Option<&Filter>) -> Result<i64> {
        self.col.count(filter).await
    }

    pub async fn delete_one(&self, key: &K) -> Result<()> {
        self.col.delete_one(&Self::encode_key(key)?).await
    }

    pub async fn delete_many(&self, filter: Option<&Filter>) -> Result<i64> {
        self.col.delete_many(filter).await
    }

    /// Every primary key currently in the collection, decoded.
    pub async fn all_keys(&self) -> Result<Vec<K>> {
        let docs = self.col.find_many(None, &FindOptions::new()).await?;
        docs.iter()
            .filter_map(|doc| doc.get("_id"))
            .map(Self::decode_key)
            .collect()
    }
}
