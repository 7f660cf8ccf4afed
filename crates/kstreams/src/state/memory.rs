//! In-memory key/value store
//!
//! `MemoryStore` keeps every entry in a `DashMap`. It is the default store
//! handed out by the stream factory and the one used throughout the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::backend::{KeyValueStore, StorageFactory};
use crate::error::{StateError, StateResult};

const BACKEND_TYPE: &str = "memory";

#[derive(Debug, Clone)]
struct StoreEntry {
    value: Value,
    modified_at: DateTime<Utc>,
}

impl StoreEntry {
    fn new(value: Value) -> Self {
        Self {
            value,
            modified_at: Utc::now(),
        }
    }
}

/// Access statistics for a memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreStats {
    /// Number of get operations
    pub get_count: u64,
    /// Number of set operations
    pub set_count: u64,
    /// Gets that found a value
    pub hit_count: u64,
    /// Gets that found nothing
    pub miss_count: u64,
    /// Most recent write
    pub last_write: Option<DateTime<Utc>>,
}

/// In-memory store backed by DashMap
///
/// Writes to one key are serialized by the map's shard lock, which is all
/// the per-key ordering the stateful operators need.
///
/// ## Example
///
/// ```rust,no_run
/// use kstreams::state::{KeyValueStore, MemoryStore};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let store = MemoryStore::new();
///     store.set("word", json!(3)).await?;
///     assert_eq!(store.get("word").await?, Some(json!(3)));
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<DashMap<String, StoreEntry>>,
    stats: Arc<RwLock<MemoryStoreStats>>,
    closed: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            stats: Arc::new(RwLock::new(MemoryStoreStats::default())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a store pre-populated with `entries`
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let store = Self::new();
        for (key, value) in entries {
            store.data.insert(key.into(), StoreEntry::new(value));
        }
        store
    }

    pub fn stats(&self) -> MemoryStoreStats {
        self.stats.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StateResult<()> {
        if self.is_closed() {
            return Err(StateError::Closed {
                backend_type: BACKEND_TYPE.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.data.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StateResult<Option<Value>> {
        self.ensure_open()?;

        let value = self.data.get(key).map(|entry| entry.value.clone());

        let mut stats = self.stats.write();
        stats.get_count += 1;
        if value.is_some() {
            stats.hit_count += 1;
        } else {
            stats.miss_count += 1;
        }

        trace!(key, hit = value.is_some(), "memory store get");
        Ok(value)
    }

    async fn set(&self, key: &str, value: Value) -> StateResult<()> {
        self.ensure_open()?;

        trace!(key, "memory store set");
        let entry = StoreEntry::new(value);
        let modified_at = entry.modified_at;
        self.data.insert(key.to_string(), entry);

        let mut stats = self.stats.write();
        stats.set_count += 1;
        stats.last_write = Some(modified_at);
        Ok(())
    }

    async fn state(&self) -> StateResult<HashMap<String, Value>> {
        self.ensure_open()?;

        Ok(self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect())
    }

    async fn close(&self) -> StateResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(entries = self.data.len(), "memory store closed");
        }
        Ok(())
    }

    async fn len(&self) -> StateResult<usize> {
        self.ensure_open()?;
        Ok(self.data.len())
    }
}

/// Hands out a fresh `MemoryStore` per request
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreFactory;

impl StorageFactory for MemoryStoreFactory {
    fn create(&self) -> Arc<dyn KeyValueStore> {
        Arc::new(MemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::backend::tests::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_basic() {
        test_store_basic_ops(MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_memory_store_close() {
        test_store_close(MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = MemoryStore::new();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(store.is_closed());
        assert!(matches!(
            store.get("a").await,
            Err(StateError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn test_stats_tracking() {
        let store = MemoryStore::new();
        store.set("a", json!(1)).await.unwrap();
        store.get("a").await.unwrap();
        store.get("b").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.set_count, 1);
        assert_eq!(stats.get_count, 2);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert!(stats.last_write.is_some());
    }

    #[tokio::test]
    async fn test_with_entries_and_clone_share_data() {
        let store = MemoryStore::with_entries(vec![("x", json!("1")), ("y", json!("2"))]);
        let other = store.clone();
        other.set("z", json!("3")).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_factory_creates_isolated_stores() {
        let factory = MemoryStoreFactory;
        let a = factory.create();
        let b = factory.create();
        a.set("k", json!(1)).await.unwrap();
        assert_eq!(b.get("k").await.unwrap(), None);
    }
}
