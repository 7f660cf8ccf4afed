//! Key/value store trait definition
//!
//! This module defines the `KeyValueStore` trait consumed by the stateful
//! operators and materialized tables, plus the `StorageFactory` used to hand
//! every pipeline its own store.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::StateResult;

/// Core trait for key/value storage adapters
///
/// Keys are strings and values are JSON values. All operations are async so
/// that persistent adapters can do I/O without blocking the run loop.
///
/// ## Implementation Requirements
///
/// - **Per-key serialization**: concurrent `set` calls on the same key must
///   not interleave. The stateful operators rely on this together with the
///   one-message-at-a-time executor for their read-modify-write cycle.
/// - **No implicit expiry**: an entry lives until the store is closed.
/// - **Closed stores fail**: every operation after `close` returns an error.
///
/// ## Example Implementation
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use kstreams::state::KeyValueStore;
/// use kstreams::StateResult;
/// use serde_json::Value;
/// use std::collections::HashMap;
/// use tokio::sync::RwLock;
///
/// struct SimpleStore {
///     data: RwLock<HashMap<String, Value>>,
/// }
///
/// #[async_trait]
/// impl KeyValueStore for SimpleStore {
///     async fn get(&self, key: &str) -> StateResult<Option<Value>> {
///         Ok(self.data.read().await.get(key).cloned())
///     }
///
///     async fn set(&self, key: &str, value: Value) -> StateResult<()> {
///         self.data.write().await.insert(key.to_string(), value);
///         Ok(())
///     }
///
///     async fn state(&self) -> StateResult<HashMap<String, Value>> {
///         Ok(self.data.read().await.clone())
///     }
///
///     async fn close(&self) -> StateResult<()> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve the value stored under `key`
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))` if the key exists
    /// - `Ok(None)` if the key does not exist
    /// - `Err(_)` if the store failed or is closed
    async fn get(&self, key: &str) -> StateResult<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: Value) -> StateResult<()>;

    /// Snapshot of every entry
    async fn state(&self) -> StateResult<HashMap<String, Value>>;

    /// Release the store. Later operations fail.
    async fn close(&self) -> StateResult<()>;

    /// Check whether a key exists
    async fn contains(&self, key: &str) -> StateResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Number of stored entries
    async fn len(&self) -> StateResult<usize> {
        Ok(self.state().await?.len())
    }

    async fn is_empty(&self) -> StateResult<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Creates a fresh store for each stream or table
pub trait StorageFactory: Send + Sync {
    fn create(&self) -> Arc<dyn KeyValueStore>;
}

/// Generic checks any `KeyValueStore` implementation should pass
#[cfg(test)]
pub mod tests {
    use super::*;
    use serde_json::json;

    pub async fn test_store_basic_ops<S: KeyValueStore>(store: S) {
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert!(store.is_empty().await.unwrap());

        store.set("a", json!(1)).await.unwrap();
        store.set("b", json!("two")).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!(1)));
        assert!(store.contains("b").await.unwrap());
        assert_eq!(store.len().await.unwrap(), 2);

        // last write wins
        store.set("a", json!(3)).await.unwrap();
        let snapshot = store.state().await.unwrap();
        assert_eq!(snapshot.get("a"), Some(&json!(3)));
        assert_eq!(snapshot.get("b"), Some(&json!("two")));
    }

    pub async fn test_store_close<S: KeyValueStore>(store: S) {
        store.set("a", json!(1)).await.unwrap();
        store.close().await.unwrap();

        assert!(store.get("a").await.is_err());
        assert!(store.set("a", json!(2)).await.is_err());
        assert!(store.state().await.is_err());
    }
}
