// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for appsync-core.
//!
//! Two stores back the engine:
//!
//! - [`KvStore`]: an etcd-like flat key space. The AppContext tree, the
//!   event queues and the active-context registry live here.
//! - [`DocumentStore`]: a Mongo-like store of JSON documents addressed by
//!   `(collection, key, tag)`. Intents, cloud configuration and cluster
//!   inventory snapshots live here.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Flat key/value store with prefix scans.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Insert or overwrite a key.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Read a key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a single key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key starting with `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// List every key starting with `prefix`, in lexical order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Document store keyed by typed JSON keys.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document stored under `(collection, key, tag)`.
    async fn insert(&self, collection: &str, key: &Value, tag: &str, data: &Value) -> Result<()>;

    /// Return the `tag` value of every document in `collection` whose key
    /// contains all non-null fields of `key`.
    async fn find(&self, collection: &str, key: &Value, tag: &str) -> Result<Vec<Value>>;

    /// Remove every document stored under exactly `key`.
    ///
    /// Fails with [`Error::NotFound`](crate::error::Error::NotFound) when nothing matched.
    async fn remove(&self, collection: &str, key: &Value) -> Result<()>;
}

/// True when every non-null field of `query` is present with the same value in `key`.
pub(crate) fn key_matches(query: &Value, key: &Value) -> bool {
    match (query, key) {
        (Value::Object(q), Value::Object(k)) => q
            .iter()
            .filter(|(_, v)| !v.is_null())
            .all(|(name, v)| k.get(name) == Some(v)),
        _ => query == key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_matches_subset() {
        let key = json!({"project": "p1", "compositeApp": "ca", "intent": "i1"});
        assert!(key_matches(&json!({"project": "p1"}), &key));
        assert!(key_matches(
            &json!({"project": "p1", "compositeApp": "ca", "intent": null}),
            &key
        ));
        assert!(!key_matches(&json!({"project": "p2"}), &key));
        assert!(!key_matches(&json!({"missing": "x"}), &key));
    }

    #[test]
    fn test_key_matches_scalars() {
        assert!(key_matches(&json!("a"), &json!("a")));
        assert!(!key_matches(&json!("a"), &json!("b")));
    }
}
