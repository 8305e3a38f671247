// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory persistence, used by tests and embedded deployments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{DocumentStore, KvStore, key_matches};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Document {
    collection: String,
    key: Value,
    tag: String,
    data: Value,
}

/// In-memory implementation of both [`KvStore`] and [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    kv: RwLock<BTreeMap<String, Vec<u8>>>,
    documents: RwLock<Vec<Document>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.kv.write().await.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.kv.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.kv.write().await.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut kv = self.kv.write().await;
        let before = kv.len();
        kv.retain(|k, _| !k.starts_with(prefix));
        Ok((before - kv.len()) as u64)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let kv = self.kv.read().await;
        Ok(kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, key: &Value, tag: &str, data: &Value) -> Result<()> {
        let mut docs = self.documents.write().await;
        match docs
            .iter_mut()
            .find(|d| d.collection == collection && d.key == *key && d.tag == tag)
        {
            Some(existing) => existing.data = data.clone(),
            None => docs.push(Document {
                collection: collection.to_string(),
                key: key.clone(),
                tag: tag.to_string(),
                data: data.clone(),
            }),
        }
        Ok(())
    }

    async fn find(&self, collection: &str, key: &Value, tag: &str) -> Result<Vec<Value>> {
        let docs = self.documents.read().await;
        Ok(docs
            .iter()
            .filter(|d| d.collection == collection && d.tag == tag && key_matches(key, &d.key))
            .map(|d| d.data.clone())
            .collect())
    }

    async fn remove(&self, collection: &str, key: &Value) -> Result<()> {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|d| !(d.collection == collection && d.key == *key));
        if documents.len() == before {
            return Err(Error::NotFound(format!(
                "document {} in collection {}",
                key, collection
            )));
        }
        Ok(())
    }
}
