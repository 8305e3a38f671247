// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloud configuration (kubeconfig) lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::persistence::DocumentStore;

/// Document collection holding cloud configurations.
pub const CLOUD_CONFIG_COLLECTION: &str = "cloudconfig";
const CLOUD_CONFIG_TAG: &str = "config";

/// Key of one cloud configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloudConfigKey {
    pub provider: String,
    pub cluster: String,
    pub level: String,
    pub namespace: String,
}

impl CloudConfigKey {
    pub fn new(provider: &str, cluster: &str, level: &str, namespace: &str) -> Self {
        Self {
            provider: provider.to_string(),
            cluster: cluster.to_string(),
            level: level.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CloudConfigDoc {
    config: String,
}

/// Source of cluster credentials.
#[async_trait]
pub trait CloudConfigStore: Send + Sync {
    /// Kubeconfig bytes for a cluster.
    async fn get_config(&self, key: &CloudConfigKey) -> Result<Vec<u8>>;

    /// Store kubeconfig bytes for a cluster.
    async fn put_config(&self, key: &CloudConfigKey, config: &[u8]) -> Result<()>;
}

/// In-memory cloud configuration store.
#[derive(Debug, Default)]
pub struct MemoryCloudConfigStore {
    configs: RwLock<HashMap<CloudConfigKey, Vec<u8>>>,
}

impl MemoryCloudConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CloudConfigStore for MemoryCloudConfigStore {
    async fn get_config(&self, key: &CloudConfigKey) -> Result<Vec<u8>> {
        self.configs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("cloud config for {}+{}", key.provider, key.cluster)))
    }

    async fn put_config(&self, key: &CloudConfigKey, config: &[u8]) -> Result<()> {
        self.configs
            .write()
            .await
            .insert(key.clone(), config.to_vec());
        Ok(())
    }
}

/// Cloud configuration kept in the document store.
#[derive(Clone)]
pub struct DocumentCloudConfigStore {
    docs: Arc<dyn DocumentStore>,
}

impl DocumentCloudConfigStore {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl CloudConfigStore for DocumentCloudConfigStore {
    async fn get_config(&self, key: &CloudConfigKey) -> Result<Vec<u8>> {
        let key_json = serde_json::to_value(key)?;
        let found = self
            .docs
            .find(CLOUD_CONFIG_COLLECTION, &key_json, CLOUD_CONFIG_TAG)
            .await?;
        let doc = found.into_iter().next().ok_or_else(|| {
            Error::NotFound(format!("cloud config for {}+{}", key.provider, key.cluster))
        })?;
        let doc: CloudConfigDoc = serde_json::from_value(doc)?;
        Ok(doc.config.into_bytes())
    }

    async fn put_config(&self, key: &CloudConfigKey, config: &[u8]) -> Result<()> {
        let doc = CloudConfigDoc {
            config: std::str::from_utf8(config)?.to_string(),
        };
        self.docs
            .insert(
                CLOUD_CONFIG_COLLECTION,
                &serde_json::to_value(key)?,
                CLOUD_CONFIG_TAG,
                &serde_json::to_value(&doc)?,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCloudConfigStore::new();
        let key = CloudConfigKey::new("p", "c1", "0", "default");
        assert!(store.get_config(&key).await.is_err());
        store.put_config(&key, b"apiVersion: v1").await.unwrap();
        assert_eq!(store.get_config(&key).await.unwrap(), b"apiVersion: v1");
    }

    #[tokio::test]
    async fn test_document_store_keys_by_all_fields() {
        let store = DocumentCloudConfigStore::new(Arc::new(MemoryStore::new()));
        let k1 = CloudConfigKey::new("p", "c1", "0", "default");
        let k2 = CloudConfigKey::new("p", "c1", "1", "ns1");
        store.put_config(&k1, b"one").await.unwrap();
        store.put_config(&k2, b"two").await.unwrap();
        assert_eq!(store.get_config(&k1).await.unwrap(), b"one");
        assert_eq!(store.get_config(&k2).await.unwrap(), b"two");
        let missing = CloudConfigKey::new("p", "c2", "0", "default");
        assert!(matches!(
            store.get_config(&missing).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
