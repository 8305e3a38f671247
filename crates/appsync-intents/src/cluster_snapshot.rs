// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster label and node snapshots driven by cluster manager events.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{IntentError, Result};
use crate::model::{ClusterLabels, ClusterNodes};
use crate::store::IntentStore;

/// Change reported for one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClmEvent {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for ClmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClmEvent::Created => "CREATED",
            ClmEvent::Updated => "UPDATED",
            ClmEvent::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Source of cluster labels and node capacity.
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    async fn labels(&self, provider: &str, cluster: &str) -> Result<ClusterLabels>;
    async fn nodes(&self, provider: &str, cluster: &str) -> Result<ClusterNodes>;
}

/// Inventory held in memory, filled by the caller.
#[derive(Default)]
pub struct StaticInventory {
    clusters: RwLock<HashMap<(String, String), (ClusterLabels, ClusterNodes)>>,
}

impl StaticInventory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, provider: &str, cluster: &str, labels: ClusterLabels, nodes: ClusterNodes) {
        if let Ok(mut clusters) = self.clusters.write() {
            clusters.insert((provider.to_string(), cluster.to_string()), (labels, nodes));
        }
    }

    fn lookup(&self, provider: &str, cluster: &str) -> Result<(ClusterLabels, ClusterNodes)> {
        self.clusters
            .read()
            .ok()
            .and_then(|c| c.get(&(provider.to_string(), cluster.to_string())).cloned())
            .ok_or_else(|| IntentError::NotFound(format!("cluster {provider}+{cluster}")))
    }
}

#[async_trait]
impl ClusterInventory for StaticInventory {
    async fn labels(&self, provider: &str, cluster: &str) -> Result<ClusterLabels> {
        Ok(self.lookup(provider, cluster)?.0)
    }

    async fn nodes(&self, provider: &str, cluster: &str) -> Result<ClusterNodes> {
        Ok(self.lookup(provider, cluster)?.1)
    }
}

/// Keeps the `clusterLabels` and `clusterNodes` snapshots in step with the cluster manager.
#[derive(Clone)]
pub struct ClusterSnapshots {
    intents: IntentStore,
    inventory: Arc<dyn ClusterInventory>,
}

impl ClusterSnapshots {
    pub fn new(intents: IntentStore, inventory: Arc<dyn ClusterInventory>) -> Self {
        Self { intents, inventory }
    }

    #[instrument(skip(self))]
    pub async fn handle_event(&self, provider: &str, cluster: &str, event: ClmEvent) -> Result<()> {
        match event {
            ClmEvent::Created | ClmEvent::Updated => {
                let labels = self.inventory.labels(provider, cluster).await?;
                let nodes = self.inventory.nodes(provider, cluster).await?;
                self.intents.put_cluster_labels(provider, cluster, &labels).await?;
                self.intents.put_cluster_nodes(provider, cluster, &nodes).await?;
                info!(
                    provider,
                    cluster,
                    labels = labels.labels.len(),
                    nodes = nodes.nodes.len(),
                    "Cluster snapshot stored"
                );
            }
            ClmEvent::Deleted => {
                self.intents.remove_cluster_snapshot(provider, cluster).await?;
                info!(provider, cluster, "Cluster snapshot removed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeInfo;
    use appsync_core::persistence::MemoryStore;

    #[tokio::test]
    async fn test_snapshot_follows_events() {
        let inventory = StaticInventory::new();
        inventory.set(
            "p",
            "c1",
            ClusterLabels {
                labels: vec!["edge".to_string()],
            },
            ClusterNodes {
                nodes: vec![NodeInfo {
                    name: "n1".to_string(),
                    ..Default::default()
                }],
            },
        );
        let intents = IntentStore::new(Arc::new(MemoryStore::new()));
        let snapshots = ClusterSnapshots::new(intents.clone(), inventory);

        snapshots.handle_event("p", "c1", ClmEvent::Created).await.unwrap();
        assert_eq!(intents.get_cluster_nodes("p", "c1").await.unwrap().unwrap().nodes.len(), 1);

        snapshots.handle_event("p", "c1", ClmEvent::Deleted).await.unwrap();
        assert!(intents.get_cluster_labels("p", "c1").await.unwrap().is_none());
        assert!(intents.get_cluster_nodes("p", "c1").await.unwrap().is_none());

        let missing = snapshots.handle_event("p", "c9", ClmEvent::Updated).await;
        assert!(matches!(missing, Err(IntentError::NotFound(_))));
    }

    #[test]
    fn test_event_wire_names() {
        assert_eq!(serde_json::to_string(&ClmEvent::Created).unwrap(), "\"CREATED\"");
        let parsed: ClmEvent = serde_json::from_str("\"DELETED\"").unwrap();
        assert_eq!(parsed, ClmEvent::Deleted);
        assert_eq!(ClmEvent::Updated.to_string(), "UPDATED");
    }
}
