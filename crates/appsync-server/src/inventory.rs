// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster inventory read from the clusters' own API servers.

use std::collections::BTreeMap;
use std::sync::Arc;

use appsync_core::connector::{CloudConfigKey, CloudConfigStore, DEFAULT_LEVEL, DEFAULT_NAMESPACE};
use appsync_intents::model::{ClusterLabels, ClusterNodes, NodeInfo};
use appsync_intents::{ClusterInventory, IntentError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tracing::debug;

/// Parse a Kubernetes quantity into whole units.
///
/// Milli values are floored, binary (`Ki`..`Ei`) and decimal (`k`..`E`)
/// suffixes are expanded.
pub fn parse_quantity(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let value: f64 = number.parse().ok()?;
    let factor: f64 = match suffix {
        "" => 1.0,
        "m" => 0.001,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        _ => return None,
    };
    Some((value * factor).floor() as u64)
}

fn node_info(node: &Node) -> NodeInfo {
    let labels = node.metadata.labels.clone().unwrap_or_default();
    let allocatable = node
        .status
        .as_ref()
        .and_then(|s| s.allocatable.as_ref())
        .map(|alloc| {
            alloc
                .iter()
                .filter_map(|(name, q)| Some((name.clone(), parse_quantity(&q.0)?)))
                .collect()
        })
        .unwrap_or_default();
    NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        labels: labels.into_iter().collect(),
        allocatable,
    }
}

/// Labels carried by every node, as `key=value`.
fn common_labels(nodes: &[NodeInfo]) -> Vec<String> {
    let Some((first, rest)) = nodes.split_first() else {
        return Vec::new();
    };
    let mut common: BTreeMap<&String, &String> = first.labels.iter().collect();
    for node in rest {
        common.retain(|k, v| node.labels.get(*k) == Some(*v));
    }
    common.into_iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// Reads nodes through the kubeconfig stored for each cluster.
pub struct KubeInventory {
    cloud_config: Arc<dyn CloudConfigStore>,
}

impl KubeInventory {
    pub fn new(cloud_config: Arc<dyn CloudConfigStore>) -> Self {
        Self { cloud_config }
    }

    async fn client(&self, provider: &str, cluster: &str) -> appsync_intents::Result<Client> {
        let key = CloudConfigKey::new(provider, cluster, DEFAULT_LEVEL, DEFAULT_NAMESPACE);
        let raw = self.cloud_config.get_config(&key).await?;
        let text = std::str::from_utf8(&raw).map_err(appsync_core::Error::from)?;
        let kubeconfig = Kubeconfig::from_yaml(text)
            .map_err(|e| IntentError::Invalid(format!("kubeconfig of {provider}+{cluster}: {e}")))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| IntentError::Invalid(format!("kubeconfig of {provider}+{cluster}: {e}")))?;
        Client::try_from(config)
            .map_err(|e| IntentError::Invalid(format!("client for {provider}+{cluster}: {e}")))
    }
}

#[async_trait]
impl ClusterInventory for KubeInventory {
    async fn labels(&self, provider: &str, cluster: &str) -> appsync_intents::Result<ClusterLabels> {
        let nodes = self.nodes(provider, cluster).await?;
        Ok(ClusterLabels {
            labels: common_labels(&nodes.nodes),
        })
    }

    async fn nodes(&self, provider: &str, cluster: &str) -> appsync_intents::Result<ClusterNodes> {
        let client = self.client(provider, cluster).await?;
        let api: Api<Node> = Api::all(client);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| IntentError::Invalid(format!("listing nodes of {provider}+{cluster}: {e}")))?;
        let nodes: Vec<NodeInfo> = list.items.iter().map(node_info).collect();
        debug!(provider, cluster, nodes = nodes.len(), "Listed cluster nodes");
        Ok(ClusterNodes { nodes })
    }
}
