// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Intent documents read by the controllers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Metadata {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
        }
    }
}

// ---------------------------------------------------------------
// HPA placement
// ---------------------------------------------------------------

/// Placement intent attached to one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaIntent {
    pub metadata: Metadata,
    pub spec: HpaIntentSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaIntentSpec {
    pub app: String,
}

/// Workload of the app whose replicas need placing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaConsumer {
    pub metadata: Metadata,
    pub spec: HpaConsumerSpec,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaConsumerSpec {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub name: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub container_name: String,
}

/// One requirement of a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaResource {
    pub metadata: Metadata,
    pub spec: HpaResourceSpec,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaResourceSpec {
    /// Quantitative (`cpu`, `memory`, ...) rather than a label match.
    pub allocatable: bool,
    /// Non-mandatory requirements never remove a cluster.
    #[serde(default = "default_true")]
    pub mandatory: bool,
    pub resource: HpaRequirement,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaRequirement {
    /// Allocatable resource name.
    #[serde(default)]
    pub name: String,
    /// Amount requested per replica.
    #[serde(default)]
    pub requests: u64,
    #[serde(default)]
    pub limits: u64,
    /// Node label key of a non-allocatable requirement.
    #[serde(default)]
    pub key: String,
    /// Node label value of a non-allocatable requirement.
    #[serde(default)]
    pub value: String,
}

// ---------------------------------------------------------------
// Cluster inventory
// ---------------------------------------------------------------

/// Labels of one cluster, as last reported by the cluster manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLabels {
    pub labels: Vec<String>,
}

/// One node of a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Free capacity per resource name.
    #[serde(default)]
    pub allocatable: BTreeMap<String, u64>,
}

/// Nodes of one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNodes {
    pub nodes: Vec<NodeInfo>,
}

// ---------------------------------------------------------------
// Workload networking
// ---------------------------------------------------------------

/// Workload of an app that gets extra network interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadIntent {
    pub metadata: Metadata,
    pub spec: WorkloadIntentSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadIntentSpec {
    pub app: String,
    pub workload_resource: String,
    #[serde(rename = "type")]
    pub resource_type: String,
}

impl WorkloadIntentSpec {
    /// AppContext resource name of the workload.
    pub fn resource_name(&self) -> String {
        format!("{}+{}", self.workload_resource, self.resource_type)
    }
}

/// One interface of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadInterfaceIntent {
    pub metadata: Metadata,
    pub spec: WorkloadInterfaceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadInterfaceSpec {
    /// Interface name inside the pod.
    pub interface: String,
    /// Network the interface attaches to.
    #[serde(rename = "name")]
    pub network: String,
    #[serde(default)]
    pub default_gateway: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub mac_address: String,
}

// ---------------------------------------------------------------
// Service function chaining
// ---------------------------------------------------------------

/// End of a chain that a client or provider network attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainEnd {
    Left,
    Right,
}

/// A service function chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcIntent {
    pub metadata: Metadata,
    pub spec: SfcIntentSpec,
}

fn default_chain_type() -> String {
    "Routing".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcIntentSpec {
    #[serde(default = "default_chain_type")]
    pub chain_type: String,
    #[serde(default)]
    pub namespace: String,
    /// Links from the left end to the right end.
    pub network_chain: Vec<SfcLink>,
}

/// One app of a chain and the network leading to the next app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcLink {
    pub app: String,
    /// Pod labels selecting the app's workload in the chain.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Network towards the next link. Empty on the last link.
    #[serde(default)]
    pub right_network: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Pods allowed to enter a chain end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcClientSelectorIntent {
    pub metadata: Metadata,
    pub spec: SfcClientSelectorSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcClientSelectorSpec {
    pub chain_end: ChainEnd,
    #[serde(default)]
    pub pod_selector: LabelSelector,
    #[serde(default)]
    pub namespace_selector: LabelSelector,
}

/// Provider network attached to a chain end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcProviderNetworkIntent {
    pub metadata: Metadata,
    pub spec: SfcProviderNetworkSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcProviderNetworkSpec {
    pub chain_end: ChainEnd,
    pub network_name: String,
    #[serde(default)]
    pub gateway_ip: String,
    #[serde(default)]
    pub subnet: String,
}

/// Workload that is a client of a chain end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcClientIntent {
    pub metadata: Metadata,
    pub spec: SfcClientSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcClientSpec {
    pub chain_name: String,
    pub chain_end: ChainEnd,
    pub app: String,
    pub workload_resource: String,
    #[serde(rename = "type")]
    pub resource_type: String,
}

impl SfcClientSpec {
    /// AppContext resource name of the workload.
    pub fn resource_name(&self) -> String {
        format!("{}+{}", self.workload_resource, self.resource_type)
    }
}
