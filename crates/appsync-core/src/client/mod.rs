// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster clients.
//!
//! A [`ClusterClient`] performs single-resource operations against one
//! remote cluster. Every operation completes before returning; parallelism
//! lives in the reconciler above it.
//!
//! Two implementations exist:
//! - [`fake::FakeClusterClient`]: deterministic, in-process, no network.
//! - `kube::KubeClusterClient` (feature `kube-client`): talks to a real
//!   API server through a materialized kubeconfig.

pub mod fake;
#[cfg(feature = "kube-client")]
pub mod kube;

use async_trait::async_trait;
use serde_yaml::{Mapping, Value};

use crate::error::Error;

/// Label key stamped on every applied resource and used by the status CR selector.
pub const DEPLOYMENT_LABEL: &str = "appsync.io/deployment-id";

/// Kind of the status-tracking custom resource.
pub const STATUS_CR_KIND: &str = "ResourceBundleState";

/// Kinds whose pod template also receives the deployment label.
const WORKLOAD_KINDS: &[&str] = &[
    "Deployment",
    "StatefulSet",
    "DaemonSet",
    "ReplicaSet",
    "Job",
];

/// Cluster client errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The cluster API server did not answer.
    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    /// The resource document is malformed or incomplete.
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// Kubernetes API error.
    #[cfg(feature = "kube-client")]
    #[error("kubernetes error: {0}")]
    Kube(#[from] ::kube::Error),

    /// Kubeconfig could not be loaded.
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// YAML (de)serialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure injected by the fake client.
    #[error("injected failure: {0}")]
    Injected(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type for cluster client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Operations against one remote cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create or update a single serialized resource.
    async fn apply(&self, content: &[u8]) -> ClientResult<()>;

    /// Delete a single serialized resource. Deleting a missing resource succeeds.
    async fn delete(&self, content: &[u8]) -> ClientResult<()>;

    /// Read the live state of the resource identified by `content`.
    async fn get(&self, content: &[u8], namespace: &str) -> ClientResult<Vec<u8>>;

    /// Approve a certificate signing request.
    async fn approve(&self, name: &str, approval: &[u8]) -> ClientResult<()>;

    /// Cheap probe of the API server. Has no side effects.
    async fn is_reachable(&self) -> ClientResult<()>;

    /// Stamp `label` into the resource so a status CR can select it.
    fn tag_resource(&self, content: &[u8], label: &str) -> ClientResult<Vec<u8>> {
        tag_resource(content, label)
    }

    /// Release client resources.
    async fn close(&self) {}
}

/// Split a `<provider>+<cluster>` name.
pub fn split_cluster_name(name: &str) -> crate::error::Result<(&str, &str)> {
    let mut parts = name.split('+');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(provider), Some(cluster), None) if !provider.is_empty() && !cluster.is_empty() => {
            Ok((provider, cluster))
        }
        _ => Err(Error::InvalidClusterName(name.to_string())),
    }
}

fn labels_of(obj: &mut Mapping) -> ClientResult<&mut Mapping> {
    let metadata = obj
        .entry(Value::from("metadata"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    let metadata = metadata
        .as_mapping_mut()
        .ok_or_else(|| ClientError::InvalidResource("metadata is not a mapping".to_string()))?;
    let labels = metadata
        .entry(Value::from("labels"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if labels.is_null() {
        *labels = Value::Mapping(Mapping::new());
    }
    labels
        .as_mapping_mut()
        .ok_or_else(|| ClientError::InvalidResource("labels is not a mapping".to_string()))
}

/// Add the deployment label to a YAML resource.
///
/// Workload kinds get the label on their pod template as well.
pub fn tag_resource(content: &[u8], label: &str) -> ClientResult<Vec<u8>> {
    let mut doc: Value = serde_yaml::from_slice(content)?;
    let obj = doc
        .as_mapping_mut()
        .ok_or_else(|| ClientError::InvalidResource("resource is not a mapping".to_string()))?;

    let kind = obj
        .get("kind")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default();

    labels_of(obj)?.insert(Value::from(DEPLOYMENT_LABEL), Value::from(label));

    if WORKLOAD_KINDS.contains(&kind.as_str())
        && let Some(template) = obj
            .get_mut("spec")
            .and_then(|s| s.get_mut("template"))
            .and_then(Value::as_mapping_mut)
    {
        labels_of(template)?.insert(Value::from(DEPLOYMENT_LABEL), Value::from(label));
    }

    Ok(serde_yaml::to_string(&doc)?.into_bytes())
}

/// Kind and name of a YAML resource.
pub fn resource_identity(content: &[u8]) -> ClientResult<(String, String)> {
    let doc: Value = serde_yaml::from_slice(content)?;
    let kind = doc
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::InvalidResource("missing kind".to_string()))?;
    let name = doc
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::InvalidResource("missing metadata.name".to_string()))?;
    Ok((kind.to_string(), name.to_string()))
}
