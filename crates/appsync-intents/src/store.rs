// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed access to intents and cluster inventory in the document store.

use std::sync::Arc;

use appsync_core::CompositeAppMeta;
use appsync_core::persistence::DocumentStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IntentError, Result};
use crate::model::{ClusterLabels, ClusterNodes};

/// Collection holding every intent.
pub const ORCHESTRATOR_COLLECTION: &str = "orchestrator";
/// Collection holding cluster label snapshots.
pub const CLUSTER_LABELS_COLLECTION: &str = "clusterLabels";
/// Collection holding cluster node snapshots.
pub const CLUSTER_NODES_COLLECTION: &str = "clusterNodes";

const DATA_TAG: &str = "data";
const LABELS_TAG: &str = "labels";
const NODES_TAG: &str = "nodes";

/// Kind of an intent document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentKind {
    HpaIntent,
    HpaConsumer,
    HpaResource,
    WorkloadIntent,
    WorkloadInterface,
    SfcIntent,
    SfcClientSelector,
    SfcProviderNetwork,
    SfcClient,
}

/// Deployment intent group and controller intent an intent belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentScope {
    pub project: String,
    pub composite_app: String,
    pub composite_app_version: String,
    pub deployment_intent_group: String,
    /// Controller intent passed to `UpdateAppContext`.
    pub intent: String,
}

impl IntentScope {
    pub fn new(meta: &CompositeAppMeta, intent: &str) -> Self {
        Self {
            project: meta.project.clone(),
            composite_app: meta.composite_app.clone(),
            composite_app_version: meta.version.clone(),
            deployment_intent_group: meta.deployment_intent_group.clone(),
            intent: intent.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IntentKey<'a> {
    project: &'a str,
    composite_app: &'a str,
    composite_app_version: &'a str,
    deployment_intent_group: &'a str,
    intent: &'a str,
    kind: IntentKind,
    /// Owning intent for nested kinds. `null` in a query matches any parent.
    parent: Option<&'a str>,
    /// `null` in a query matches every name.
    name: Option<&'a str>,
}

impl<'a> IntentKey<'a> {
    fn new(scope: &'a IntentScope, kind: IntentKind, parent: Option<&'a str>, name: Option<&'a str>) -> Self {
        Self {
            project: &scope.project,
            composite_app: &scope.composite_app,
            composite_app_version: &scope.composite_app_version,
            deployment_intent_group: &scope.deployment_intent_group,
            intent: &scope.intent,
            kind,
            parent,
            name,
        }
    }
}

#[derive(Debug, Serialize)]
struct ClusterKey<'a> {
    provider: &'a str,
    cluster: &'a str,
}

/// Intent and cluster inventory store.
#[derive(Clone)]
pub struct IntentStore {
    docs: Arc<dyn DocumentStore>,
}

impl IntentStore {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    /// Store an intent, replacing any previous version.
    pub async fn put<T: Serialize>(
        &self,
        scope: &IntentScope,
        kind: IntentKind,
        parent: Option<&str>,
        name: &str,
        intent: &T,
    ) -> Result<()> {
        let key = serde_json::to_value(IntentKey::new(scope, kind, parent, Some(name)))?;
        self.docs
            .insert(ORCHESTRATOR_COLLECTION, &key, DATA_TAG, &serde_json::to_value(intent)?)
            .await?;
        Ok(())
    }

    /// Fetch one intent.
    pub async fn get<T: DeserializeOwned>(
        &self,
        scope: &IntentScope,
        kind: IntentKind,
        parent: Option<&str>,
        name: &str,
    ) -> Result<T> {
        let key = serde_json::to_value(IntentKey::new(scope, kind, parent, Some(name)))?;
        let found = self.docs.find(ORCHESTRATOR_COLLECTION, &key, DATA_TAG).await?;
        let value = found
            .into_iter()
            .next()
            .ok_or_else(|| IntentError::NotFound(format!("{:?} {}", kind, name)))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Every intent of `kind` in the scope, optionally under one parent.
    pub async fn list<T: DeserializeOwned>(
        &self,
        scope: &IntentScope,
        kind: IntentKind,
        parent: Option<&str>,
    ) -> Result<Vec<T>> {
        let key = serde_json::to_value(IntentKey::new(scope, kind, parent, None))?;
        self.docs
            .find(ORCHESTRATOR_COLLECTION, &key, DATA_TAG)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(IntentError::from))
            .collect()
    }

    async fn get_cluster_doc<T: DeserializeOwned + Default>(
        &self,
        collection: &str,
        tag: &str,
        provider: &str,
        cluster: &str,
    ) -> Result<Option<T>> {
        let key = serde_json::to_value(ClusterKey { provider, cluster })?;
        match self.docs.find(collection, &key, tag).await?.into_iter().next() {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn put_cluster_labels(&self, provider: &str, cluster: &str, labels: &ClusterLabels) -> Result<()> {
        let key = serde_json::to_value(ClusterKey { provider, cluster })?;
        self.docs
            .insert(CLUSTER_LABELS_COLLECTION, &key, LABELS_TAG, &serde_json::to_value(labels)?)
            .await?;
        Ok(())
    }

    pub async fn get_cluster_labels(&self, provider: &str, cluster: &str) -> Result<Option<ClusterLabels>> {
        self.get_cluster_doc(CLUSTER_LABELS_COLLECTION, LABELS_TAG, provider, cluster)
            .await
    }

    pub async fn put_cluster_nodes(&self, provider: &str, cluster: &str, nodes: &ClusterNodes) -> Result<()> {
        let key = serde_json::to_value(ClusterKey { provider, cluster })?;
        self.docs
            .insert(CLUSTER_NODES_COLLECTION, &key, NODES_TAG, &serde_json::to_value(nodes)?)
            .await?;
        Ok(())
    }

    pub async fn get_cluster_nodes(&self, provider: &str, cluster: &str) -> Result<Option<ClusterNodes>> {
        self.get_cluster_doc(CLUSTER_NODES_COLLECTION, NODES_TAG, provider, cluster)
            .await
    }

    /// Drop the label and node snapshots of a cluster. Missing snapshots are ignored.
    pub async fn remove_cluster_snapshot(&self, provider: &str, cluster: &str) -> Result<()> {
        let key: Value = serde_json::to_value(ClusterKey { provider, cluster })?;
        for collection in [CLUSTER_LABELS_COLLECTION, CLUSTER_NODES_COLLECTION] {
            match self.docs.remove(collection, &key).await {
                Ok(()) | Err(appsync_core::Error::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
