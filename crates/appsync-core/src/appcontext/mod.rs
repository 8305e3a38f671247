// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! AppContext store.
//!
//! An AppContext is a tree of handles persisted in a [`KvStore`]. A handle is
//! the key of a node; every node carries a JSON value and may have named child
//! levels:
//!
//! ```text
//! /context/<id>/                                     root (value: id)
//! /context/<id>/meta/                                composite app metadata
//! /context/<id>/app/instruction/order/               {"apporder": [...]}
//! /context/<id>/app/<app>/                           app
//! /context/<id>/app/<app>/cluster/<provider+name>/   cluster
//! .../cluster/<c>/resource/instruction/order/        {"resorder": [...]}
//! .../cluster/<c>/resource/<res>/                    resource (value: YAML)
//! .../resource/<res>/status/                         resource status
//! .../resource/<res>/subresource/approval/           approval payload
//! ```
//!
//! The set of AppContexts with live workers is recorded under
//! `/activecontext/<id>/` so that a restarted process can resume them.

pub mod utils;

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::persistence::KvStore;

const CONTEXT_PREFIX: &str = "/context/";
const ACTIVE_PREFIX: &str = "/activecontext/";
const INSTRUCTION: &str = "instruction";

/// Level name of app nodes.
pub const APP_LEVEL: &str = "app";
/// Level name of cluster nodes.
pub const CLUSTER_LEVEL: &str = "cluster";
/// Level name of resource nodes.
pub const RESOURCE_LEVEL: &str = "resource";

/// Key of one node in the AppContext tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(String);

impl Handle {
    /// The raw key. Always ends with `/`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn child(&self, level: &str, name: &str) -> Handle {
        Handle(format!("{}{}/{}/", self.0, level, name))
    }

    fn level(&self, level: &str) -> Handle {
        Handle(format!("{}{}/", self.0, level))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite application metadata stored at the root of an AppContext.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeAppMeta {
    pub project: String,
    pub composite_app: String,
    pub version: String,
    pub release: String,
    pub deployment_intent_group: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub level: String,
}

/// One AppContext tree.
///
/// Cheap to clone; holds only the id and the shared store.
#[derive(Clone)]
pub struct AppContext {
    id: String,
    root: Handle,
    store: Arc<dyn KvStore>,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext").field("id", &self.id).finish()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == INSTRUCTION {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

impl AppContext {
    /// Create a new AppContext with a fresh numeric id.
    pub async fn init(store: Arc<dyn KvStore>) -> Result<Self> {
        let (id, _) = uuid::Uuid::new_v4().as_u64_pair();
        Self::create(store, &id.to_string()).await
    }

    /// Create (or reset the root value of) an AppContext with a caller-chosen id.
    pub async fn create(store: Arc<dyn KvStore>, id: &str) -> Result<Self> {
        validate_name(id)?;
        let ac = Self::at(store, id);
        ac.put_json(&ac.root, &ac.id).await?;
        debug!(app_context_id = %ac.id, "AppContext created");
        Ok(ac)
    }

    /// Open an existing AppContext. Fails with [`Error::NotFound`] if its root is missing.
    pub async fn load(store: Arc<dyn KvStore>, id: &str) -> Result<Self> {
        validate_name(id)?;
        let ac = Self::at(store, id);
        if ac.store.get(ac.root.as_str()).await?.is_none() {
            return Err(Error::NotFound(format!("AppContext {}", id)));
        }
        Ok(ac)
    }

    fn at(store: Arc<dyn KvStore>, id: &str) -> Self {
        Self {
            id: id.to_string(),
            root: Handle(format!("{}{}/", CONTEXT_PREFIX, id)),
            store,
        }
    }

    /// The AppContext id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handle of the root node.
    pub fn root(&self) -> &Handle {
        &self.root
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    // ---------------------------------------------------------------
    // Raw node access
    // ---------------------------------------------------------------

    async fn put_json<T: Serialize + ?Sized>(&self, handle: &Handle, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.put(handle.as_str(), &bytes).await
    }

    /// True when the node exists.
    pub async fn exists(&self, handle: &Handle) -> Result<bool> {
        Ok(self.store.get(handle.as_str()).await?.is_some())
    }

    /// Read and decode the value of a node.
    pub async fn get_value<T: DeserializeOwned>(&self, handle: &Handle) -> Result<T> {
        match self.store.get(handle.as_str()).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(Error::NotFound(handle.to_string())),
        }
    }

    /// Read a node's value if the node exists.
    pub async fn get_value_opt<T: DeserializeOwned>(&self, handle: &Handle) -> Result<Option<T>> {
        match self.store.get(handle.as_str()).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Replace the value of an existing node.
    pub async fn update_value<T: Serialize + ?Sized>(&self, handle: &Handle, value: &T) -> Result<()> {
        if !self.exists(handle).await? {
            return Err(Error::NotFound(handle.to_string()));
        }
        self.put_json(handle, value).await
    }

    /// Write a status value, creating the node if needed.
    ///
    /// Status nodes may be written into a status AppContext that does not
    /// carry the resource itself, so no parent check is made.
    pub async fn update_status_value<T: Serialize + ?Sized>(
        &self,
        handle: &Handle,
        value: &T,
    ) -> Result<()> {
        self.put_json(handle, value).await
    }

    /// Delete a node and its whole subtree.
    pub async fn delete_handle(&self, handle: &Handle) -> Result<()> {
        let removed = self.store.delete_prefix(handle.as_str()).await?;
        debug!(app_context_id = %self.id, handle = %handle, removed, "Deleted handle");
        Ok(())
    }

    /// Delete the whole AppContext.
    pub async fn delete_composite_app(&self) -> Result<()> {
        self.delete_handle(&self.root.clone()).await
    }

    /// Add a named value level under `parent`.
    pub async fn add_level_value<T: Serialize + ?Sized>(
        &self,
        parent: &Handle,
        key: &str,
        value: &T,
    ) -> Result<Handle> {
        validate_name(key)?;
        let handle = parent.level(key);
        self.put_json(&handle, value).await?;
        Ok(handle)
    }

    /// Handle of a named value level under `parent`.
    pub async fn get_level_handle(&self, parent: &Handle, key: &str) -> Result<Handle> {
        let handle = parent.level(key);
        if !self.exists(&handle).await? {
            return Err(Error::NotFound(handle.to_string()));
        }
        Ok(handle)
    }

    /// Names of the direct children of `parent` at `level`, in lexical order.
    async fn child_names(&self, parent: &Handle, level: &str) -> Result<Vec<String>> {
        let prefix = parent.level(level);
        let keys = self.store.keys_with_prefix(prefix.as_str()).await?;
        let mut names = Vec::new();
        for key in keys {
            let rest = &key[prefix.as_str().len()..];
            if let Some((name, tail)) = rest.split_once('/')
                && tail.is_empty()
                && name != INSTRUCTION
            {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    // ---------------------------------------------------------------
    // Composite app metadata
    // ---------------------------------------------------------------

    /// Store composite app metadata.
    pub async fn add_composite_meta(&self, meta: &CompositeAppMeta) -> Result<Handle> {
        self.add_level_value(&self.root.clone(), "meta", meta).await
    }

    /// Read composite app metadata.
    pub async fn get_composite_meta(&self) -> Result<CompositeAppMeta> {
        self.get_value(&self.root.level("meta")).await
    }

    // ---------------------------------------------------------------
    // Apps, clusters, resources
    // ---------------------------------------------------------------

    /// Path of an app node. The node may not exist.
    pub fn app_path(&self, app: &str) -> Handle {
        self.root.child(APP_LEVEL, app)
    }

    /// Path of a cluster node. The node may not exist.
    pub fn cluster_path(&self, app: &str, cluster: &str) -> Handle {
        self.app_path(app).child(CLUSTER_LEVEL, cluster)
    }

    /// Path of a resource node. The node may not exist.
    pub fn resource_path(&self, app: &str, cluster: &str, resource: &str) -> Handle {
        self.cluster_path(app, cluster).child(RESOURCE_LEVEL, resource)
    }

    async fn existing(&self, handle: Handle) -> Result<Handle> {
        if self.exists(&handle).await? {
            Ok(handle)
        } else {
            Err(Error::NotFound(handle.to_string()))
        }
    }

    /// Add an app.
    pub async fn add_app(&self, app: &str) -> Result<Handle> {
        validate_name(app)?;
        let handle = self.app_path(app);
        self.put_json(&handle, app).await?;
        Ok(handle)
    }

    /// Handle of an existing app.
    pub async fn get_app_handle(&self, app: &str) -> Result<Handle> {
        self.existing(self.app_path(app)).await
    }

    /// Names of every app in the tree.
    pub async fn get_app_names(&self) -> Result<Vec<String>> {
        self.child_names(&self.root, APP_LEVEL).await
    }

    /// Add a cluster under an app handle.
    pub async fn add_cluster(&self, app: &Handle, cluster: &str) -> Result<Handle> {
        validate_name(cluster)?;
        let handle = app.child(CLUSTER_LEVEL, cluster);
        self.put_json(&handle, cluster).await?;
        Ok(handle)
    }

    /// Handle of an existing cluster.
    pub async fn get_cluster_handle(&self, app: &str, cluster: &str) -> Result<Handle> {
        self.existing(self.cluster_path(app, cluster)).await
    }

    /// Names of every cluster of an app.
    pub async fn get_cluster_names(&self, app: &str) -> Result<Vec<String>> {
        self.child_names(&self.app_path(app), CLUSTER_LEVEL).await
    }

    /// Add a resource under a cluster handle. `definition` is the YAML document.
    pub async fn add_resource(
        &self,
        cluster: &Handle,
        resource: &str,
        definition: &[u8],
    ) -> Result<Handle> {
        validate_name(resource)?;
        let handle = cluster.child(RESOURCE_LEVEL, resource);
        let text = std::str::from_utf8(definition)?;
        self.put_json(&handle, text).await?;
        Ok(handle)
    }

    /// Handle of an existing resource.
    pub async fn get_resource_handle(
        &self,
        app: &str,
        cluster: &str,
        resource: &str,
    ) -> Result<Handle> {
        self.existing(self.resource_path(app, cluster, resource)).await
    }

    /// Names of every resource of a cluster.
    pub async fn get_resource_names(&self, app: &str, cluster: &str) -> Result<Vec<String>> {
        self.child_names(&self.cluster_path(app, cluster), RESOURCE_LEVEL)
            .await
    }

    // ---------------------------------------------------------------
    // Instructions
    // ---------------------------------------------------------------

    /// Store an instruction document at `<parent><level>/instruction/<kind>/`.
    pub async fn add_instruction(
        &self,
        parent: &Handle,
        level: &str,
        kind: &str,
        value: &str,
    ) -> Result<Handle> {
        validate_name(kind)?;
        let parsed: Value = serde_json::from_str(value)?;
        let handle = parent.level(level).child(INSTRUCTION, kind);
        self.put_json(&handle, &parsed).await?;
        Ok(handle)
    }

    /// App-level instruction of the given kind (for example `order`).
    pub async fn get_app_instruction(&self, kind: &str) -> Result<Value> {
        let handle = self.root.level(APP_LEVEL).child(INSTRUCTION, kind);
        self.get_value(&handle).await
    }

    /// Resource-level instruction of the given kind for one cluster.
    pub async fn get_resource_instruction(
        &self,
        app: &str,
        cluster: &str,
        kind: &str,
    ) -> Result<Value> {
        let handle = self
            .cluster_path(app, cluster)
            .level(RESOURCE_LEVEL)
            .child(INSTRUCTION, kind);
        self.get_value(&handle).await
    }
}

// ---------------------------------------------------------------
// Active AppContext registry
// ---------------------------------------------------------------

/// Record an AppContext as having a live worker.
pub async fn record_active(store: &dyn KvStore, id: &str) -> Result<()> {
    let key = format!("{}{}/", ACTIVE_PREFIX, id);
    store.put(&key, &serde_json::to_vec(id)?).await
}

/// Remove an AppContext from the active registry.
pub async fn delete_active(store: &dyn KvStore, id: &str) -> Result<()> {
    let key = format!("{}{}/", ACTIVE_PREFIX, id);
    store.delete(&key).await
}

/// Every AppContext id recorded as active.
pub async fn list_active(store: &dyn KvStore) -> Result<Vec<String>> {
    let keys = store.keys_with_prefix(ACTIVE_PREFIX).await?;
    Ok(keys
        .iter()
        .filter_map(|k| k.strip_prefix(ACTIVE_PREFIX))
        .filter_map(|rest| rest.strip_suffix('/'))
        .filter(|id| !id.is_empty() && !id.contains('/'))
        .map(str::to_string)
        .collect())
}
