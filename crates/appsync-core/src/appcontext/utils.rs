// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed accessors over the AppContext tree.
//!
//! States, flags, queue storage, per-resource status, cluster readiness,
//! resource definitions, approval payloads and ordering instructions.

use serde::{Deserialize, Serialize};

use super::{AppContext, Handle, RESOURCE_LEVEL};
use crate::error::{Error, Result};
use crate::types::{ClusterReadiness, ResourceStatus, StateValue};

const CURRENT_STATE: &str = "currentstate";
const DESIRED_STATE: &str = "desiredstate";
const STATUS: &str = "status";
const FLAGS: &str = "flags";
const STATUS_APP_CONTEXT_ID: &str = "statusappctxid";
const QUEUE: &str = "appcontextqueue";
const READY_STATUS: &str = "readystatus";
const DEFINITION: &str = "definition";
const GROUP: &str = "group";
const ORDER: &str = "order";

/// Persisted AppContext flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppContextFlags {
    /// Hard forced termination.
    #[serde(rename = "stopflag", default)]
    pub stop: bool,
    /// A Terminate has been queued.
    #[serde(rename = "pendingterminateflag", default)]
    pub pending_terminate: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AppOrder {
    #[serde(rename = "apporder", default)]
    apps: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ResOrder {
    #[serde(rename = "resorder", default)]
    resources: Vec<String>,
}

impl AppContext {
    fn root_level(&self, key: &str) -> Handle {
        self.root().level(key)
    }

    // ---------------------------------------------------------------
    // States
    // ---------------------------------------------------------------

    async fn get_state(&self, key: &str) -> Result<StateValue> {
        Ok(self
            .get_value_opt(&self.root_level(key))
            .await?
            .unwrap_or(StateValue::Created))
    }

    /// Current state. An AppContext that was never processed is `Created`.
    pub async fn get_current_state(&self) -> Result<StateValue> {
        self.get_state(CURRENT_STATE).await
    }

    /// Set the current state.
    pub async fn set_current_state(&self, state: StateValue) -> Result<()> {
        self.update_status_value(&self.root_level(CURRENT_STATE), &state)
            .await
    }

    /// Desired state.
    pub async fn get_desired_state(&self) -> Result<StateValue> {
        self.get_state(DESIRED_STATE).await
    }

    /// Set the desired state.
    pub async fn set_desired_state(&self, state: StateValue) -> Result<()> {
        self.update_status_value(&self.root_level(DESIRED_STATE), &state)
            .await
    }

    /// Reported status.
    pub async fn get_status(&self) -> Result<StateValue> {
        self.get_state(STATUS).await
    }

    /// Set the reported status.
    pub async fn set_status(&self, state: StateValue) -> Result<()> {
        self.update_status_value(&self.root_level(STATUS), &state)
            .await
    }

    // ---------------------------------------------------------------
    // Flags
    // ---------------------------------------------------------------

    /// Read both flags. Missing flags are false.
    pub async fn get_flags(&self) -> Result<AppContextFlags> {
        Ok(self
            .get_value_opt(&self.root_level(FLAGS))
            .await?
            .unwrap_or_default())
    }

    async fn modify_flags(&self, f: impl FnOnce(&mut AppContextFlags)) -> Result<()> {
        let mut flags = self.get_flags().await?;
        f(&mut flags);
        self.update_status_value(&self.root_level(FLAGS), &flags)
            .await
    }

    /// Read the StopFlag.
    pub async fn get_stop_flag(&self) -> Result<bool> {
        Ok(self.get_flags().await?.stop)
    }

    /// Set or clear the StopFlag.
    pub async fn set_stop_flag(&self, value: bool) -> Result<()> {
        self.modify_flags(|f| f.stop = value).await
    }

    /// Set or clear the PendingTerminateFlag.
    pub async fn set_pending_terminate_flag(&self, value: bool) -> Result<()> {
        self.modify_flags(|f| f.pending_terminate = value).await
    }

    // ---------------------------------------------------------------
    // Status AppContext routing
    // ---------------------------------------------------------------

    /// Id of the AppContext that receives status writes, if one is configured.
    pub async fn get_status_app_context_id(&self) -> Result<Option<String>> {
        self.get_value_opt(&self.root_level(STATUS_APP_CONTEXT_ID))
            .await
    }

    /// Route status writes of this AppContext to `id`.
    pub async fn set_status_app_context_id(&self, id: &str) -> Result<()> {
        self.update_status_value(&self.root_level(STATUS_APP_CONTEXT_ID), id)
            .await
    }

    // ---------------------------------------------------------------
    // Queue storage
    // ---------------------------------------------------------------

    pub(crate) async fn get_queue_value<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Result<Option<T>> {
        self.get_value_opt(&self.root_level(QUEUE)).await
    }

    pub(crate) async fn put_queue_value<T: Serialize>(&self, value: &T) -> Result<()> {
        self.update_status_value(&self.root_level(QUEUE), value)
            .await
    }

    // ---------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------

    /// Definition bytes (YAML) of a resource.
    pub async fn get_resource_bytes(
        &self,
        app: &str,
        cluster: &str,
        resource: &str,
    ) -> Result<Vec<u8>> {
        let text: String = self
            .get_value(&self.resource_path(app, cluster, resource))
            .await?;
        Ok(text.into_bytes())
    }

    /// Store bytes read back from a cluster under the resource's `definition` node.
    pub async fn set_resource_definition(
        &self,
        app: &str,
        cluster: &str,
        resource: &str,
        bytes: &[u8],
    ) -> Result<()> {
        let handle = self.resource_path(app, cluster, resource).level(DEFINITION);
        self.update_status_value(&handle, std::str::from_utf8(bytes)?)
            .await
    }

    /// Bytes read back from a cluster, if any.
    pub async fn get_resource_definition(
        &self,
        app: &str,
        cluster: &str,
        resource: &str,
    ) -> Result<Option<Vec<u8>>> {
        let handle = self.resource_path(app, cluster, resource).level(DEFINITION);
        let text: Option<String> = self.get_value_opt(&handle).await?;
        Ok(text.map(String::into_bytes))
    }

    /// Record the outcome of the last operation on a resource.
    pub async fn set_resource_status(
        &self,
        app: &str,
        cluster: &str,
        resource: &str,
        status: ResourceStatus,
    ) -> Result<()> {
        let handle = self.resource_path(app, cluster, resource).level(STATUS);
        self.update_status_value(&handle, &status).await
    }

    /// Outcome of the last operation on a resource.
    pub async fn get_resource_status(
        &self,
        app: &str,
        cluster: &str,
        resource: &str,
    ) -> Result<Option<ResourceStatus>> {
        let handle = self.resource_path(app, cluster, resource).level(STATUS);
        self.get_value_opt(&handle).await
    }

    /// Attach an approval payload (`subresource/approval`) to a resource.
    pub async fn add_approval(
        &self,
        app: &str,
        cluster: &str,
        resource: &str,
        approval: &[u8],
    ) -> Result<Handle> {
        let handle = self.get_resource_handle(app, cluster, resource).await?;
        let sub = handle.level("subresource");
        let text = std::str::from_utf8(approval)?;
        self.add_level_value(&sub, "approval", text).await
    }

    /// Approval payload of a resource, if one is attached.
    pub async fn get_approval(
        &self,
        app: &str,
        cluster: &str,
        resource: &str,
    ) -> Result<Option<Vec<u8>>> {
        let handle = self
            .resource_path(app, cluster, resource)
            .level("subresource")
            .level("approval");
        let text: Option<String> = self.get_value_opt(&handle).await?;
        Ok(text.map(String::into_bytes))
    }

    // ---------------------------------------------------------------
    // Clusters
    // ---------------------------------------------------------------

    /// Record the reachability of a cluster.
    pub async fn set_cluster_ready_status(
        &self,
        app: &str,
        cluster: &str,
        readiness: ClusterReadiness,
    ) -> Result<()> {
        let handle = self.cluster_path(app, cluster).level(READY_STATUS);
        self.update_status_value(&handle, &readiness).await
    }

    /// Last recorded reachability of a cluster.
    pub async fn get_cluster_ready_status(
        &self,
        app: &str,
        cluster: &str,
    ) -> Result<ClusterReadiness> {
        let handle = self.cluster_path(app, cluster).level(READY_STATUS);
        Ok(self
            .get_value_opt(&handle)
            .await?
            .unwrap_or(ClusterReadiness::Unknown))
    }

    /// Assign a cluster to a placement group.
    pub async fn set_cluster_group(&self, app: &str, cluster: &str, group: &str) -> Result<()> {
        let handle = self.get_cluster_handle(app, cluster).await?;
        self.add_level_value(&handle, GROUP, group).await?;
        Ok(())
    }

    /// Placement group of a cluster, if it belongs to one.
    pub async fn get_cluster_group(&self, app: &str, cluster: &str) -> Result<Option<String>> {
        self.get_value_opt(&self.cluster_path(app, cluster).level(GROUP))
            .await
    }

    // ---------------------------------------------------------------
    // Namespace and ordering
    // ---------------------------------------------------------------

    /// Namespace and logical cloud level of the composite app.
    pub async fn get_namespace(&self) -> Result<(String, String)> {
        let meta = self.get_composite_meta().await?;
        Ok((meta.namespace, meta.level))
    }

    /// App order from the `order` app instruction.
    pub async fn get_app_order(&self) -> Result<Vec<String>> {
        let value = self.get_app_instruction(ORDER).await?;
        let order: AppOrder = serde_json::from_value(value)?;
        Ok(order.apps)
    }

    /// Replace the app order.
    pub async fn set_app_order(&self, apps: &[String]) -> Result<()> {
        let doc = serde_json::to_string(&AppOrder {
            apps: apps.to_vec(),
        })?;
        self.add_instruction(&self.root().clone(), super::APP_LEVEL, ORDER, &doc)
            .await?;
        Ok(())
    }

    /// Resource order of one cluster from its `order` resource instruction.
    pub async fn get_resource_order(&self, app: &str, cluster: &str) -> Result<Vec<String>> {
        let value = self.get_resource_instruction(app, cluster, ORDER).await?;
        let order: ResOrder = serde_json::from_value(value)?;
        Ok(order.resources)
    }

    /// Replace the resource order of one cluster.
    pub async fn set_resource_order(
        &self,
        app: &str,
        cluster: &str,
        resources: &[String],
    ) -> Result<()> {
        let handle = self.get_cluster_handle(app, cluster).await?;
        let doc = serde_json::to_string(&ResOrder {
            resources: resources.to_vec(),
        })?;
        self.add_instruction(&handle, RESOURCE_LEVEL, ORDER, &doc)
            .await?;
        Ok(())
    }

    /// Add a resource to a cluster and append it to the cluster's resource order.
    pub async fn add_ordered_resource(
        &self,
        app: &str,
        cluster: &str,
        resource: &str,
        definition: &[u8],
    ) -> Result<Handle> {
        let cluster_handle = self.get_cluster_handle(app, cluster).await?;
        let handle = self
            .add_resource(&cluster_handle, resource, definition)
            .await?;
        let mut order = match self.get_resource_order(app, cluster).await {
            Ok(order) => order,
            Err(Error::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        if !order.iter().any(|r| r == resource) {
            order.push(resource.to_string());
            self.set_resource_order(app, cluster, &order).await?;
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{KvStore, MemoryStore};
    use std::sync::Arc;

    async fn context() -> AppContext {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        AppContext::create(store, "42").await.unwrap()
    }

    #[tokio::test]
    async fn test_states_default_to_created() {
        let ac = context().await;
        assert_eq!(ac.get_current_state().await.unwrap(), StateValue::Created);
        ac.set_current_state(StateValue::Instantiating).await.unwrap();
        ac.set_desired_state(StateValue::Instantiated).await.unwrap();
        assert_eq!(
            ac.get_current_state().await.unwrap(),
            StateValue::Instantiating
        );
        assert_eq!(
            ac.get_desired_state().await.unwrap(),
            StateValue::Instantiated
        );
    }

    #[tokio::test]
    async fn test_flags_are_independent() {
        let ac = context().await;
        assert_eq!(ac.get_flags().await.unwrap(), AppContextFlags::default());
        ac.set_pending_terminate_flag(true).await.unwrap();
        ac.set_stop_flag(true).await.unwrap();
        ac.set_pending_terminate_flag(false).await.unwrap();
        let flags = ac.get_flags().await.unwrap();
        assert!(flags.stop);
        assert!(!flags.pending_terminate);
    }

    #[tokio::test]
    async fn test_resource_accessors() {
        let ac = context().await;
        let app = ac.add_app("a1").await.unwrap();
        ac.add_cluster(&app, "p+c1").await.unwrap();
        ac.add_ordered_resource("a1", "p+c1", "csr1+CertificateSigningRequest", b"kind: CertificateSigningRequest\n")
            .await
            .unwrap();
        ac.add_ordered_resource("a1", "p+c1", "cm+ConfigMap", b"kind: ConfigMap\n")
            .await
            .unwrap();

        assert_eq!(
            ac.get_resource_order("a1", "p+c1").await.unwrap(),
            vec!["csr1+CertificateSigningRequest", "cm+ConfigMap"]
        );
        assert_eq!(
            ac.get_resource_bytes("a1", "p+c1", "cm+ConfigMap")
                .await
                .unwrap(),
            b"kind: ConfigMap\n".to_vec()
        );

        assert!(ac
            .get_approval("a1", "p+c1", "csr1+CertificateSigningRequest")
            .await
            .unwrap()
            .is_none());
        ac.add_approval("a1", "p+c1", "csr1+CertificateSigningRequest", b"{\"status\":{}}")
            .await
            .unwrap();
        assert_eq!(
            ac.get_approval("a1", "p+c1", "csr1+CertificateSigningRequest")
                .await
                .unwrap(),
            Some(b"{\"status\":{}}".to_vec())
        );

        ac.set_resource_status("a1", "p+c1", "cm+ConfigMap", ResourceStatus::Applied)
            .await
            .unwrap();
        assert_eq!(
            ac.get_resource_status("a1", "p+c1", "cm+ConfigMap")
                .await
                .unwrap(),
            Some(ResourceStatus::Applied)
        );
        // Status and approval nodes are not resources.
        assert_eq!(ac.get_resource_names("a1", "p+c1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_utf8_payloads_rejected() {
        let ac = context().await;
        let app = ac.add_app("a1").await.unwrap();
        let cluster = ac.add_cluster(&app, "p+c1").await.unwrap();
        let invalid: &[u8] = &[b'k', 0xff, 0xfe, b'\n'];

        let err = ac.add_resource(&cluster, "r1", invalid).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidUtf8(_)), "{err}");
        assert!(ac.get_resource_handle("a1", "p+c1", "r1").await.is_err());

        ac.add_resource(&cluster, "r1", "kind: ConfigMap # é\n".as_bytes())
            .await
            .unwrap();
        assert_eq!(
            ac.get_resource_bytes("a1", "p+c1", "r1").await.unwrap(),
            "kind: ConfigMap # é\n".as_bytes().to_vec()
        );

        let err = ac
            .set_resource_definition("a1", "p+c1", "r1", invalid)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidUtf8(_)));
        assert!(ac
            .get_resource_definition("a1", "p+c1", "r1")
            .await
            .unwrap()
            .is_none());

        let err = ac
            .add_approval("a1", "p+c1", "r1", invalid)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidUtf8(_)));
        assert!(ac.get_approval("a1", "p+c1", "r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cluster_readiness_and_group() {
        let ac = context().await;
        let app = ac.add_app("a1").await.unwrap();
        ac.add_cluster(&app, "p+c1").await.unwrap();
        assert_eq!(
            ac.get_cluster_ready_status("a1", "p+c1").await.unwrap(),
            ClusterReadiness::Unknown
        );
        ac.set_cluster_ready_status("a1", "p+c1", ClusterReadiness::Retrying)
            .await
            .unwrap();
        assert_eq!(
            ac.get_cluster_ready_status("a1", "p+c1").await.unwrap(),
            ClusterReadiness::Retrying
        );

        ac.set_cluster_group("a1", "p+c1", "1").await.unwrap();
        assert_eq!(
            ac.get_cluster_group("a1", "p+c1").await.unwrap(),
            Some("1".to_string())
        );
        assert!(ac.set_cluster_group("a1", "p+c9", "1").await.is_err());
    }

    #[tokio::test]
    async fn test_app_order_round_trip() {
        let ac = context().await;
        assert!(matches!(
            ac.get_app_order().await.unwrap_err(),
            Error::NotFound(_)
        ));
        ac.set_app_order(&["a2".to_string(), "a1".to_string()])
            .await
            .unwrap();
        assert_eq!(ac.get_app_order().await.unwrap(), vec!["a2", "a1"]);
    }
}
