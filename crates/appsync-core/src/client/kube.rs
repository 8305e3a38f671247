// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster client backed by the Kubernetes API.

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use kube::api::{DeleteParams, DynamicObject, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::GroupVersionKind;
use kube::discovery::{self, ApiResource, Scope};
use kube::{Api, Client, Config};
use tracing::debug;

use super::{ClientError, ClientResult, ClusterClient};

const FIELD_MANAGER: &str = "appsync";

/// Client for one cluster, configured from a kubeconfig file.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    /// Namespace of namespaced resources that do not name one.
    namespace: String,
}

impl KubeClusterClient {
    /// Build a client from a kubeconfig file.
    pub async fn from_kubeconfig(path: &Path, namespace: &str) -> ClientResult<Self> {
        let kubeconfig =
            Kubeconfig::read_from(path).map_err(|e| ClientError::Kubeconfig(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClientError::Kubeconfig(e.to_string()))?;
        let client = Client::try_from(config)?;
        Ok(Self {
            client,
            namespace: namespace.to_string(),
        })
    }

    /// Resolve the API of the object described by `content`.
    async fn dynamic_api(
        &self,
        content: &[u8],
        default_namespace: Option<&str>,
    ) -> ClientResult<(Api<DynamicObject>, DynamicObject, String)> {
        let obj: DynamicObject = serde_yaml::from_slice(content)?;
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| ClientError::InvalidResource("missing apiVersion/kind".to_string()))?;
        let gvk = GroupVersionKind::try_from(types)
            .map_err(|e| ClientError::InvalidResource(e.to_string()))?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClientError::InvalidResource("missing metadata.name".to_string()))?;

        let (resource, caps): (ApiResource, _) = discovery::pinned_kind(&self.client, &gvk).await?;
        let api = match caps.scope {
            Scope::Namespaced => {
                let namespace = obj
                    .metadata
                    .namespace
                    .as_deref()
                    .or(default_namespace)
                    .unwrap_or(self.namespace.as_str());
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };
        Ok((api, obj, name))
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn apply(&self, content: &[u8]) -> ClientResult<()> {
        let (api, obj, name) = self.dynamic_api(content, None).await?;
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&obj),
        )
        .await?;
        debug!(resource = %name, "Applied resource");
        Ok(())
    }

    async fn delete(&self, content: &[u8]) -> ClientResult<()> {
        let (api, _, name) = self.dynamic_api(content, None).await?;
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                debug!(resource = %name, "Resource already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, content: &[u8], namespace: &str) -> ClientResult<Vec<u8>> {
        let (api, _, name) = self.dynamic_api(content, Some(namespace)).await?;
        let live = api.get(&name).await?;
        Ok(serde_yaml::to_string(&live)?.into_bytes())
    }

    async fn approve(&self, name: &str, approval: &[u8]) -> ClientResult<()> {
        let patch: serde_json::Value = serde_yaml::from_slice(approval)?;
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        api.patch_subresource(
            "approval",
            name,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
        debug!(csr = %name, "Approved certificate signing request");
        Ok(())
    }

    async fn is_reachable(&self) -> ClientResult<()> {
        self.client
            .apiserver_version()
            .await
            .map(|_| ())
            .map_err(|e| ClientError::Unreachable(e.to_string()))
    }
}
