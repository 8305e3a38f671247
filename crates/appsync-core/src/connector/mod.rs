// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-AppContext factory and cache of cluster clients.

pub mod cloud_config;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::appcontext::AppContext;
use crate::client::fake::FakeClusters;
use crate::client::{ClusterClient, DEPLOYMENT_LABEL, STATUS_CR_KIND, split_cluster_name};
use crate::error::{Error, Result};

pub use self::cloud_config::{
    CloudConfigKey, CloudConfigStore, DocumentCloudConfigStore, MemoryCloudConfigStore,
};

/// Logical cloud level used to look up cluster credentials.
pub const DEFAULT_LEVEL: &str = "0";
/// Namespace used to look up cluster credentials.
pub const DEFAULT_NAMESPACE: &str = "default";

const STATUS_CR_API_VERSION: &str = "k8splugin.io/v1alpha1";

/// Logical cloud of a composite app: the namespace its resources land in and
/// the level its cluster credentials are stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalCloud {
    pub namespace: String,
    pub level: String,
}

impl Default for LogicalCloud {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            level: DEFAULT_LEVEL.to_string(),
        }
    }
}

impl LogicalCloud {
    /// Logical cloud named by the composite app metadata of `ac`.
    ///
    /// Missing metadata or empty fields fall back to the defaults.
    pub async fn of(ac: &AppContext) -> Result<Self> {
        let (namespace, level) = match ac.get_namespace().await {
            Ok(found) => found,
            Err(Error::NotFound(_)) => return Ok(Self::default()),
            Err(e) => return Err(e),
        };
        let defaults = Self::default();
        Ok(Self {
            namespace: if namespace.is_empty() { defaults.namespace } else { namespace },
            level: if level.is_empty() { defaults.level } else { level },
        })
    }
}

/// Which cluster client implementation connectors hand out.
///
/// This is the process-wide test-client switch.
#[derive(Clone)]
pub enum ClientMode {
    /// Real clusters through kubeconfigs from the cloud config store.
    Kube,
    /// Simulated clusters.
    Fake(Arc<FakeClusters>),
}

impl std::fmt::Debug for ClientMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientMode::Kube => f.write_str("Kube"),
            ClientMode::Fake(_) => f.write_str("Fake"),
        }
    }
}

/// Produces cluster clients for one AppContext.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Client for a `<provider>+<cluster>` name, cached per cluster.
    ///
    /// Credentials are looked up in `cloud`, and namespaced resources without
    /// a namespace of their own land in `cloud.namespace`.
    async fn get_client(&self, cluster: &str, cloud: &LogicalCloud) -> Result<Arc<dyn ClusterClient>>;

    /// Drop the cached client of a cluster.
    async fn remove_client(&self, cluster: &str);

    /// Start watching status of a cluster. May be a no-op.
    async fn start_cluster_watcher(&self, cluster: &str) -> Result<()>;

    /// YAML of the status-tracking custom resource selecting `label`.
    fn get_status_cr(&self, label: &str) -> Result<Vec<u8>>;

    /// Drop every cached client and remove materialized credentials.
    async fn close(&self);

    /// A connector of the same kind bound to another AppContext.
    fn for_app_context(&self, app_context_id: &str) -> Arc<dyn ClusterConnector>;
}

/// Status CR document for a deployment label.
pub fn status_cr(label: &str) -> Result<Vec<u8>> {
    let doc = serde_json::json!({
        "apiVersion": STATUS_CR_API_VERSION,
        "kind": STATUS_CR_KIND,
        "metadata": {
            "name": label,
            "labels": { DEPLOYMENT_LABEL: label },
        },
        "spec": {
            "selector": {
                "matchLabels": { DEPLOYMENT_LABEL: label },
            },
        },
    });
    Ok(serde_yaml::to_string(&doc)?.into_bytes())
}

/// Shared inputs of every [`Connector`] of a process.
#[derive(Clone)]
pub struct ConnectorFactory {
    mode: ClientMode,
    cloud_config: Arc<dyn CloudConfigStore>,
    kubeconfig_dir: PathBuf,
}

impl ConnectorFactory {
    pub fn new(
        mode: ClientMode,
        cloud_config: Arc<dyn CloudConfigStore>,
        kubeconfig_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mode,
            cloud_config,
            kubeconfig_dir: kubeconfig_dir.into(),
        }
    }

    /// Client mode of this factory.
    pub fn mode(&self) -> &ClientMode {
        &self.mode
    }

    /// A connector bound to one AppContext.
    pub fn connector(&self, app_context_id: &str) -> Arc<dyn ClusterConnector> {
        Arc::new(Connector {
            app_context_id: app_context_id.to_string(),
            factory: self.clone(),
            clients: Mutex::new(HashMap::new()),
        })
    }
}

/// Default [`ClusterConnector`].
pub struct Connector {
    app_context_id: String,
    factory: ConnectorFactory,
    clients: Mutex<HashMap<String, Arc<dyn ClusterClient>>>,
}

impl Connector {
    fn context_dir(&self) -> PathBuf {
        self.factory.kubeconfig_dir.join(&self.app_context_id)
    }

    async fn new_client(&self, cluster: &str, cloud: &LogicalCloud) -> Result<Arc<dyn ClusterClient>> {
        let (provider, name) = split_cluster_name(cluster)?;
        match &self.factory.mode {
            ClientMode::Fake(clusters) => Ok(Arc::new(clusters.client(cluster))),
            ClientMode::Kube => {
                let key = CloudConfigKey::new(provider, name, &cloud.level, &cloud.namespace);
                let kubeconfig = self.factory.cloud_config.get_config(&key).await?;
                let dir = self.context_dir().join(cluster);
                tokio::fs::create_dir_all(&dir).await?;
                let path = dir.join("config");
                tokio::fs::write(&path, &kubeconfig).await?;
                debug!(
                    app_context_id = %self.app_context_id,
                    cluster = %cluster,
                    level = %cloud.level,
                    namespace = %cloud.namespace,
                    path = %path.display(),
                    "Materialized kubeconfig"
                );
                self.kube_client(&path, &cloud.namespace).await
            }
        }
    }

    #[cfg(feature = "kube-client")]
    async fn kube_client(&self, path: &std::path::Path, namespace: &str) -> Result<Arc<dyn ClusterClient>> {
        let client = crate::client::kube::KubeClusterClient::from_kubeconfig(path, namespace).await?;
        Ok(Arc::new(client))
    }

    #[cfg(not(feature = "kube-client"))]
    async fn kube_client(&self, _path: &std::path::Path, _namespace: &str) -> Result<Arc<dyn ClusterClient>> {
        Err(Error::Other(
            "built without the kube-client feature".to_string(),
        ))
    }
}

#[async_trait]
impl ClusterConnector for Connector {
    async fn get_client(&self, cluster: &str, cloud: &LogicalCloud) -> Result<Arc<dyn ClusterClient>> {
        split_cluster_name(cluster)?;
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(cluster) {
            return Ok(Arc::clone(client));
        }
        let client = self.new_client(cluster, cloud).await?;
        clients.insert(cluster.to_string(), Arc::clone(&client));
        Ok(client)
    }

    async fn remove_client(&self, cluster: &str) {
        let removed = self.clients.lock().await.remove(cluster);
        if let Some(client) = removed {
            client.close().await;
        }
    }

    async fn start_cluster_watcher(&self, cluster: &str) -> Result<()> {
        split_cluster_name(cluster)?;
        match &self.factory.mode {
            ClientMode::Fake(clusters) => clusters.record_watcher(cluster),
            ClientMode::Kube => {
                debug!(cluster = %cluster, "Status is collected through the status CR; no watcher started")
            }
        }
        Ok(())
    }

    fn get_status_cr(&self, label: &str) -> Result<Vec<u8>> {
        status_cr(label)
    }

    async fn close(&self) {
        let clients: Vec<_> = self.clients.lock().await.drain().collect();
        for (_, client) in clients {
            client.close().await;
        }
        let dir = self.context_dir();
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => info!(app_context_id = %self.app_context_id, "Removed kubeconfigs"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                app_context_id = %self.app_context_id,
                error = %e,
                "Failed to remove kubeconfig directory"
            ),
        }
    }

    fn for_app_context(&self, app_context_id: &str) -> Arc<dyn ClusterConnector> {
        self.factory.connector(app_context_id)
    }
}
