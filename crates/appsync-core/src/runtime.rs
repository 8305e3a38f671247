// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime.
//!
//! [`Runtime`] owns everything that is process-wide in the engine: the
//! dispatcher map, the cluster client mode, the stores and the ready-event
//! broadcaster. It is cheap to clone and is handed to every worker.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use appsync_core::persistence::SqliteStore;
//! use appsync_core::runtime::Runtime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::from_path(".data/appsync.db").await?);
//!
//!     let runtime = Runtime::builder()
//!         .kv_store(store.clone())
//!         .document_store(store)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.instantiate("4312865400213").await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::appcontext::AppContext;
use crate::client::fake::FakeClusters;
use crate::config::ReconcilerSettings;
use crate::connector::{
    ClientMode, CloudConfigStore, ClusterConnector, ConnectorFactory, DocumentCloudConfigStore,
    MemoryCloudConfigStore,
};
use crate::dispatcher::{self, Dispatcher};
use crate::error::Result;
use crate::persistence::{DocumentStore, KvStore};
use crate::types::{EventStatus, RsyncEvent, StateValue};

/// Published whenever a queue element reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyEvent {
    pub app_context_id: String,
    pub event: RsyncEvent,
    pub status: EventStatus,
    /// AppContext status after the transition.
    pub state: StateValue,
}

/// Builder for a [`Runtime`].
pub struct RuntimeBuilder {
    kv_store: Option<Arc<dyn KvStore>>,
    document_store: Option<Arc<dyn DocumentStore>>,
    cloud_config: Option<Arc<dyn CloudConfigStore>>,
    settings: ReconcilerSettings,
    client_mode: ClientMode,
    kubeconfig_dir: PathBuf,
    ready_capacity: usize,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self {
            kv_store: None,
            document_store: None,
            cloud_config: None,
            settings: ReconcilerSettings::default(),
            client_mode: ClientMode::Kube,
            kubeconfig_dir: PathBuf::from("/tmp/rsync"),
            ready_capacity: 256,
        }
    }
}

impl RuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the AppContext store (required).
    pub fn kv_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.kv_store = Some(store);
        self
    }

    /// Set the document store used for cloud configuration.
    ///
    /// Ignored when [`cloud_config`](Self::cloud_config) is set.
    pub fn document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.document_store = Some(store);
        self
    }

    /// Set the cloud configuration store explicitly.
    pub fn cloud_config(mut self, store: Arc<dyn CloudConfigStore>) -> Self {
        self.cloud_config = Some(store);
        self
    }

    /// Set reconciler tunables.
    pub fn settings(mut self, settings: ReconcilerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Hand out simulated cluster clients instead of real ones.
    pub fn fake_clusters(mut self, clusters: Arc<FakeClusters>) -> Self {
        self.client_mode = ClientMode::Fake(clusters);
        self
    }

    /// Set the cluster client mode.
    ///
    /// Default: [`ClientMode::Kube`]
    pub fn client_mode(mut self, mode: ClientMode) -> Self {
        self.client_mode = mode;
        self
    }

    /// Set the directory kubeconfigs are materialized under.
    ///
    /// Default: `/tmp/rsync`
    pub fn kubeconfig_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.kubeconfig_dir = dir.into();
        self
    }

    /// Set the capacity of the ready-event channel.
    ///
    /// Default: 256
    pub fn ready_capacity(mut self, capacity: usize) -> Self {
        self.ready_capacity = capacity;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> anyhow::Result<RuntimeConfig> {
        let kv_store = self
            .kv_store
            .ok_or_else(|| anyhow!("kv_store is required"))?;
        if self.ready_capacity == 0 {
            return Err(anyhow!("ready_capacity must be positive"));
        }
        let cloud_config: Arc<dyn CloudConfigStore> = match (self.cloud_config, self.document_store) {
            (Some(cloud), _) => cloud,
            (None, Some(docs)) => Arc::new(DocumentCloudConfigStore::new(docs)),
            (None, None) => Arc::new(MemoryCloudConfigStore::new()),
        };
        Ok(RuntimeConfig {
            kv_store,
            connectors: ConnectorFactory::new(self.client_mode, cloud_config, self.kubeconfig_dir),
            settings: self.settings,
            ready_capacity: self.ready_capacity,
        })
    }
}

/// Configuration for a [`Runtime`].
pub struct RuntimeConfig {
    kv_store: Arc<dyn KvStore>,
    connectors: ConnectorFactory,
    settings: ReconcilerSettings,
    ready_capacity: usize,
}

impl RuntimeConfig {
    /// Start the runtime.
    ///
    /// Workers are spawned lazily when events arrive. Call
    /// [`Runtime::restart_app_contexts`] to resume AppContexts left active
    /// by a previous process.
    pub async fn start(self) -> anyhow::Result<Runtime> {
        let (ready_tx, _) = broadcast::channel(self.ready_capacity);
        info!(
            client_mode = ?self.connectors.mode(),
            max_retries = ?self.settings.max_retries,
            wait_time_ms = self.settings.wait_time.as_millis() as u64,
            "Runtime started"
        );
        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                store: self.kv_store,
                connectors: self.connectors,
                settings: self.settings,
                dispatcher: Dispatcher::new(),
                ready_tx,
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

struct RuntimeInner {
    store: Arc<dyn KvStore>,
    connectors: ConnectorFactory,
    settings: ReconcilerSettings,
    dispatcher: Dispatcher,
    ready_tx: broadcast::Sender<ReadyEvent>,
    shutdown: CancellationToken,
}

/// A running engine.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a new runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// The AppContext store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.inner.store
    }

    /// Reconciler tunables.
    pub fn settings(&self) -> &ReconcilerSettings {
        &self.inner.settings
    }

    /// The dispatcher map.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// A connector bound to `app_context_id`.
    pub fn connector(&self, app_context_id: &str) -> Arc<dyn ClusterConnector> {
        self.inner.connectors.connector(app_context_id)
    }

    /// Subscribe to ready events.
    pub fn subscribe(&self) -> broadcast::Receiver<ReadyEvent> {
        self.inner.ready_tx.subscribe()
    }

    pub(crate) fn publish(&self, event: ReadyEvent) {
        // No subscribers is fine.
        let _ = self.inner.ready_tx.send(event);
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// True once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Open an AppContext from the runtime's store.
    pub async fn app_context(&self, id: &str) -> Result<AppContext> {
        AppContext::load(self.store().clone(), id).await
    }

    /// Enqueue an event with an explicit connector.
    pub fn handle_app_context(
        &self,
        id: &str,
        update_id: Option<&str>,
        event: RsyncEvent,
        connector: Arc<dyn ClusterConnector>,
    ) -> BoxFuture<'static, Result<()>> {
        dispatcher::handle_app_context(
            self.clone(),
            id.to_string(),
            update_id.map(str::to_string),
            event,
            connector,
        )
    }

    async fn submit(&self, id: &str, update_id: Option<&str>, event: RsyncEvent) -> Result<()> {
        if self.is_shutting_down() {
            return Err(crate::error::Error::Cancelled);
        }
        self.app_context(id).await?;
        if let Some(update_id) = update_id {
            self.app_context(update_id).await?;
        }
        self.handle_app_context(id, update_id, event, self.connector(id))
            .await
    }

    /// Apply every resource of an AppContext.
    pub async fn instantiate(&self, id: &str) -> Result<()> {
        self.submit(id, None, RsyncEvent::Instantiate).await
    }

    /// Delete every resource of an AppContext.
    pub async fn terminate(&self, id: &str) -> Result<()> {
        self.submit(id, None, RsyncEvent::Terminate).await
    }

    /// Read back every resource of an AppContext.
    pub async fn read(&self, id: &str) -> Result<()> {
        self.submit(id, None, RsyncEvent::Read).await
    }

    /// Move the deployment from AppContext `id` to the newer generation `update_id`.
    pub async fn update(&self, id: &str, update_id: &str) -> Result<()> {
        self.submit(id, Some(update_id), RsyncEvent::Update).await
    }

    /// Restart workers for AppContexts left active by a previous process.
    pub async fn restart_app_contexts(&self) -> Result<usize> {
        dispatcher::restart_app_contexts(self).await
    }

    /// True while a worker is alive for `id`.
    pub async fn is_running(&self, id: &str) -> bool {
        match self.dispatcher().get(id) {
            Some(ctx) => ctx.is_running().await,
            None => false,
        }
    }

    /// Wait until no worker is alive for `id`.
    pub async fn wait_for_quiescence(&self, id: &str) {
        if let Some(ctx) = self.dispatcher().get(id) {
            ctx.wait_idle().await;
        }
    }

    /// Cancel in-flight work, wait for every worker to exit and close connectors.
    ///
    /// Events interrupted by shutdown stay pending so that a later
    /// [`restart_app_contexts`](Self::restart_app_contexts) resumes them.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        info!("Shutting down runtime");
        self.inner.shutdown.cancel();

        for ctx in self.dispatcher().all() {
            let worker = ctx.state.lock().await.worker.take();
            if let Some(handle) = worker {
                match tokio::time::timeout(Duration::from_secs(30), handle).await {
                    Ok(Ok(())) => debug!(app_context_id = %ctx.id(), "Worker stopped"),
                    Ok(Err(e)) => warn!(app_context_id = %ctx.id(), error = %e, "Worker task failed"),
                    Err(_) => warn!(app_context_id = %ctx.id(), "Timeout waiting for worker"),
                }
            }
            let connector = ctx.state.lock().await.connector.take();
            if let Some(connector) = connector {
                connector.close().await;
            }
        }

        info!("Runtime shutdown complete");
        Ok(())
    }
}
