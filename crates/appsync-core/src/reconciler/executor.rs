// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster-parallel executor.
//!
//! One task per app, one task per cluster inside it, resources of a cluster
//! processed serially in resource order. Cluster unreachability restarts the
//! cluster from its first resource once the cluster is reachable again.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::projection::{AppNode, AppTree, ClusterNode};
use crate::appcontext::AppContext;
use crate::client::ClusterClient;
use crate::config::ReconcilerSettings;
use crate::connector::{ClusterConnector, LogicalCloud};
use crate::error::{Error, Result};
use crate::tasks::TaskGroup;
use crate::types::{ClusterReadiness, OpType, ResourceStatus, RsyncEvent};

/// Synthetic app produced by the SFC controller.
pub const CHAIN_APP: &str = "network-chain-intents";

/// Everything one event needs while fanning out.
pub(crate) struct EventRun {
    /// AppContext whose resources are processed.
    pub ac: AppContext,
    /// AppContext receiving status writes and naming the deployment label.
    pub status_ac: AppContext,
    pub connector: Arc<dyn ClusterConnector>,
    pub settings: ReconcilerSettings,
    pub op: OpType,
    pub event: RsyncEvent,
    pub cloud: LogicalCloud,
}

enum ClusterPass {
    Done,
    Unreachable,
}

impl EventRun {
    fn label(&self, app: &str) -> String {
        format!("{}-{}", self.status_ac.id(), app)
    }

    /// Run `op` over every app of `tree` that is not skipped.
    pub async fn execute(self: Arc<Self>, tree: AppTree, token: &CancellationToken) -> Result<()> {
        let mut group = TaskGroup::new(token);
        for app in tree.apps.into_iter().filter(|a| !a.skip) {
            let run = Arc::clone(&self);
            let token = group.token().clone();
            group.spawn(async move { run.run_app(app, token).await });
        }
        group.wait().await
    }

    async fn run_app(self: Arc<Self>, app: AppNode, token: CancellationToken) -> Result<()> {
        if app.name == CHAIN_APP && self.op == OpType::Apply {
            // TODO: replace with an explicit app-dependency instruction once
            // the SFC controller records which apps the chain waits for.
            info!(app = %app.name, delay_secs = self.settings.dependency_delay.as_secs(), "Delaying chain app");
            tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.settings.dependency_delay) => {}
            }
        }

        let mut group = TaskGroup::new(&token);
        for cluster in app.clusters.into_iter().filter(|c| !c.skip) {
            if let Err(e) = self.connector.start_cluster_watcher(&cluster.name).await {
                warn!(app = %app.name, cluster = %cluster.name, error = %e, "Failed to start cluster watcher");
            }
            let run = Arc::clone(&self);
            let app_name = app.name.clone();
            let token = group.token().clone();
            group.spawn(async move { run.run_cluster(app_name, cluster, token).await });
        }
        group.wait().await
    }

    async fn run_cluster(
        self: Arc<Self>,
        app: String,
        cluster: ClusterNode,
        token: CancellationToken,
    ) -> Result<()> {
        let client = self.connector.get_client(&cluster.name, &self.cloud).await?;
        loop {
            self.wait_for_cluster_ready(&app, &cluster.name, client.as_ref(), &token)
                .await?;

            let pass = tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                pass = self.cluster_pass(&app, &cluster, client.as_ref()) => pass?,
            };
            match pass {
                ClusterPass::Done => {
                    self.handle_status_tracking(&app, &cluster, client.as_ref())
                        .await;
                    return Ok(());
                }
                ClusterPass::Unreachable => {
                    info!(app = %app, cluster = %cluster.name, "Cluster became unreachable; restarting from the first resource");
                }
            }
        }
    }

    /// One pass over the resources of a cluster.
    async fn cluster_pass(
        &self,
        app: &str,
        cluster: &ClusterNode,
        client: &dyn ClusterClient,
    ) -> Result<ClusterPass> {
        for (i, resource) in cluster.resources.iter().enumerate() {
            if resource.skip {
                continue;
            }
            let Err(err) = self
                .handle_resource(app, &cluster.name, &resource.name, client)
                .await
            else {
                continue;
            };

            if client.is_reachable().await.is_err() {
                return Ok(ClusterPass::Unreachable);
            }
            if self.op.break_on_error() {
                if i > 0 {
                    self.handle_status_tracking(app, cluster, client).await;
                }
                return Err(err);
            }
            warn!(
                app = %app,
                cluster = %cluster.name,
                resource = %resource.name,
                op = %self.op,
                error = %err,
                "Resource failed; continuing"
            );
        }
        Ok(ClusterPass::Done)
    }

    async fn handle_resource(
        &self,
        app: &str,
        cluster: &str,
        resource: &str,
        client: &dyn ClusterClient,
    ) -> Result<()> {
        let content = self.ac.get_resource_bytes(app, cluster, resource).await?;
        let result = match self.op {
            OpType::Apply => self.apply_resource(app, cluster, resource, &content, client).await,
            OpType::Delete => client.delete(&content).await.map_err(Error::from),
            OpType::Read => match client.get(&content, &self.cloud.namespace).await {
                Ok(live) => {
                    self.status_ac
                        .set_resource_definition(app, cluster, resource, &live)
                        .await
                }
                Err(e) => Err(e.into()),
            },
        };

        let status = match (&result, self.op) {
            (Err(_), _) => ResourceStatus::Failed,
            (Ok(()), OpType::Delete) => ResourceStatus::Deleted,
            (Ok(()), _) => ResourceStatus::Applied,
        };
        self.status_ac
            .set_resource_status(app, cluster, resource, status)
            .await?;
        debug!(app = %app, cluster = %cluster, resource = %resource, ?status, "Resource processed");
        result
    }

    async fn apply_resource(
        &self,
        app: &str,
        cluster: &str,
        resource: &str,
        content: &[u8],
        client: &dyn ClusterClient,
    ) -> Result<()> {
        let tagged = client.tag_resource(content, &self.label(app))?;
        client.apply(&tagged).await?;

        if let Some(approval) = self.ac.get_approval(app, cluster, resource).await? {
            let name = resource.split('+').next().unwrap_or(resource);
            client.approve(name, &approval).await?;
            debug!(app = %app, cluster = %cluster, name = %name, "Approved");
        }
        Ok(())
    }

    /// Apply or delete the status CR of `(app, cluster)`. Failures are logged only.
    async fn handle_status_tracking(&self, app: &str, cluster: &ClusterNode, client: &dyn ClusterClient) {
        let apply = match (self.op, self.event) {
            (OpType::Apply, _) => true,
            (OpType::Delete, RsyncEvent::Terminate) => false,
            (OpType::Delete, _) if cluster.retired => false,
            _ => return,
        };
        let label = self.label(app);
        let cr = match self.connector.get_status_cr(&label) {
            Ok(cr) => cr,
            Err(e) => {
                warn!(app = %app, cluster = %cluster.name, error = %e, "Failed to build status CR");
                return;
            }
        };
        let result = if apply {
            client.apply(&cr).await
        } else {
            client.delete(&cr).await
        };
        match result {
            Ok(()) => debug!(app = %app, cluster = %cluster.name, label = %label, apply, "Status CR handled"),
            Err(e) => warn!(app = %app, cluster = %cluster.name, error = %e, apply, "Status CR failed"),
        }
    }

    async fn record_readiness(&self, app: &str, cluster: &str, readiness: ClusterReadiness) {
        if let Err(e) = self
            .status_ac
            .set_cluster_ready_status(app, cluster, readiness)
            .await
        {
            warn!(app = %app, cluster = %cluster, error = %e, "Failed to record cluster readiness");
        }
    }

    /// Block until the cluster answers, polling every `wait_time`.
    async fn wait_for_cluster_ready(
        &self,
        app: &str,
        cluster: &str,
        client: &dyn ClusterClient,
        token: &CancellationToken,
    ) -> Result<()> {
        if client.is_reachable().await.is_ok() {
            self.record_readiness(app, cluster, ClusterReadiness::Available)
                .await;
            return Ok(());
        }
        self.record_readiness(app, cluster, ClusterReadiness::Retrying)
            .await;
        info!(app = %app, cluster = %cluster, "Cluster unreachable; waiting");

        let mut ticker = tokio::time::interval(self.settings.wait_time.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        let mut attempts: u32 = 0;
        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                _ = ticker.tick() => {}
            }
            if client.is_reachable().await.is_ok() {
                self.record_readiness(app, cluster, ClusterReadiness::Available)
                    .await;
                info!(app = %app, cluster = %cluster, attempts, "Cluster reachable");
                return Ok(());
            }
            attempts += 1;
            if let Some(max) = self.settings.max_retries
                && attempts >= max
            {
                warn!(app = %app, cluster = %cluster, attempts, "Giving up on cluster");
                return Err(Error::RetriesExceeded);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClusters;
    use crate::connector::{ClientMode, ConnectorFactory, MemoryCloudConfigStore};
    use crate::persistence::{KvStore, MemoryStore};

    fn cm(name: &str) -> Vec<u8> {
        format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n").into_bytes()
    }

    async fn one_cluster(store: Arc<dyn KvStore>, resources: &[&str]) -> AppContext {
        let ac = AppContext::create(store, "7").await.unwrap();
        let app = ac.add_app("a1").await.unwrap();
        ac.add_cluster(&app, "p+c1").await.unwrap();
        for r in resources {
            ac.add_ordered_resource("a1", "p+c1", r, &cm(r)).await.unwrap();
        }
        ac.set_app_order(&["a1".to_string()]).await.unwrap();
        ac
    }

    fn run(ac: &AppContext, clusters: &Arc<FakeClusters>, op: OpType, settings: ReconcilerSettings) -> Arc<EventRun> {
        let factory = ConnectorFactory::new(
            ClientMode::Fake(clusters.clone()),
            Arc::new(MemoryCloudConfigStore::new()),
            std::env::temp_dir(),
        );
        let event = match op {
            OpType::Apply => RsyncEvent::Instantiate,
            OpType::Delete => RsyncEvent::Terminate,
            OpType::Read => RsyncEvent::Read,
        };
        Arc::new(EventRun {
            ac: ac.clone(),
            status_ac: ac.clone(),
            connector: factory.connector(ac.id()),
            settings,
            op,
            event,
            cloud: LogicalCloud::default(),
        })
    }

    fn fast() -> ReconcilerSettings {
        ReconcilerSettings::default().with_wait_time(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_apply_tags_and_tracks_status() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ac = one_cluster(store, &["r1", "r2"]).await;
        let clusters = FakeClusters::new();

        let tree = AppTree::load(&ac).await.unwrap();
        run(&ac, &clusters, OpType::Apply, fast())
            .execute(tree, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(clusters.applied("p+c1"), vec!["r1", "r2"]);
        assert_eq!(clusters.status_crs("p+c1"), vec!["7-a1"]);
        let live = clusters.live_content("p+c1", "r1").unwrap();
        assert!(String::from_utf8(live).unwrap().contains("7-a1"));
        assert_eq!(
            ac.get_resource_status("a1", "p+c1", "r2").await.unwrap(),
            Some(ResourceStatus::Applied)
        );
        assert_eq!(
            ac.get_cluster_ready_status("a1", "p+c1").await.unwrap(),
            ClusterReadiness::Available
        );
    }

    #[tokio::test]
    async fn test_apply_breaks_on_error_but_tracks_status() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ac = one_cluster(store, &["r1", "r2", "r3"]).await;
        let clusters = FakeClusters::new();
        clusters.fail_apply("p+c1", "r2");

        let tree = AppTree::load(&ac).await.unwrap();
        let err = run(&ac, &clusters, OpType::Apply, fast())
            .execute(tree, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Client(_)));
        assert_eq!(clusters.applied("p+c1"), vec!["r1"]);
        // r1 went through, so the status CR is still placed.
        assert_eq!(clusters.status_crs("p+c1"), vec!["7-a1"]);
        assert_eq!(
            ac.get_resource_status("a1", "p+c1", "r2").await.unwrap(),
            Some(ResourceStatus::Failed)
        );
        assert_eq!(ac.get_resource_status("a1", "p+c1", "r3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_continues_past_failures() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ac = one_cluster(store, &["r1", "r2", "r3"]).await;
        let clusters = FakeClusters::new();
        clusters.fail_delete("p+c1", "r2");

        let tree = AppTree::load(&ac).await.unwrap();
        run(&ac, &clusters, OpType::Delete, fast())
            .execute(tree, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(clusters.deleted("p+c1"), vec!["r1", "r3"]);
        assert_eq!(
            ac.get_resource_status("a1", "p+c1", "r2").await.unwrap(),
            Some(ResourceStatus::Failed)
        );
        assert_eq!(
            ac.get_resource_status("a1", "p+c1", "r3").await.unwrap(),
            Some(ResourceStatus::Deleted)
        );
    }

    #[tokio::test]
    async fn test_waits_for_unreachable_cluster() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ac = one_cluster(store, &["r1"]).await;
        let clusters = FakeClusters::new();
        clusters.fail_next_probes("p+c1", 3);

        let tree = AppTree::load(&ac).await.unwrap();
        run(&ac, &clusters, OpType::Apply, fast())
            .execute(tree, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(clusters.applied("p+c1"), vec!["r1"]);
        assert!(clusters.probes("p+c1") >= 4);
    }

    #[tokio::test]
    async fn test_max_retries_exceeded() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ac = one_cluster(store, &["r1"]).await;
        let clusters = FakeClusters::new();
        clusters.set_unreachable("p+c1", true);

        let tree = AppTree::load(&ac).await.unwrap();
        let err = run(&ac, &clusters, OpType::Apply, fast().with_max_retries(Some(2)))
            .execute(tree, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExceeded));
        assert_eq!(
            ac.get_cluster_ready_status("a1", "p+c1").await.unwrap(),
            ClusterReadiness::Retrying
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_retry_loop() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ac = one_cluster(store, &["r1"]).await;
        let clusters = FakeClusters::new();
        clusters.set_unreachable("p+c1", true);

        let token = CancellationToken::new();
        let tree = AppTree::load(&ac).await.unwrap();
        let task = tokio::spawn({
            let run = run(&ac, &clusters, OpType::Apply, fast());
            let token = token.clone();
            async move { run.execute(tree, &token).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_read_stores_live_definition() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ac = one_cluster(store, &["r1"]).await;
        let clusters = FakeClusters::new();
        clusters.client("p+c1").apply(&cm("r1")).await.unwrap();

        let tree = AppTree::load(&ac).await.unwrap();
        run(&ac, &clusters, OpType::Read, fast())
            .execute(tree, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            ac.get_resource_definition("a1", "p+c1", "r1").await.unwrap(),
            Some(cm("r1"))
        );
        assert!(clusters.status_crs("p+c1").is_empty());
    }

    #[tokio::test]
    async fn test_approval_uses_name_prefix() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ac = one_cluster(store, &["csr1+CertificateSigningRequest"]).await;
        ac.add_approval("a1", "p+c1", "csr1+CertificateSigningRequest", b"{\"status\":{}}")
            .await
            .unwrap();
        let clusters = FakeClusters::new();

        let tree = AppTree::load(&ac).await.unwrap();
        run(&ac, &clusters, OpType::Apply, fast())
            .execute(tree, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(clusters.approved("p+c1"), vec!["csr1"]);
    }
}
