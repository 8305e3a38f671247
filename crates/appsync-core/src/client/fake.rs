// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic in-process cluster client.
//!
//! [`FakeClusters`] is a shared registry of simulated clusters. Every
//! [`FakeClusterClient`] handed out by a connector records into it, so tests
//! can assert which resources were applied or deleted on which cluster and
//! inject unreachability, failures and latency.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{ClientError, ClientResult, ClusterClient, STATUS_CR_KIND, resource_identity};

#[derive(Debug, Default)]
struct FakeCluster {
    /// Live objects keyed by `(kind, name)`.
    live: BTreeMap<(String, String), Vec<u8>>,
    applied: Vec<String>,
    deleted: Vec<String>,
    approved: Vec<String>,
    watchers: usize,
    unreachable: bool,
    /// Number of upcoming reachability probes that fail.
    failing_probes: u32,
    probes: u32,
    fail_apply: HashSet<String>,
    fail_delete: HashSet<String>,
    apply_delay: Duration,
}

/// Shared registry of simulated clusters.
#[derive(Debug, Default)]
pub struct FakeClusters {
    clusters: Mutex<HashMap<String, FakeCluster>>,
}

impl FakeClusters {
    /// Create an empty registry behind an `Arc`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, FakeCluster>> {
        // A panicking test thread must not poison every other assertion.
        self.clusters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with<R>(&self, cluster: &str, f: impl FnOnce(&mut FakeCluster) -> R) -> R {
        let mut clusters = self.lock();
        f(clusters.entry(cluster.to_string()).or_default())
    }

    /// A client bound to `cluster`.
    pub fn client(self: &Arc<Self>, cluster: &str) -> FakeClusterClient {
        FakeClusterClient {
            cluster: cluster.to_string(),
            clusters: Arc::clone(self),
        }
    }

    /// Make a cluster unreachable (or reachable again).
    pub fn set_unreachable(&self, cluster: &str, unreachable: bool) {
        self.with(cluster, |c| c.unreachable = unreachable);
    }

    /// Fail the next `count` reachability probes of a cluster.
    pub fn fail_next_probes(&self, cluster: &str, count: u32) {
        self.with(cluster, |c| c.failing_probes = count);
    }

    /// Fail every apply of the named resource on a cluster.
    pub fn fail_apply(&self, cluster: &str, name: &str) {
        self.with(cluster, |c| {
            c.fail_apply.insert(name.to_string());
        });
    }

    /// Fail every delete of the named resource on a cluster.
    pub fn fail_delete(&self, cluster: &str, name: &str) {
        self.with(cluster, |c| {
            c.fail_delete.insert(name.to_string());
        });
    }

    /// Delay every apply on a cluster.
    pub fn set_apply_delay(&self, cluster: &str, delay: Duration) {
        self.with(cluster, |c| c.apply_delay = delay);
    }

    /// Names of successfully applied resources, in order, status CRs excluded.
    pub fn applied(&self, cluster: &str) -> Vec<String> {
        self.with(cluster, |c| c.applied.clone())
    }

    /// Names of deleted resources, in order, status CRs excluded.
    pub fn deleted(&self, cluster: &str) -> Vec<String> {
        self.with(cluster, |c| c.deleted.clone())
    }

    /// Names of CSRs approved on a cluster.
    pub fn approved(&self, cluster: &str) -> Vec<String> {
        self.with(cluster, |c| c.approved.clone())
    }

    /// Names of live resources, status CRs excluded, sorted.
    pub fn live(&self, cluster: &str) -> Vec<String> {
        self.with(cluster, |c| {
            c.live
                .keys()
                .filter(|(kind, _)| kind != STATUS_CR_KIND)
                .map(|(_, name)| name.clone())
                .collect()
        })
    }

    /// Current content of a live resource.
    pub fn live_content(&self, cluster: &str, name: &str) -> Option<Vec<u8>> {
        self.with(cluster, |c| {
            c.live
                .iter()
                .find(|((kind, n), _)| n == name && kind != STATUS_CR_KIND)
                .map(|(_, v)| v.clone())
        })
    }

    /// Names of live status CRs, sorted.
    pub fn status_crs(&self, cluster: &str) -> Vec<String> {
        self.with(cluster, |c| {
            c.live
                .keys()
                .filter(|(kind, _)| kind == STATUS_CR_KIND)
                .map(|(_, name)| name.clone())
                .collect()
        })
    }

    /// Number of watcher starts requested for a cluster.
    pub fn watcher_starts(&self, cluster: &str) -> usize {
        self.with(cluster, |c| c.watchers)
    }

    /// Number of reachability probes made against a cluster.
    pub fn probes(&self, cluster: &str) -> u32 {
        self.with(cluster, |c| c.probes)
    }

    pub(crate) fn record_watcher(&self, cluster: &str) {
        self.with(cluster, |c| c.watchers += 1);
    }

    /// Total number of applies across every cluster, status CRs excluded.
    pub fn total_applied(&self) -> usize {
        self.lock().values().map(|c| c.applied.len()).sum()
    }

    /// Total number of deletes across every cluster, status CRs excluded.
    pub fn total_deleted(&self) -> usize {
        self.lock().values().map(|c| c.deleted.len()).sum()
    }
}

/// Client for one simulated cluster.
#[derive(Debug, Clone)]
pub struct FakeClusterClient {
    cluster: String,
    clusters: Arc<FakeClusters>,
}

impl FakeClusterClient {
    fn check_reachable(&self) -> ClientResult<()> {
        if self.clusters.with(&self.cluster, |c| c.unreachable) {
            return Err(ClientError::Unreachable(self.cluster.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn apply(&self, content: &[u8]) -> ClientResult<()> {
        let (kind, name) = resource_identity(content)?;
        let delay = self.clusters.with(&self.cluster, |c| c.apply_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_reachable()?;
        self.clusters.with(&self.cluster, |c| {
            if c.fail_apply.contains(&name) {
                return Err(ClientError::Injected(format!("apply {}", name)));
            }
            if kind != STATUS_CR_KIND {
                c.applied.push(name.clone());
            }
            c.live.insert((kind, name), content.to_vec());
            Ok(())
        })
    }

    async fn delete(&self, content: &[u8]) -> ClientResult<()> {
        let (kind, name) = resource_identity(content)?;
        self.check_reachable()?;
        self.clusters.with(&self.cluster, |c| {
            if c.fail_delete.contains(&name) {
                return Err(ClientError::Injected(format!("delete {}", name)));
            }
            if kind != STATUS_CR_KIND {
                c.deleted.push(name.clone());
            }
            c.live.remove(&(kind, name));
            Ok(())
        })
    }

    async fn get(&self, content: &[u8], _namespace: &str) -> ClientResult<Vec<u8>> {
        let (kind, name) = resource_identity(content)?;
        self.check_reachable()?;
        self.clusters.with(&self.cluster, |c| {
            c.live
                .get(&(kind.clone(), name.clone()))
                .cloned()
                .ok_or_else(|| ClientError::Other(format!("{} {} not found", kind, name)))
        })
    }

    async fn approve(&self, name: &str, _approval: &[u8]) -> ClientResult<()> {
        self.check_reachable()?;
        self.clusters
            .with(&self.cluster, |c| c.approved.push(name.to_string()));
        Ok(())
    }

    async fn is_reachable(&self) -> ClientResult<()> {
        self.clusters.with(&self.cluster, |c| {
            c.probes += 1;
            if c.failing_probes > 0 {
                c.failing_probes -= 1;
                return Err(ClientError::Unreachable(self.cluster.clone()));
            }
            if c.unreachable {
                return Err(ClientError::Unreachable(self.cluster.clone()));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CM: &[u8] = b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm1\n";

    #[tokio::test]
    async fn test_apply_get_delete() {
        let clusters = FakeClusters::new();
        let client = clusters.client("p+c1");

        client.apply(CM).await.unwrap();
        assert_eq!(clusters.applied("p+c1"), vec!["cm1"]);
        assert_eq!(clusters.live("p+c1"), vec!["cm1"]);
        assert_eq!(client.get(CM, "default").await.unwrap(), CM.to_vec());

        client.delete(CM).await.unwrap();
        client.delete(CM).await.unwrap();
        assert_eq!(clusters.deleted("p+c1"), vec!["cm1", "cm1"]);
        assert!(clusters.live("p+c1").is_empty());
        assert!(client.get(CM, "default").await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_and_probes() {
        let clusters = FakeClusters::new();
        let client = clusters.client("p+c1");

        clusters.fail_next_probes("p+c1", 2);
        assert!(client.is_reachable().await.is_err());
        assert!(client.is_reachable().await.is_err());
        assert!(client.is_reachable().await.is_ok());
        assert_eq!(clusters.probes("p+c1"), 3);

        clusters.set_unreachable("p+c1", true);
        assert!(matches!(
            client.apply(CM).await,
            Err(ClientError::Unreachable(_))
        ));
        assert!(clusters.applied("p+c1").is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let clusters = FakeClusters::new();
        clusters.fail_apply("p+c2", "cm1");
        let err = clusters.client("p+c2").apply(CM).await.unwrap_err();
        assert!(matches!(err, ClientError::Injected(_)));
        // Other clusters are unaffected.
        clusters.client("p+c1").apply(CM).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_crs_tracked_separately() {
        let clusters = FakeClusters::new();
        let client = clusters.client("p+c1");
        let cr = b"kind: ResourceBundleState\nmetadata:\n  name: 1-a1\n";
        client.apply(cr).await.unwrap();
        client.apply(CM).await.unwrap();
        assert_eq!(clusters.status_crs("p+c1"), vec!["1-a1"]);
        assert_eq!(clusters.live("p+c1"), vec!["cm1"]);
        assert_eq!(clusters.applied("p+c1"), vec!["cm1"]);
    }
}
