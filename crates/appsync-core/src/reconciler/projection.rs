// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory projection of an AppContext tree.
//!
//! The projection carries the per-node skip bits used by the two update
//! phases. It is rebuilt for every event and never persisted.

use std::collections::HashSet;

use tracing::debug;

use crate::appcontext::AppContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    pub name: String,
    pub skip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub name: String,
    pub skip: bool,
    /// The cluster no longer hosts this app in the newer generation.
    pub retired: bool,
    /// Resources in apply order.
    pub resources: Vec<ResourceNode>,
}

impl ClusterNode {
    fn resource_names(&self) -> HashSet<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppNode {
    pub name: String,
    pub skip: bool,
    pub clusters: Vec<ClusterNode>,
}

impl AppNode {
    fn cluster(&self, name: &str) -> Option<&ClusterNode> {
        self.clusters.iter().find(|c| c.name == name)
    }

    fn all_clusters_skipped(&self) -> bool {
        self.clusters.iter().all(|c| c.skip)
    }
}

/// Apps in apply order, each with its clusters and ordered resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppTree {
    pub apps: Vec<AppNode>,
}

impl AppTree {
    /// Read the tree of `ac`.
    ///
    /// Apps follow the app order instruction; without one they are listed by
    /// name. A cluster without a resource order has no resources to process.
    pub async fn load(ac: &AppContext) -> Result<Self> {
        let app_names = match ac.get_app_order().await {
            Ok(order) => order,
            Err(Error::NotFound(_)) => ac.get_app_names().await?,
            Err(e) => return Err(e),
        };

        let mut apps = Vec::with_capacity(app_names.len());
        for app in app_names {
            let mut clusters = Vec::new();
            for cluster in ac.get_cluster_names(&app).await? {
                let order = match ac.get_resource_order(&app, &cluster).await {
                    Ok(order) => order,
                    Err(Error::NotFound(_)) => Vec::new(),
                    Err(e) => return Err(e),
                };
                clusters.push(ClusterNode {
                    name: cluster,
                    skip: false,
                    retired: false,
                    resources: order
                        .into_iter()
                        .map(|name| ResourceNode { name, skip: false })
                        .collect(),
                });
            }
            apps.push(AppNode {
                name: app,
                skip: false,
                clusters,
            });
        }
        Ok(Self { apps })
    }

    fn app(&self, name: &str) -> Option<&AppNode> {
        self.apps.iter().find(|a| a.name == name)
    }

    /// Number of resources that will be processed.
    pub fn active_resources(&self) -> usize {
        self.apps
            .iter()
            .filter(|a| !a.skip)
            .flat_map(|a| a.clusters.iter().filter(|c| !c.skip))
            .flat_map(|c| c.resources.iter().filter(|r| !r.skip))
            .count()
    }

    /// Mark `self` (the older generation) so that deleting it only removes
    /// resources that `new` no longer has.
    pub fn mark_delete_phase(&mut self, new: &AppTree) {
        for app in &mut self.apps {
            let Some(new_app) = new.app(&app.name) else {
                for cluster in &mut app.clusters {
                    cluster.retired = true;
                }
                continue;
            };

            for cluster in &mut app.clusters {
                let Some(new_cluster) = new_app.cluster(&cluster.name) else {
                    cluster.retired = true;
                    continue;
                };
                let kept = new_cluster.resource_names();
                let mut removed = 0;
                for resource in &mut cluster.resources {
                    if kept.contains(resource.name.as_str()) {
                        resource.skip = true;
                    } else {
                        removed += 1;
                    }
                }
                if removed == 0 {
                    cluster.skip = true;
                }
            }
            app.skip = app.all_clusters_skipped();
            debug!(app = %app.name, skip = app.skip, "Delete phase marked");
        }
    }

    /// Mark `self` (the newer generation) so that applying it only touches
    /// resources that changed or were added since `old_ac`.
    pub async fn mark_modify_phase(
        &mut self,
        new_ac: &AppContext,
        old: &AppTree,
        old_ac: &AppContext,
    ) -> Result<()> {
        for app in &mut self.apps {
            let Some(old_app) = old.app(&app.name) else {
                continue;
            };
            for cluster in &mut app.clusters {
                let Some(old_cluster) = old_app.cluster(&cluster.name) else {
                    continue;
                };
                let previous = old_cluster.resource_names();
                let mut changed = 0;
                for resource in &mut cluster.resources {
                    if !previous.contains(resource.name.as_str()) {
                        changed += 1;
                        continue;
                    }
                    let new_bytes = new_ac
                        .get_resource_bytes(&app.name, &cluster.name, &resource.name)
                        .await?;
                    let old_bytes = old_ac
                        .get_resource_bytes(&app.name, &cluster.name, &resource.name)
                        .await?;
                    if new_bytes == old_bytes {
                        resource.skip = true;
                    } else {
                        changed += 1;
                    }
                }
                if changed == 0 {
                    cluster.skip = true;
                }
            }
            app.skip = app.all_clusters_skipped();
            debug!(app = %app.name, skip = app.skip, "Modify phase marked");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{KvStore, MemoryStore};
    use std::sync::Arc;

    fn cm(name: &str, value: &str) -> Vec<u8> {
        format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\ndata:\n  v: \"{value}\"\n")
            .into_bytes()
    }

    async fn seed(
        store: Arc<dyn KvStore>,
        id: &str,
        tree: &[(&str, &str, &[(&str, &str)])],
    ) -> AppContext {
        let ac = AppContext::create(store, id).await.unwrap();
        let mut apps: Vec<String> = Vec::new();
        for (app, cluster, resources) in tree {
            if !apps.iter().any(|a| a == app) {
                ac.add_app(app).await.unwrap();
                apps.push(app.to_string());
            }
            let app_handle = ac.get_app_handle(app).await.unwrap();
            ac.add_cluster(&app_handle, cluster).await.unwrap();
            for (name, value) in *resources {
                ac.add_ordered_resource(app, cluster, name, &cm(name, value))
                    .await
                    .unwrap();
            }
        }
        ac.set_app_order(&apps).await.unwrap();
        ac
    }

    fn processed(tree: &AppTree) -> Vec<String> {
        let mut out = Vec::new();
        for app in tree.apps.iter().filter(|a| !a.skip) {
            for cluster in app.clusters.iter().filter(|c| !c.skip) {
                for r in cluster.resources.iter().filter(|r| !r.skip) {
                    out.push(format!("{}/{}/{}", app.name, cluster.name, r.name));
                }
            }
        }
        out
    }

    #[tokio::test]
    async fn test_load_follows_orders() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ac = seed(
            store,
            "1",
            &[
                ("a2", "p+c1", &[("r3", "x"), ("r4", "x")]),
                ("a1", "p+c1", &[("r1", "x"), ("r2", "x")]),
            ],
        )
        .await;
        let tree = AppTree::load(&ac).await.unwrap();
        let names: Vec<_> = tree.apps.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a2", "a1"]);
        assert_eq!(tree.active_resources(), 4);
        assert_eq!(tree.apps[0].clusters[0].resources[0].name, "r3");
    }

    #[tokio::test]
    async fn test_delete_phase_keeps_only_removed_resources() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let old = seed(
            store.clone(),
            "old",
            &[
                ("a1", "p+c1", &[("r1", "1"), ("r2", "1")]),
                ("a1", "p+c2", &[("r1", "1")]),
                ("a2", "p+c1", &[("r5", "1")]),
            ],
        )
        .await;
        let new = seed(store, "new", &[("a1", "p+c1", &[("r1", "2"), ("r3", "1")])]).await;

        let mut old_tree = AppTree::load(&old).await.unwrap();
        let new_tree = AppTree::load(&new).await.unwrap();
        old_tree.mark_delete_phase(&new_tree);

        assert_eq!(
            processed(&old_tree),
            vec!["a1/p+c1/r2", "a1/p+c2/r1", "a2/p+c1/r5"]
        );
        let a1 = &old_tree.apps[0];
        assert!(!a1.clusters[0].retired);
        assert!(a1.clusters[1].retired);
        assert!(old_tree.apps[1].clusters[0].retired);
    }

    #[tokio::test]
    async fn test_delete_phase_skips_unchanged_cluster() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let old = seed(store.clone(), "old", &[("a1", "p+c1", &[("r1", "1")])]).await;
        let new = seed(store, "new", &[("a1", "p+c1", &[("r1", "2")])]).await;

        let mut old_tree = AppTree::load(&old).await.unwrap();
        old_tree.mark_delete_phase(&AppTree::load(&new).await.unwrap());
        assert!(old_tree.apps[0].clusters[0].skip);
        assert!(old_tree.apps[0].skip);
        assert_eq!(old_tree.active_resources(), 0);
    }

    #[tokio::test]
    async fn test_modify_phase_applies_changed_and_added() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let old = seed(
            store.clone(),
            "old",
            &[
                ("a1", "p+c1", &[("r1", "1"), ("r2", "1")]),
                ("a1", "p+c2", &[("r1", "1")]),
            ],
        )
        .await;
        let new = seed(
            store,
            "new",
            &[
                ("a1", "p+c1", &[("r1", "2"), ("r3", "1")]),
                ("a1", "p+c2", &[("r1", "1")]),
                ("a3", "p+c1", &[("r9", "1")]),
            ],
        )
        .await;

        let old_tree = AppTree::load(&old).await.unwrap();
        let mut new_tree = AppTree::load(&new).await.unwrap();
        new_tree
            .mark_modify_phase(&new, &old_tree, &old)
            .await
            .unwrap();

        assert_eq!(
            processed(&new_tree),
            vec!["a1/p+c1/r1", "a1/p+c1/r3", "a3/p+c1/r9"]
        );
        assert!(new_tree.apps[0].clusters[1].skip);
        assert!(!new_tree.apps[0].skip);
    }
}
