// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HPA placement filter.
//!
//! Narrows the clusters of every app that carries HPA intents down to the
//! clusters whose nodes can host the requested replicas. Label requirements
//! are evaluated first and reduce each cluster's candidate node set; the
//! quantitative requirements are then placed replica by replica against the
//! free capacity of those nodes. Clusters that fail are removed from the
//! AppContext.

use std::collections::{BTreeMap, BTreeSet};

use appsync_core::AppContext;
use appsync_core::client::split_cluster_name;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{IntentError, Result};
use crate::model::{ClusterNodes, HpaConsumer, HpaIntent, HpaResource, NodeInfo};
use crate::store::{IntentKind, IntentScope, IntentStore};
use crate::translator::Translator;

/// Candidate nodes per cluster.
type Candidates = BTreeMap<String, Vec<NodeInfo>>;

/// Free capacity per cluster, node and resource name.
type Accounting = BTreeMap<String, BTreeMap<String, BTreeMap<String, u64>>>;

/// A consumer together with its requirements, label ones first.
#[derive(Debug, Clone)]
pub struct Placement {
    pub consumer: HpaConsumer,
    pub resources: Vec<HpaResource>,
}

impl Placement {
    pub fn new(consumer: HpaConsumer, mut resources: Vec<HpaResource>) -> Self {
        resources.sort_by_key(|r| r.spec.allocatable);
        Self {
            consumer,
            resources,
        }
    }
}

pub struct HpaPlacement {
    intents: IntentStore,
}

impl HpaPlacement {
    pub fn new(intents: IntentStore) -> Self {
        Self { intents }
    }

    async fn placements(&self, scope: &IntentScope, intent: &HpaIntent) -> Result<Vec<Placement>> {
        let consumers: Vec<HpaConsumer> = self
            .intents
            .list(scope, IntentKind::HpaConsumer, Some(&intent.metadata.name))
            .await?;
        let mut out = Vec::with_capacity(consumers.len());
        for consumer in consumers {
            let resources: Vec<HpaResource> = self
                .intents
                .list(scope, IntentKind::HpaResource, Some(&consumer.metadata.name))
                .await?;
            out.push(Placement::new(consumer, resources));
        }
        Ok(out)
    }

    async fn candidates(&self, clusters: &[String]) -> Result<Candidates> {
        let mut candidates = Candidates::new();
        for cluster in clusters {
            let (provider, name) = split_cluster_name(cluster)?;
            let nodes = self
                .intents
                .get_cluster_nodes(provider, name)
                .await?
                .unwrap_or_else(|| {
                    debug!(cluster = %cluster, "No node snapshot for cluster");
                    ClusterNodes::default()
                });
            candidates.insert(cluster.clone(), nodes.nodes);
        }
        Ok(candidates)
    }
}

/// Keep the nodes that carry the label of a non-allocatable requirement.
fn filter_labels(candidates: &mut Candidates, resource: &HpaResource) {
    let want = &resource.spec.resource;
    for nodes in candidates.values_mut() {
        nodes.retain(|n| n.labels.get(&want.key) == Some(&want.value));
    }
    candidates.retain(|cluster, nodes| {
        if nodes.is_empty() {
            debug!(cluster = %cluster, key = %want.key, value = %want.value, "No node matches label");
        }
        !nodes.is_empty()
    });
}

/// Place `replicas` requests of an allocatable requirement on each cluster.
fn filter_allocatable(
    candidates: &mut Candidates,
    accounting: &mut Accounting,
    resource: &HpaResource,
    replicas: u32,
) {
    let want = &resource.spec.resource;
    let mut failed = Vec::new();

    for (cluster, nodes) in candidates.iter() {
        let free = accounting.entry(cluster.clone()).or_insert_with(|| {
            nodes
                .iter()
                .map(|n| (n.name.clone(), n.allocatable.clone()))
                .collect()
        });
        let mut taken: Vec<String> = Vec::new();

        for replica in 1..=replicas {
            let best = nodes
                .iter()
                .filter_map(|n| {
                    let left = free.get(&n.name)?.get(&want.name).copied()?;
                    (left >= want.requests).then_some((left, &n.name))
                })
                .max_by_key(|(left, _)| *left);

            let Some((_, node)) = best else {
                // Accounting is only restored when the last replica misses.
                if replica == replicas {
                    for node in &taken {
                        if let Some(left) = free.get_mut(node).and_then(|r| r.get_mut(&want.name)) {
                            *left += want.requests;
                        }
                    }
                }
                debug!(
                    cluster = %cluster,
                    resource = %want.name,
                    requests = want.requests,
                    replica,
                    "Replica does not fit"
                );
                failed.push(cluster.clone());
                break;
            };

            if let Some(left) = free.get_mut(node).and_then(|r| r.get_mut(&want.name)) {
                *left -= want.requests;
            }
            taken.push(node.clone());
        }
    }

    for cluster in failed {
        candidates.remove(&cluster);
    }
}

/// Clusters of `clusters` that can host every placement.
pub fn qualify(clusters: Candidates, placements: &[Placement]) -> BTreeSet<String> {
    let mut candidates = clusters;
    candidates.retain(|_, nodes| !nodes.is_empty());
    let mut accounting = Accounting::new();

    for placement in placements {
        for resource in &placement.resources {
            if !resource.spec.mandatory {
                continue;
            }
            if resource.spec.allocatable {
                filter_allocatable(
                    &mut candidates,
                    &mut accounting,
                    resource,
                    placement.consumer.spec.replicas,
                );
            } else {
                filter_labels(&mut candidates, resource);
            }
        }
    }
    candidates.into_keys().collect()
}

/// Group the clusters of an app by placement group.
async fn cluster_groups(ac: &AppContext, app: &str) -> Result<BTreeMap<Option<String>, Vec<String>>> {
    let mut groups: BTreeMap<Option<String>, Vec<String>> = BTreeMap::new();
    for cluster in ac.get_cluster_names(app).await? {
        let group = ac.get_cluster_group(app, &cluster).await?;
        groups.entry(group).or_default().push(cluster);
    }
    Ok(groups)
}

#[async_trait]
impl Translator for HpaPlacement {
    fn name(&self) -> &'static str {
        "hpa"
    }

    async fn translate(&self, scope: &IntentScope, ac: &AppContext) -> Result<()> {
        let intents: Vec<HpaIntent> = self.intents.list(scope, IntentKind::HpaIntent, None).await?;
        let mut by_app: BTreeMap<String, Vec<Placement>> = BTreeMap::new();
        for intent in &intents {
            let placements = self.placements(scope, intent).await?;
            by_app
                .entry(intent.spec.app.clone())
                .or_default()
                .extend(placements);
        }

        for (app, placements) in by_app {
            let groups = cluster_groups(ac, &app).await?;
            if groups.is_empty() {
                warn!(app_context_id = %ac.id(), app = %app, "App has no clusters to place");
                continue;
            }

            let mut qualified = BTreeSet::new();
            let mut rejected = Vec::new();
            for (group, clusters) in groups {
                let candidates = self.candidates(&clusters).await?;
                let kept = qualify(candidates, &placements);
                if kept.is_empty() && group.is_some() {
                    return Err(IntentError::NoQualifiedCluster {
                        app: app.clone(),
                        group,
                    });
                }
                rejected.extend(clusters.into_iter().filter(|c| !kept.contains(c)));
                qualified.extend(kept);
            }
            if qualified.is_empty() {
                return Err(IntentError::NoQualifiedCluster { app, group: None });
            }

            for cluster in &rejected {
                let handle = ac.get_cluster_handle(&app, cluster).await?;
                ac.delete_handle(&handle).await?;
            }
            info!(
                app_context_id = %ac.id(),
                app = %app,
                qualified = ?qualified,
                removed = ?rejected,
                "HPA placement applied"
            );
        }
        Ok(())
    }
}
