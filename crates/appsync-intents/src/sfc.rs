// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service function chain generator.
//!
//! Every SFC intent becomes one `NetworkChaining` custom resource placed on
//! the clusters that host all apps of the chain, under the synthetic app
//! [`CHAIN_APP`].

use std::collections::BTreeSet;

use appsync_core::AppContext;
use appsync_core::reconciler::executor::CHAIN_APP;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::{IntentError, Result};
use crate::model::{
    ChainEnd, LabelSelector, SfcClientSelectorIntent, SfcIntent, SfcProviderNetworkIntent,
};
use crate::store::{IntentKind, IntentScope, IntentStore};
use crate::translator::Translator;

pub const CHAIN_API_VERSION: &str = "k8s.plugin.opnfv.org/v1alpha1";
pub const CHAIN_KIND: &str = "NetworkChaining";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkChaining {
    api_version: &'static str,
    kind: &'static str,
    metadata: ChainMetadata,
    spec: ChainSpec,
}

#[derive(Debug, Serialize)]
struct ChainMetadata {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChainSpec {
    chain_type: String,
    routing_spec: RoutingSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoutingSpec {
    namespace: String,
    network_chain: String,
    left: Vec<ChainEndpoint>,
    right: Vec<ChainEndpoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChainEndpoint {
    network_name: String,
    gateway_ip: String,
    subnet: String,
    pod_selector: LabelSelector,
    namespace_selector: LabelSelector,
}

/// `app=a1,net1,app=a2` style description of the chain.
fn network_chain(intent: &SfcIntent) -> String {
    let mut parts = Vec::new();
    for link in &intent.spec.network_chain {
        if link.labels.is_empty() {
            parts.push(format!("app={}", link.app));
        } else {
            parts.extend(link.labels.iter().map(|(k, v)| format!("{k}={v}")));
        }
        if !link.right_network.is_empty() {
            parts.push(link.right_network.clone());
        }
    }
    parts.join(",")
}

/// Provider networks of one end, each paired with every client selector of that end.
fn endpoints(
    end: ChainEnd,
    providers: &[SfcProviderNetworkIntent],
    selectors: &[SfcClientSelectorIntent],
) -> Vec<ChainEndpoint> {
    let selectors: Vec<_> = selectors.iter().filter(|s| s.spec.chain_end == end).collect();
    let mut out = Vec::new();
    for provider in providers.iter().filter(|p| p.spec.chain_end == end) {
        let base = ChainEndpoint {
            network_name: provider.spec.network_name.clone(),
            gateway_ip: provider.spec.gateway_ip.clone(),
            subnet: provider.spec.subnet.clone(),
            pod_selector: LabelSelector::default(),
            namespace_selector: LabelSelector::default(),
        };
        if selectors.is_empty() {
            out.push(base);
            continue;
        }
        for selector in &selectors {
            out.push(ChainEndpoint {
                pod_selector: selector.spec.pod_selector.clone(),
                namespace_selector: selector.spec.namespace_selector.clone(),
                ..base.clone()
            });
        }
    }
    out
}

fn chain_resource(
    intent: &SfcIntent,
    providers: &[SfcProviderNetworkIntent],
    selectors: &[SfcClientSelectorIntent],
    default_namespace: &str,
) -> NetworkChaining {
    let namespace = if intent.spec.namespace.is_empty() {
        default_namespace.to_string()
    } else {
        intent.spec.namespace.clone()
    };
    NetworkChaining {
        api_version: CHAIN_API_VERSION,
        kind: CHAIN_KIND,
        metadata: ChainMetadata {
            name: intent.metadata.name.clone(),
        },
        spec: ChainSpec {
            chain_type: intent.spec.chain_type.clone(),
            routing_spec: RoutingSpec {
                namespace,
                network_chain: network_chain(intent),
                left: endpoints(ChainEnd::Left, providers, selectors),
                right: endpoints(ChainEnd::Right, providers, selectors),
            },
        },
    }
}

/// Clusters hosting every app of the chain.
async fn chain_clusters(ac: &AppContext, intent: &SfcIntent) -> Result<BTreeSet<String>> {
    let mut common: Option<BTreeSet<String>> = None;
    for link in &intent.spec.network_chain {
        let clusters: BTreeSet<String> = ac.get_cluster_names(&link.app).await?.into_iter().collect();
        common = Some(match common {
            None => clusters,
            Some(prev) => prev.intersection(&clusters).cloned().collect(),
        });
    }
    match common {
        Some(clusters) if !clusters.is_empty() => Ok(clusters),
        _ => Err(IntentError::NoChainCluster(intent.metadata.name.clone())),
    }
}

/// Add the chain app to the AppContext and append it to the app order.
async fn ensure_chain_app(ac: &AppContext) -> Result<()> {
    let mut order = match ac.get_app_order().await {
        Ok(order) => order,
        Err(appsync_core::Error::NotFound(_)) => ac.get_app_names().await?,
        Err(e) => return Err(e.into()),
    };
    ac.add_app(CHAIN_APP).await?;
    if !order.iter().any(|a| a == CHAIN_APP) {
        order.push(CHAIN_APP.to_string());
        ac.set_app_order(&order).await?;
    }
    Ok(())
}

pub struct SfcGenerator {
    intents: IntentStore,
}

impl SfcGenerator {
    pub fn new(intents: IntentStore) -> Self {
        Self { intents }
    }
}

#[async_trait]
impl Translator for SfcGenerator {
    fn name(&self) -> &'static str {
        "sfc"
    }

    async fn translate(&self, scope: &IntentScope, ac: &AppContext) -> Result<()> {
        let chains: Vec<SfcIntent> = self.intents.list(scope, IntentKind::SfcIntent, None).await?;
        if chains.is_empty() {
            return Ok(());
        }
        let (default_namespace, _) = ac.get_namespace().await?;

        // Every chain must be placeable before the AppContext is touched.
        let mut placed = Vec::with_capacity(chains.len());
        for chain in &chains {
            let name = chain.metadata.name.as_str();
            let providers: Vec<SfcProviderNetworkIntent> = self
                .intents
                .list(scope, IntentKind::SfcProviderNetwork, Some(name))
                .await?;
            let selectors: Vec<SfcClientSelectorIntent> = self
                .intents
                .list(scope, IntentKind::SfcClientSelector, Some(name))
                .await?;
            let resource = chain_resource(chain, &providers, &selectors, &default_namespace);
            let clusters = chain_clusters(ac, chain).await?;
            placed.push((name, serde_yaml::to_string(&resource)?, clusters));
        }

        ensure_chain_app(ac).await?;
        let app_handle = ac.get_app_handle(CHAIN_APP).await?;
        for (name, definition, clusters) in placed {
            let resource = format!("{name}+{CHAIN_KIND}");
            for cluster in &clusters {
                ac.add_cluster(&app_handle, cluster).await?;
                ac.add_ordered_resource(CHAIN_APP, cluster, &resource, definition.as_bytes())
                    .await?;
            }
            info!(
                app_context_id = %ac.id(),
                chain = %name,
                clusters = ?clusters,
                "Network chain placed"
            );
        }
        Ok(())
    }
}
