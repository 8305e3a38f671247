// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Labels client workloads so that they are selected by a chain end.

use std::collections::BTreeMap;

use appsync_core::AppContext;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{IntentError, Result};
use crate::model::{ChainEnd, SfcClientIntent, SfcClientSelectorIntent, SfcIntent};
use crate::store::{IntentKind, IntentScope, IntentStore};
use crate::translator::Translator;
use crate::workload::Workload;

/// Pod labels matched by the client selectors of one chain end.
pub fn chain_end_labels(
    selectors: &[SfcClientSelectorIntent],
    end: ChainEnd,
) -> BTreeMap<String, String> {
    selectors
        .iter()
        .filter(|s| s.spec.chain_end == end)
        .flat_map(|s| s.spec.pod_selector.match_labels.clone())
        .collect()
}

pub struct SfcClientLabeller {
    intents: IntentStore,
}

impl SfcClientLabeller {
    pub fn new(intents: IntentStore) -> Self {
        Self { intents }
    }
}

#[async_trait]
impl Translator for SfcClientLabeller {
    fn name(&self) -> &'static str {
        "sfc-client"
    }

    async fn translate(&self, scope: &IntentScope, ac: &AppContext) -> Result<()> {
        let clients: Vec<SfcClientIntent> =
            self.intents.list(scope, IntentKind::SfcClient, None).await?;

        for client in clients {
            let spec = &client.spec;
            let chain: SfcIntent = self
                .intents
                .get(scope, IntentKind::SfcIntent, None, &spec.chain_name)
                .await?;
            let selectors: Vec<SfcClientSelectorIntent> = self
                .intents
                .list(scope, IntentKind::SfcClientSelector, Some(&chain.metadata.name))
                .await?;
            let labels = chain_end_labels(&selectors, spec.chain_end);
            if labels.is_empty() {
                return Err(IntentError::Invalid(format!(
                    "chain {} has no client selector for the {:?} end",
                    spec.chain_name, spec.chain_end
                )));
            }

            let resource = spec.resource_name();
            let mut labelled = 0;
            for cluster in ac.get_cluster_names(&spec.app).await? {
                let handle = match ac.get_resource_handle(&spec.app, &cluster, &resource).await {
                    Ok(handle) => handle,
                    Err(appsync_core::Error::NotFound(_)) => {
                        debug!(app = %spec.app, cluster = %cluster, resource = %resource, "Client workload not on cluster");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let mut workload =
                    Workload::parse(&ac.get_resource_bytes(&spec.app, &cluster, &resource).await?)?;
                workload.add_labels(&labels)?;
                let bytes = workload.to_bytes()?;
                ac.update_value(&handle, std::str::from_utf8(&bytes).map_err(appsync_core::Error::from)?)
                    .await?;
                labelled += 1;
            }
            info!(
                app_context_id = %ac.id(),
                chain = %spec.chain_name,
                app = %spec.app,
                resource = %resource,
                clusters = labelled,
                "Chain client labelled"
            );
        }
        Ok(())
    }
}
