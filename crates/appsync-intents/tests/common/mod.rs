// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for appsync-intents integration tests.
//!
//! Provides TestContext with shared in-memory stores, an intent store and
//! the default controller registry, plus helpers for seeding AppContexts
//! and intents.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use appsync_core::persistence::{DocumentStore, KvStore, MemoryStore};
use appsync_core::{AppContext, CompositeAppMeta};
use appsync_intents::model::{ClusterNodes, NodeInfo};
use appsync_intents::{IntentKind, IntentScope, IntentStore, TranslatorRegistry};
use serde::Serialize;

pub const APP_CONTEXT_ID: &str = "100";
pub const INTENT: &str = "intents1";

pub struct TestContext {
    pub kv: Arc<dyn KvStore>,
    pub docs: Arc<dyn DocumentStore>,
    pub intents: IntentStore,
    pub registry: TranslatorRegistry,
}

impl TestContext {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("appsync_intents=debug")
            .with_test_writer()
            .try_init();

        let store = Arc::new(MemoryStore::new());
        let kv: Arc<dyn KvStore> = store.clone();
        let docs: Arc<dyn DocumentStore> = store;
        let intents = IntentStore::new(docs.clone());
        let registry = TranslatorRegistry::with_defaults(kv.clone(), intents.clone());
        Self {
            kv,
            docs,
            intents,
            registry,
        }
    }

    pub fn scope(&self) -> IntentScope {
        IntentScope::new(&meta(), INTENT)
    }

    pub async fn put<T: Serialize>(&self, kind: IntentKind, parent: Option<&str>, name: &str, intent: &T) {
        self.intents
            .put(&self.scope(), kind, parent, name, intent)
            .await
            .unwrap();
    }

    /// Store a node snapshot for `cluster` (`provider+name`).
    pub async fn nodes(&self, cluster: &str, nodes: &[(&str, u64)]) {
        let (provider, name) = cluster.split_once('+').unwrap();
        let nodes = ClusterNodes {
            nodes: nodes
                .iter()
                .map(|(n, cpu)| NodeInfo {
                    name: n.to_string(),
                    labels: BTreeMap::new(),
                    allocatable: BTreeMap::from([("cpu".to_string(), *cpu)]),
                })
                .collect(),
        };
        self.intents
            .put_cluster_nodes(provider, name, &nodes)
            .await
            .unwrap();
    }

    pub async fn run(&self, controller: &str) -> appsync_intents::Result<()> {
        self.registry
            .update_app_context(controller, INTENT, APP_CONTEXT_ID)
            .await
    }

    pub async fn app_context(&self) -> AppContext {
        AppContext::load(self.kv.clone(), APP_CONTEXT_ID).await.unwrap()
    }
}

pub fn meta() -> CompositeAppMeta {
    CompositeAppMeta {
        project: "proj1".to_string(),
        composite_app: "ca1".to_string(),
        version: "v1".to_string(),
        release: "r1".to_string(),
        deployment_intent_group: "dig1".to_string(),
        namespace: "ns1".to_string(),
        level: "0".to_string(),
    }
}

/// YAML of a Deployment named `name`.
pub fn deployment(name: &str) -> Vec<u8> {
    format!(
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {name}\nspec:\n  replicas: 1\n  template:\n    metadata:\n      labels:\n        app: {name}\n    spec:\n      containers:\n      - name: {name}\n        image: nginx\n"
    )
    .into_bytes()
}

/// Seed the test AppContext. Each row is `(app, cluster)` and gets a
/// `<app>+Deployment` resource.
pub async fn seed(ctx: &TestContext, rows: &[(&str, &str)]) -> AppContext {
    let ac = AppContext::create(ctx.kv.clone(), APP_CONTEXT_ID).await.unwrap();
    ac.add_composite_meta(&meta()).await.unwrap();
    let mut apps: Vec<String> = Vec::new();
    for (app, cluster) in rows {
        if !apps.iter().any(|a| a == app) {
            ac.add_app(app).await.unwrap();
            apps.push(app.to_string());
        }
        let app_handle = ac.get_app_handle(app).await.unwrap();
        ac.add_cluster(&app_handle, cluster).await.unwrap();
        ac.add_ordered_resource(app, cluster, &format!("{app}+Deployment"), &deployment(app))
            .await
            .unwrap();
    }
    ac.set_app_order(&apps).await.unwrap();
    ac
}
