// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for appsync-server integration tests.
//!
//! Provides TestContext with an in-memory store, simulated clusters, a
//! running runtime and the HTTP router wired to all of them.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use appsync_core::client::fake::FakeClusters;
use appsync_core::persistence::{DocumentStore, KvStore, MemoryStore};
use appsync_core::{AppContext, CompositeAppMeta, ReconcilerSettings, Runtime, StateValue};
use appsync_intents::{ClusterSnapshots, IntentStore, StaticInventory, TranslatorRegistry};
use appsync_server::{AppState, RpcReply, router};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(10);

pub struct TestContext {
    pub kv: Arc<dyn KvStore>,
    pub docs: Arc<dyn DocumentStore>,
    pub clusters: Arc<FakeClusters>,
    pub inventory: Arc<StaticInventory>,
    pub intents: IntentStore,
    pub runtime: Runtime,
    pub app: Router,
}

impl TestContext {
    pub async fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("appsync_server=debug,appsync_core=info")
            .with_test_writer()
            .try_init();

        let store = Arc::new(MemoryStore::new());
        let kv: Arc<dyn KvStore> = store.clone();
        let docs: Arc<dyn DocumentStore> = store;
        let clusters = FakeClusters::new();

        let runtime = Runtime::builder()
            .kv_store(kv.clone())
            .document_store(docs.clone())
            .settings(
                ReconcilerSettings::default()
                    .with_wait_time(Duration::from_millis(10))
                    .with_stop_poll_interval(Duration::from_millis(20))
                    .with_dependency_delay(Duration::from_millis(50)),
            )
            .fake_clusters(clusters.clone())
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        let intents = IntentStore::new(docs.clone());
        let inventory = StaticInventory::new();
        let state = AppState {
            runtime: runtime.clone(),
            translators: TranslatorRegistry::with_defaults(kv.clone(), intents.clone()),
            snapshots: ClusterSnapshots::new(intents.clone(), inventory.clone()),
        };

        Self {
            kv,
            docs,
            clusters,
            inventory,
            intents,
            runtime,
            app: router(state),
        }
    }

    /// POST `body` as JSON and decode the reply.
    pub async fn rpc(&self, uri: &str, body: Value) -> RpcReply {
        let response = self
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    pub async fn quiesce(&self, id: &str) {
        tokio::time::timeout(WAIT, self.runtime.wait_for_quiescence(id))
            .await
            .unwrap_or_else(|_| panic!("worker of {id} did not go idle"));
    }

    pub async fn status(&self, id: &str) -> StateValue {
        self.runtime
            .app_context(id)
            .await
            .unwrap()
            .get_status()
            .await
            .unwrap()
    }
}

/// YAML of a ConfigMap named `name` carrying `value`.
pub fn config_map(name: &str, value: &str) -> Vec<u8> {
    format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n  namespace: default\ndata:\n  value: \"{value}\"\n"
    )
    .into_bytes()
}

/// Create AppContext `id` with one app `a1` and one ConfigMap per cluster.
pub async fn seed(kv: &Arc<dyn KvStore>, id: &str, clusters: &[&str], value: &str) -> AppContext {
    let ac = AppContext::create(kv.clone(), id).await.unwrap();
    ac.add_composite_meta(&CompositeAppMeta {
        project: "proj1".to_string(),
        composite_app: "ca1".to_string(),
        version: "v1".to_string(),
        release: "r1".to_string(),
        deployment_intent_group: "dig1".to_string(),
        namespace: "default".to_string(),
        level: "0".to_string(),
    })
    .await
    .unwrap();
    ac.add_app("a1").await.unwrap();
    let app_handle = ac.get_app_handle("a1").await.unwrap();
    for cluster in clusters {
        ac.add_cluster(&app_handle, cluster).await.unwrap();
        ac.add_ordered_resource("a1", cluster, "cm1+ConfigMap", &config_map("cm1", value))
            .await
            .unwrap();
    }
    ac.set_app_order(&["a1".to_string()]).await.unwrap();
    ac
}
