// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for appsync-core integration tests.
//!
//! Provides TestContext for setting up a store, simulated clusters and a
//! running runtime, plus helpers for seeding AppContext trees.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use appsync_core::client::fake::FakeClusters;
use appsync_core::persistence::{KvStore, MemoryStore};
use appsync_core::{AppContext, CompositeAppMeta, ReconcilerSettings, Runtime, StateValue};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(10);

/// Test context that manages the store, simulated clusters and runtime.
pub struct TestContext {
    pub store: Arc<dyn KvStore>,
    pub clusters: Arc<FakeClusters>,
    pub runtime: Runtime,
}

impl TestContext {
    /// Create a runtime backed by an in-memory store and fake clusters,
    /// tuned for short polling intervals.
    pub async fn new() -> Self {
        Self::with_settings(fast_settings()).await
    }

    pub async fn with_settings(settings: ReconcilerSettings) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("appsync_core=debug")
            .with_test_writer()
            .try_init();

        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let clusters = FakeClusters::new();
        let runtime = start_runtime(store.clone(), clusters.clone(), settings).await;
        Self {
            store,
            clusters,
            runtime,
        }
    }

    /// Wait until the worker of `id` exits, failing the test after [`WAIT`].
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

    /// Poll until `cond` holds, failing the test after [`WAIT`].
    pub async fn until(&self, what: &str, cond: impl Fn(&FakeClusters) -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !cond(&self.clusters) {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub fn fast_settings() -> ReconcilerSettings {
    ReconcilerSettings::default()
        .with_wait_time(Duration::from_millis(10))
        .with_stop_poll_interval(Duration::from_millis(20))
        .with_dependency_delay(Duration::from_millis(50))
}

pub async fn start_runtime(
    store: Arc<dyn KvStore>,
    clusters: Arc<FakeClusters>,
    settings: ReconcilerSettings,
) -> Runtime {
    Runtime::builder()
        .kv_store(store)
        .settings(settings)
        .fake_clusters(clusters)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap()
}

/// YAML of a ConfigMap named `name` carrying `value`.
pub fn config_map(name: &str, value: &str) -> Vec<u8> {
    format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n  namespace: default\ndata:\n  value: \"{value}\"\n"
    )
    .into_bytes()
}

/// One resource of a seeded tree: `(app, cluster, name, value)`.
pub type Row<'a> = (&'a str, &'a str, &'a str, &'a str);

/// Create AppContext `id` with the given resources. Apps keep first-seen order.
pub async fn seed(store: &Arc<dyn KvStore>, id: &str, rows: &[Row<'_>]) -> AppContext {
    let ac = AppContext::create(store.clone(), id).await.unwrap();
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

    let mut apps: Vec<String> = Vec::new();
    for (app, cluster, name, value) in rows {
        if !apps.iter().any(|a| a == app) {
            ac.add_app(app).await.unwrap();
            apps.push(app.to_string());
        }
        if ac.get_cluster_handle(app, cluster).await.is_err() {
            let app_handle = ac.get_app_handle(app).await.unwrap();
            ac.add_cluster(&app_handle, cluster).await.unwrap();
        }
        ac.add_ordered_resource(app, cluster, name, &config_map(name, value))
            .await
            .unwrap();
    }
    ac.set_app_order(&apps).await.unwrap();
    ac
}

pub fn sorted(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v
}
