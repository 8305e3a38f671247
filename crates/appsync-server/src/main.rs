// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! appsync - multi-cluster rollout service
//!
//! Serves the rollout RPCs and the intent controllers over HTTP, and resumes
//! every AppContext left active by a previous process.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use appsync_core::client::fake::FakeClusters;
use appsync_core::connector::{ClientMode, DocumentCloudConfigStore};
use appsync_core::persistence::{DocumentStore, KvStore, SqliteStore};
use appsync_core::Runtime;
use appsync_intents::{ClusterSnapshots, IntentStore, TranslatorRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use appsync_server::config::Config;
use appsync_server::inventory::KubeInventory;
use appsync_server::{AppState, router, server};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("appsync=info".parse()?),
        )
        .init();

    info!("Starting appsync");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        tls = config.tls.is_some(),
        max_retries = ?config.max_retries,
        test_client = config.test_client,
        "Configuration loaded"
    );

    if let Some(path) = config.database_url.strip_prefix("sqlite:") {
        let path = path.split('?').next().unwrap_or(path);
        if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
    }

    info!("Connecting to database...");
    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
    info!("Database ready");
    let kv: Arc<dyn KvStore> = store.clone();
    let docs: Arc<dyn DocumentStore> = store;

    let client_mode = if config.test_client {
        ClientMode::Fake(FakeClusters::new())
    } else {
        ClientMode::Kube
    };

    let runtime = Runtime::builder()
        .kv_store(kv.clone())
        .document_store(docs.clone())
        .settings(config.reconciler_settings())
        .client_mode(client_mode)
        .kubeconfig_dir(config.kubeconfig_dir.clone())
        .build()?
        .start()
        .await?;

    let resumed = runtime.restart_app_contexts().await?;
    info!(resumed, "Active AppContexts resumed");

    let intents = IntentStore::new(docs.clone());
    let inventory = Arc::new(KubeInventory::new(Arc::new(DocumentCloudConfigStore::new(docs))));
    let state = AppState {
        runtime: runtime.clone(),
        translators: TranslatorRegistry::with_defaults(kv, intents.clone()),
        snapshots: ClusterSnapshots::new(intents, inventory),
    };

    let tls = match &config.tls {
        Some(tls) => Some(server::tls_acceptor(tls).await?),
        None => None,
    };

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let app = router(state);
    let addr = config.http_addr;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::serve(addr, app, tls, server_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.cancel();
    runtime.shutdown().await?;
    let _ = server_handle.await;

    info!("Shutdown complete");
    Ok(())
}
