// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP(S) listener and routes.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::TlsConfig;
use crate::handlers::{self, AppState};

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}

/// All routes of the API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/install-app", post(handlers::install_app))
        .route("/v1/terminate-app", post(handlers::terminate_app))
        .route("/v1/update-app", post(handlers::update_app))
        .route("/v1/read-app", post(handlers::read_app))
        .route("/v1/ready-notify/{app_context_id}", get(handlers::ready_notify))
        .route(
            "/v1/controllers/{controller}/update-app-context",
            post(handlers::update_app_context),
        )
        .route("/v1/clm-controller-event", post(handlers::clm_controller_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build a TLS acceptor from PEM files.
pub async fn tls_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let cert_pem = read_pem(&tls.cert_path).await?;
    let key_pem = read_pem(&tls.key_path).await?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("failed to parse certificates: {}", e)))?;

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| ServerError::Tls(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| ServerError::Tls("no private key found".to_string()))?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ServerError::Tls(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| ServerError::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, ServerError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| ServerError::Tls(format!("failed to read {}: {}", path.display(), e)))
}

/// Serve `app` on `addr` until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    tls: Option<TlsAcceptor>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, tls = tls.is_some(), "HTTP server listening");

    match tls {
        None => {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await?;
        }
        Some(acceptor) => serve_tls(listener, app, acceptor, shutdown).await?,
    }
    info!("HTTP server stopped");
    Ok(())
}

async fn serve_tls(
    listener: TcpListener,
    app: Router,
    acceptor: TlsAcceptor,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            };
            let conn = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(tls_stream), service);
            tokio::pin!(conn);
            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        error!(peer = %peer, error = %e, "Connection error");
                    }
                }
                _ = shutdown.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    let _ = conn.await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tls_acceptor_missing_files() {
        let tls = TlsConfig {
            cert_path: "/nonexistent/server.crt".into(),
            key_path: "/nonexistent/server.key".into(),
        };
        let err = tls_acceptor(&tls).await.err().unwrap();
        assert!(matches!(err, ServerError::Tls(ref m) if m.contains("server.crt")));
    }

    #[tokio::test]
    async fn test_tls_acceptor_without_private_key() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");
        std::fs::write(&cert_path, "").unwrap();
        std::fs::write(&key_path, "not a pem file\n").unwrap();

        let err = tls_acceptor(&TlsConfig { cert_path, key_path })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Tls(ref m) if m == "no private key found"));
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let shutdown = CancellationToken::new();
        let app = Router::new().route("/health", get(|| async { "ok" }));
        let handle = tokio::spawn(serve(
            "127.0.0.1:0".parse().unwrap(),
            app,
            None,
            shutdown.clone(),
        ));
        shutdown.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
