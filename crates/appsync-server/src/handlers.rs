// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request handlers for the rollout, controller and readiness endpoints.
//!
//! Every RPC answers `200 OK` with an [`RpcReply`]; failures are reported
//! through `ok: false` and a message, never through the HTTP status.

use std::convert::Infallible;
use std::fmt::Display;

use appsync_core::Runtime;
use appsync_intents::{ClmEvent, ClusterSnapshots, TranslatorRegistry};
use axum::Json;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Runtime,
    pub translators: TranslatorRegistry,
    pub snapshots: ClusterSnapshots,
}

/// Reply of every unary RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcReply {
    pub ok: bool,
    pub message: String,
}

impl RpcReply {
    fn from_result<E: Display>(rpc: &str, id: &str, result: Result<(), E>) -> Json<Self> {
        let reply = match result {
            Ok(()) => Self {
                ok: true,
                message: format!("{rpc} accepted for AppContext {id}"),
            },
            Err(e) => {
                warn!(rpc, app_context_id = %id, error = %e, "Request rejected");
                Self {
                    ok: false,
                    message: e.to_string(),
                }
            }
        };
        Json(reply)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppContextRequest {
    pub app_context_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppRequest {
    pub app_context_id: String,
    pub update_app_context_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppContextRequest {
    pub intent_name: String,
    pub app_context_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ClmControllerEventRequest {
    pub provider: String,
    pub cluster: String,
    pub event: ClmEvent,
}

pub async fn install_app(
    State(state): State<AppState>,
    Json(req): Json<AppContextRequest>,
) -> Json<RpcReply> {
    let result = state.runtime.instantiate(&req.app_context_id).await;
    RpcReply::from_result("InstallApp", &req.app_context_id, result)
}

pub async fn terminate_app(
    State(state): State<AppState>,
    Json(req): Json<AppContextRequest>,
) -> Json<RpcReply> {
    let result = state.runtime.terminate(&req.app_context_id).await;
    RpcReply::from_result("TerminateApp", &req.app_context_id, result)
}

pub async fn update_app(
    State(state): State<AppState>,
    Json(req): Json<UpdateAppRequest>,
) -> Json<RpcReply> {
    let result = state
        .runtime
        .update(&req.app_context_id, &req.update_app_context_id)
        .await;
    RpcReply::from_result("UpdateApp", &req.app_context_id, result)
}

pub async fn read_app(
    State(state): State<AppState>,
    Json(req): Json<AppContextRequest>,
) -> Json<RpcReply> {
    let result = state.runtime.read(&req.app_context_id).await;
    RpcReply::from_result("ReadApp", &req.app_context_id, result)
}

pub async fn update_app_context(
    State(state): State<AppState>,
    Path(controller): Path<String>,
    Json(req): Json<UpdateAppContextRequest>,
) -> Json<RpcReply> {
    let result = state
        .translators
        .update_app_context(&controller, &req.intent_name, &req.app_context_id)
        .await;
    RpcReply::from_result("UpdateAppContext", &req.app_context_id, result)
}

pub async fn clm_controller_event(
    State(state): State<AppState>,
    Json(req): Json<ClmControllerEventRequest>,
) -> Json<RpcReply> {
    let cluster = format!("{}+{}", req.provider, req.cluster);
    let result = state
        .snapshots
        .handle_event(&req.provider, &req.cluster, req.event)
        .await;
    let reply = match result {
        Ok(()) => RpcReply {
            ok: true,
            message: format!("{} handled for cluster {cluster}", req.event),
        },
        Err(e) => {
            warn!(cluster = %cluster, event = %req.event, error = %e, "Cluster event failed");
            RpcReply {
                ok: false,
                message: e.to_string(),
            }
        }
    };
    Json(reply)
}

/// Stream of readiness events of one AppContext.
pub async fn ready_notify(
    State(state): State<AppState>,
    Path(app_context_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.runtime.subscribe();
    info!(app_context_id = %app_context_id, "ReadyNotify subscriber attached");

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(ready) if ready.app_context_id == app_context_id => {
                    match Event::default().event("ready").json_data(&ready) {
                        Ok(event) => yield Ok(event),
                        Err(e) => warn!(error = %e, "Failed to encode ready event"),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(app_context_id = %app_context_id, skipped, "ReadyNotify subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn health() -> Json<RpcReply> {
    Json(RpcReply {
        ok: true,
        message: "healthy".to_string(),
    })
}
