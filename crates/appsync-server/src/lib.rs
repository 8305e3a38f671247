// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! appsync-server - HTTP API of appsync
//!
//! | Route | RPC |
//! |-------|-----|
//! | `POST /v1/install-app` | InstallApp |
//! | `POST /v1/terminate-app` | TerminateApp |
//! | `POST /v1/update-app` | UpdateApp |
//! | `POST /v1/read-app` | ReadApp |
//! | `GET /v1/ready-notify/{app_context_id}` | ReadyNotify (Server-Sent Events) |
//! | `POST /v1/controllers/{controller}/update-app-context` | UpdateAppContext |
//! | `POST /v1/clm-controller-event` | ClmControllerEvent |

pub mod config;
pub mod handlers;
pub mod inventory;
pub mod server;

pub use config::{Config, ConfigError};
pub use handlers::{AppState, RpcReply};
pub use server::{ServerError, router, serve};
