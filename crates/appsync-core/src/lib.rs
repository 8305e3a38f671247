// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! appsync-core - AppContext state engine and multi-cluster reconciler
//!
//! An AppContext is a tree-shaped, persisted description of a composite
//! application being rolled out across many Kubernetes clusters. This crate
//! owns the per-AppContext event queue and state machine, and the reconciler
//! that walks the tree to apply, delete, read or differentially update
//! resources on remote clusters.
//!
//! # Architecture
//!
//! ```text
//!   enqueue(event)                           ┌─────────────────────────┐
//!  ───────────────►  Dispatcher  ──spawn──►  │  worker (1 per context) │
//!                    (id → Context)          │  queue → state machine  │
//!                                            └────────────┬────────────┘
//!                                                         │ run(op)
//!                                    ┌────────────────────┼───────────────────┐
//!                                    ▼                    ▼                   ▼
//!                                 app task            app task            app task
//!                                 ├─ cluster task      ├─ cluster task
//!                                 │   resources in resOrder (serial)
//!                                 ▼
//!                          Connector → ClusterClient (kube or fake)
//! ```
//!
//! # Modules
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`client`] | Apply/Delete/Get/Approve/reachability against one cluster |
//! | [`connector`] | Per-AppContext client cache, status CR templating, cloud config |
//! | [`appcontext`] | Tree-structured store of handles, plus typed state/flag accessors |
//! | [`queue`] | Persisted per-AppContext FIFO of events |
//! | [`state_machine`] | Allowed source states and resulting states per event |
//! | [`dispatcher`] | Global `AppContextID → Context` registry |
//! | [`reconciler`] | Worker loop, update diffing and the cluster-parallel executor |
//! | [`runtime`] | Embeddable [`runtime::Runtime`] with start/shutdown |

pub mod appcontext;
pub mod client;
pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod error;
pub mod persistence;
pub mod queue;
pub mod reconciler;
pub mod runtime;
pub mod state_machine;
pub mod tasks;
pub mod types;

pub use appcontext::{AppContext, CompositeAppMeta, Handle};
pub use config::ReconcilerSettings;
pub use error::{Error, Result};
pub use runtime::{ReadyEvent, Runtime};
pub use types::{ClusterReadiness, EventStatus, OpType, ResourceStatus, RsyncEvent, StateValue};
