// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! appsync-intents - intent controllers that rewrite AppContexts
//!
//! Each controller reads its intents from the document store and edits an
//! AppContext tree before the tree is handed to the reconciler.
//!
//! | Controller | Name | Effect on the AppContext |
//! |------------|------|--------------------------|
//! | [`hpa::HpaPlacement`] | `hpa` | Removes clusters that cannot host the requested replicas |
//! | [`ovn::OvnNetworking`] | `ovn` | Adds OVN interface annotations to workload pod templates |
//! | [`sfc::SfcGenerator`] | `sfc` | Adds the `network-chain-intents` app with one `NetworkChaining` CR per chain |
//! | [`sfc_client::SfcClientLabeller`] | `sfc-client` | Labels client workloads with their chain end selectors |
//!
//! [`cluster_snapshot`] keeps the per-cluster label and node snapshots the
//! placement filter reads.

pub mod cluster_snapshot;
pub mod error;
pub mod hpa;
pub mod model;
pub mod ovn;
pub mod sfc;
pub mod sfc_client;
pub mod store;
pub mod translator;
pub mod workload;

pub use cluster_snapshot::{ClmEvent, ClusterInventory, ClusterSnapshots, StaticInventory};
pub use error::{IntentError, Result};
pub use store::{IntentKind, IntentScope, IntentStore};
pub use translator::{Translator, TranslatorRegistry};
