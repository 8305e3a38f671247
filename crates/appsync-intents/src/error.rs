// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for appsync-intents.

use thiserror::Error;

/// Intent controller errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IntentError {
    /// AppContext or document store failure.
    #[error(transparent)]
    Core(#[from] appsync_core::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A resource definition is not valid YAML.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A referenced intent or resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An intent is inconsistent with the AppContext or with other intents.
    #[error("Invalid intent: {0}")]
    Invalid(String),

    /// Placement left an app or a cluster group without any cluster.
    #[error("No qualified cluster for app {app}{}", .group.as_ref().map(|g| format!(" in group {g}")).unwrap_or_default())]
    NoQualifiedCluster {
        /// App being placed.
        app: String,
        /// Cluster group that ended up empty, if the cluster was grouped.
        group: Option<String>,
    },

    /// No cluster hosts every app of a chain.
    #[error("No cluster hosts every app of chain {0}")]
    NoChainCluster(String),

    /// `UpdateAppContext` was called for a controller that is not registered.
    #[error("Unknown controller: {0}")]
    UnknownController(String),
}

/// Result type using IntentError.
pub type Result<T> = std::result::Result<T, IntentError>;
