// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for appsync-core.

use thiserror::Error;

use crate::client::ClientError;
use crate::types::{RsyncEvent, StateValue};

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A resource, definition or approval payload is not UTF-8 text.
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A handle or value is missing from the AppContext store.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A name that cannot be used as an AppContext level name.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Cluster name is not of the form `<provider>+<cluster>`.
    #[error("Not a valid cluster name: {0}")]
    InvalidClusterName(String),

    /// The event is not accepted in the current AppContext state.
    #[error("Invalid state change: event {event} is not allowed in state {state}")]
    InvalidStateChange {
        /// Event that was rejected.
        event: RsyncEvent,
        /// State the AppContext was in.
        state: StateValue,
    },

    /// The AppContext has been force-stopped.
    #[error("Stop flag set for AppContext {0}")]
    StopFlagSet(String),

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The reachability probe gave up.
    #[error("Retries exceeded max")]
    RetriesExceeded,

    /// Cluster client operation failed.
    #[error("Cluster client error: {0}")]
    Client(#[from] ClientError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the error is the result of a cancelled subtask.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True when the error came from a malformed cluster name.
    pub fn is_invalid_cluster_name(&self) -> bool {
        matches!(self, Error::InvalidClusterName(_))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Error::Cancelled
        } else {
            Error::Other(format!("task panicked: {}", err))
        }
    }
}

/// Result type using the core Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::RetriesExceeded.to_string(), "Retries exceeded max");
        assert_eq!(
            Error::InvalidClusterName("a+b+c".to_string()).to_string(),
            "Not a valid cluster name: a+b+c"
        );
        let err = Error::InvalidStateChange {
            event: RsyncEvent::Update,
            state: StateValue::Created,
        };
        assert_eq!(
            err.to_string(),
            "Invalid state change: event Update is not allowed in state Created"
        );
    }

    #[test]
    fn test_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::RetriesExceeded.is_cancelled());
    }
}
