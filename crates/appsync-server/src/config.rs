// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use appsync_core::ReconcilerSettings;

/// PEM files of the server certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// appsync server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL backing both stores
    pub database_url: String,
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Serve HTTPS when set
    pub tls: Option<TlsConfig>,
    /// Reachability polls before giving up on a cluster. `None` is unlimited.
    pub max_retries: Option<u32>,
    /// Reachability poll period
    pub wait_time: Duration,
    /// Root directory for materialized kubeconfigs
    pub kubeconfig_dir: PathBuf,
    /// Use simulated clusters instead of real ones
    pub test_client: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `APPSYNC_DATABASE_URL`: SQLite URL (default: `sqlite:.data/appsync.db?mode=rwc`)
    /// - `APPSYNC_HTTP_PORT`: HTTP port (default: 9031)
    /// - `GRPC_ENABLE_TLS`: `enable` turns on TLS, which then requires
    ///   `GRPC_SERVER_CERT` and `GRPC_SERVER_KEY`
    /// - `MAX_RETRIES`: reachability polls; missing, invalid or negative is unlimited
    /// - `APPSYNC_WAIT_TIME_SECS`: reachability poll period (default: 2)
    /// - `APPSYNC_KUBECONFIG_DIR`: kubeconfig root (default: `/tmp/rsync`)
    /// - `APPSYNC_TEST_CLIENT`: `true` selects simulated clusters (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("APPSYNC_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:.data/appsync.db?mode=rwc".to_string());

        let http_port: u16 = std::env::var("APPSYNC_HTTP_PORT")
            .unwrap_or_else(|_| "9031".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("APPSYNC_HTTP_PORT", "must be a valid port number"))?;

        let tls = match std::env::var("GRPC_ENABLE_TLS").ok().as_deref() {
            Some("enable") => {
                let cert_path = std::env::var("GRPC_SERVER_CERT")
                    .map_err(|_| ConfigError::Missing("GRPC_SERVER_CERT"))?;
                let key_path = std::env::var("GRPC_SERVER_KEY")
                    .map_err(|_| ConfigError::Missing("GRPC_SERVER_KEY"))?;
                Some(TlsConfig {
                    cert_path: cert_path.into(),
                    key_path: key_path.into(),
                })
            }
            _ => None,
        };

        let max_retries =
            ReconcilerSettings::parse_max_retries(std::env::var("MAX_RETRIES").ok().as_deref());

        let wait_secs: u64 = std::env::var("APPSYNC_WAIT_TIME_SECS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("APPSYNC_WAIT_TIME_SECS", "must be a non-negative integer")
            })?;

        let kubeconfig_dir = std::env::var("APPSYNC_KUBECONFIG_DIR")
            .unwrap_or_else(|_| "/tmp/rsync".to_string())
            .into();

        let test_client = match std::env::var("APPSYNC_TEST_CLIENT") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid("APPSYNC_TEST_CLIENT", "must be true or false"))?,
            Err(_) => false,
        };

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            tls,
            max_retries,
            wait_time: Duration::from_secs(wait_secs),
            kubeconfig_dir,
            test_client,
        })
    }

    /// Reconciler settings derived from this configuration.
    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings::default()
            .with_max_retries(self.max_retries)
            .with_wait_time(self.wait_time)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
