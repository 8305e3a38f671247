// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciler settings.

use std::time::Duration;

/// Tunables for the per-AppContext worker and the cluster executor.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Reachability polls before a cluster is given up on. `None` retries forever.
    pub max_retries: Option<u32>,
    /// Period between reachability polls.
    pub wait_time: Duration,
    /// Period between StopFlag checks while an event is in flight.
    pub stop_poll_interval: Duration,
    /// Delay applied before the synthetic `network-chain-intents` app is applied.
    pub dependency_delay: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            max_retries: None,
            wait_time: Duration::from_secs(2),
            stop_poll_interval: Duration::from_secs(1),
            dependency_delay: Duration::from_secs(100),
        }
    }
}

impl ReconcilerSettings {
    /// Interpret a `MAX_RETRIES` value.
    ///
    /// Missing, unparsable and negative values all mean unlimited retries.
    pub fn parse_max_retries(raw: Option<&str>) -> Option<u32> {
        let value: i64 = raw?.trim().parse().ok()?;
        if value < 0 {
            return None;
        }
        u32::try_from(value).ok()
    }

    /// Set the maximum number of reachability polls.
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the reachability poll period.
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Set the StopFlag poll period.
    pub fn with_stop_poll_interval(mut self, interval: Duration) -> Self {
        self.stop_poll_interval = interval;
        self
    }

    /// Set the delay used for the `network-chain-intents` app.
    pub fn with_dependency_delay(mut self, delay: Duration) -> Self {
        self.dependency_delay = delay;
        self
    }
}
