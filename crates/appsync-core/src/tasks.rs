// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cancellable task groups.
//!
//! A [`TaskGroup`] runs a set of tasks under a child cancellation token.
//! The first failing task cancels the token, which every sibling (and every
//! nested group created from that token) observes. [`TaskGroup::wait`]
//! returns only after all tasks have finished.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Tree node of cancellable tasks collecting the first error.
pub struct TaskGroup {
    tasks: JoinSet<Result<()>>,
    token: CancellationToken,
}

impl TaskGroup {
    /// Create a group whose token is a child of `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            token: parent.child_token(),
        }
    }

    /// Token shared by the tasks of this group.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Number of tasks not yet joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no task has been spawned or all have been joined.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn a task into the group.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Wait for every task and return the first error.
    ///
    /// A cancellation reported before a real failure is replaced by that failure.
    pub async fn wait(mut self) -> Result<()> {
        let mut first: Option<Error> = None;
        while let Some(joined) = self.tasks.join_next().await {
            let result = joined.map_err(Error::from).and_then(|r| r);
            let Err(err) = result else { continue };

            self.token.cancel();
            let replace = match &first {
                None => true,
                Some(existing) => existing.is_cancelled() && !err.is_cancelled(),
            };
            if replace {
                first = Some(err);
            } else {
                debug!(error = %err, "Suppressed error from sibling task");
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
