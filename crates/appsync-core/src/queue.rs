// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted per-AppContext event queue.
//!
//! The queue is stored as one document inside the AppContext. Callers must
//! serialize access through the per-Context lock held by the dispatcher;
//! every operation is a load-modify-save.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::appcontext::AppContext;
use crate::error::{Error, Result};
use crate::types::{EventStatus, RsyncEvent};

/// One queued event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueElement {
    pub event: RsyncEvent,
    pub status: EventStatus,
    /// Other generation of the AppContext for `Update` / `UpdateModify`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_context_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub enqueued_at: DateTime<Utc>,
    /// Time of the last status change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl QueueElement {
    /// A new pending element.
    pub fn pending(event: RsyncEvent, update_context_id: Option<String>) -> Self {
        Self {
            event,
            status: EventStatus::Pending,
            update_context_id,
            enqueued_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredQueue {
    #[serde(rename = "AppContextQueue", default)]
    elements: Vec<QueueElement>,
}

/// View of the event queue of one AppContext.
pub struct EventQueue<'a> {
    ac: &'a AppContext,
}

impl<'a> EventQueue<'a> {
    pub fn new(ac: &'a AppContext) -> Self {
        Self { ac }
    }

    async fn load(&self) -> Result<StoredQueue> {
        Ok(self.ac.get_queue_value().await?.unwrap_or_default())
    }

    /// Every element, oldest first.
    pub async fn elements(&self) -> Result<Vec<QueueElement>> {
        Ok(self.load().await?.elements)
    }

    /// Append an element. Returns its index.
    pub async fn enqueue(&self, element: QueueElement) -> Result<usize> {
        let mut queue = self.load().await?;
        queue.elements.push(element);
        self.ac.put_queue_value(&queue).await?;
        Ok(queue.elements.len() - 1)
    }

    /// Oldest pending element, if any.
    pub async fn find_first_pending(&self) -> Result<Option<(usize, QueueElement)>> {
        let queue = self.load().await?;
        Ok(queue
            .elements
            .into_iter()
            .enumerate()
            .find(|(_, e)| e.status == EventStatus::Pending))
    }

    /// True when at least one element is pending.
    pub async fn has_pending(&self) -> Result<bool> {
        Ok(self.find_first_pending().await?.is_some())
    }

    /// Transition the element at `index`.
    pub async fn update_status(&self, index: usize, status: EventStatus) -> Result<()> {
        let mut queue = self.load().await?;
        let element = queue.elements.get_mut(index).ok_or_else(|| {
            Error::NotFound(format!(
                "queue element {} of AppContext {}",
                index,
                self.ac.id()
            ))
        })?;
        element.status = status;
        element.finished_at = Some(Utc::now());
        self.ac.put_queue_value(&queue).await
    }

    /// Mark every pending element with `status`. Returns how many changed.
    pub async fn mark_all_pending(&self, status: EventStatus) -> Result<usize> {
        let mut queue = self.load().await?;
        let mut changed = 0;
        for element in queue
            .elements
            .iter_mut()
            .filter(|e| e.status == EventStatus::Pending)
        {
            element.status = status;
            element.finished_at = Some(Utc::now());
            changed += 1;
        }
        if changed > 0 {
            self.ac.put_queue_value(&queue).await?;
        }
        Ok(changed)
    }
}
