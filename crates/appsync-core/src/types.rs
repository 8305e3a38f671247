// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared enums for AppContext states, events and statuses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an AppContext.
///
/// Used for `CurrentState`, `DesiredState` and `Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateValue {
    /// Created by the orchestrator, never processed.
    Created,
    /// Apply in progress.
    Instantiating,
    /// All resources applied.
    Instantiated,
    /// Apply failed.
    InstantiateFailed,
    /// Update (delete phase) in progress.
    Updating,
    /// Update delete phase done.
    Updated,
    /// Update delete phase failed.
    UpdateFailed,
    /// Delete in progress.
    Terminating,
    /// All resources deleted.
    Terminated,
    /// Delete failed.
    TerminateFailed,
}

impl StateValue {
    /// String form used in storage and replies.
    pub fn as_str(&self) -> &'static str {
        match self {
            StateValue::Created => "Created",
            StateValue::Instantiating => "Instantiating",
            StateValue::Instantiated => "Instantiated",
            StateValue::InstantiateFailed => "InstantiateFailed",
            StateValue::Updating => "Updating",
            StateValue::Updated => "Updated",
            StateValue::UpdateFailed => "UpdateFailed",
            StateValue::Terminating => "Terminating",
            StateValue::Terminated => "Terminated",
            StateValue::TerminateFailed => "TerminateFailed",
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events accepted by the per-AppContext queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RsyncEvent {
    /// Apply every resource.
    Instantiate,
    /// Delete every resource.
    Terminate,
    /// Read back every resource.
    Read,
    /// Delete the resources dropped by a newer generation.
    Update,
    /// Apply the resources changed or added by a newer generation (internal).
    UpdateModify,
    /// Reserved.
    AddChildContext,
}

impl RsyncEvent {
    /// String form used in storage and replies.
    pub fn as_str(&self) -> &'static str {
        match self {
            RsyncEvent::Instantiate => "Instantiate",
            RsyncEvent::Terminate => "Terminate",
            RsyncEvent::Read => "Read",
            RsyncEvent::Update => "Update",
            RsyncEvent::UpdateModify => "UpdateModify",
            RsyncEvent::AddChildContext => "AddChildContext",
        }
    }
}

impl fmt::Display for RsyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an element of the event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    /// Waiting to be processed.
    Pending,
    /// Processed successfully.
    Done,
    /// Processed with an error.
    Error,
    /// Not processed (rejected by the state machine or a pending terminate).
    Skip,
}

impl EventStatus {
    /// True for every status except `Pending`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Pending)
    }
}

/// Reachability of a cluster as last observed by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterReadiness {
    /// The API server answered.
    Available,
    /// The reconciler is polling the cluster.
    Retrying,
    /// Never probed.
    Unknown,
}

/// Outcome recorded for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    /// Applied (or read back) successfully.
    Applied,
    /// Deleted successfully.
    Deleted,
    /// The last operation on the resource failed.
    Failed,
}

/// Operation the reconciler performs on every resource of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    /// Apply resources.
    Apply,
    /// Delete resources.
    Delete,
    /// Read resources back from the cluster.
    Read,
}

impl OpType {
    /// Apply aborts a cluster on the first non-reachability error;
    /// delete and read keep going.
    pub fn break_on_error(&self) -> bool {
        matches!(self, OpType::Apply)
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpType::Apply => "apply",
            OpType::Delete => "delete",
            OpType::Read => "read",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_value_serde_uses_variant_names() {
        let json = serde_json::to_string(&StateValue::InstantiateFailed).unwrap();
        assert_eq!(json, "\"InstantiateFailed\"");
        let back: StateValue = serde_json::from_str("\"Terminated\"").unwrap();
        assert_eq!(back, StateValue::Terminated);
    }

    #[test]
    fn test_event_status_terminal() {
        assert!(!EventStatus::Pending.is_terminal());
        assert!(EventStatus::Done.is_terminal());
        assert!(EventStatus::Error.is_terminal());
        assert!(EventStatus::Skip.is_terminal());
    }

    #[test]
    fn test_break_on_error_only_for_apply() {
        assert!(OpType::Apply.break_on_error());
        assert!(!OpType::Delete.break_on_error());
        assert!(!OpType::Read.break_on_error());
    }
}
