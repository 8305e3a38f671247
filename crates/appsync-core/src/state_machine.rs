// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Event validation against the AppContext state.

use crate::appcontext::utils::AppContextFlags;
use crate::error::{Error, Result};
use crate::types::{RsyncEvent, StateValue};

use StateValue::*;

/// States an accepted event moves the AppContext through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State while the event is in flight.
    pub current: StateValue,
    /// State on success.
    pub desired: StateValue,
    /// State on failure.
    pub error: StateValue,
}

struct Transition {
    sources: &'static [StateValue],
    change: StateChange,
}

fn transition(event: RsyncEvent) -> Option<Transition> {
    let t = match event {
        RsyncEvent::Instantiate | RsyncEvent::Read => Transition {
            sources: &[Created, Instantiated, InstantiateFailed, Instantiating],
            change: StateChange {
                current: Instantiating,
                desired: Instantiated,
                error: InstantiateFailed,
            },
        },
        RsyncEvent::Terminate => Transition {
            sources: &[
                InstantiateFailed,
                Instantiating,
                Instantiated,
                TerminateFailed,
                Terminating,
            ],
            change: StateChange {
                current: Terminating,
                desired: Terminated,
                error: TerminateFailed,
            },
        },
        RsyncEvent::Update => Transition {
            sources: &[Instantiated],
            change: StateChange {
                current: Updating,
                desired: Updated,
                error: UpdateFailed,
            },
        },
        RsyncEvent::UpdateModify => Transition {
            sources: &[Created, Updated],
            change: StateChange {
                current: Instantiating,
                desired: Instantiated,
                error: InstantiateFailed,
            },
        },
        RsyncEvent::AddChildContext => return None,
    };
    Some(t)
}

/// Failure state recorded when `event` is rejected or fails.
///
/// `None` for events without a transition (`AddChildContext`).
pub fn error_state(event: RsyncEvent) -> Option<StateValue> {
    transition(event).map(|t| t.change.error)
}

/// Validate `event` against the current state.
pub fn check(event: RsyncEvent, current: StateValue) -> Result<StateChange> {
    match transition(event) {
        Some(t) if t.sources.contains(&current) => Ok(t.change),
        _ => Err(Error::InvalidStateChange {
            event,
            state: current,
        }),
    }
}

/// Outcome of the flag checks made before an event is dequeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreCheck {
    /// Process the event.
    Proceed,
    /// StopFlag is set: refuse every event and stop the worker.
    Stop,
    /// A Terminate is queued: skip this event without a state change.
    Skip,
}

/// Flag checks made before the state machine is consulted.
pub fn pre_check(flags: AppContextFlags, event: RsyncEvent) -> PreCheck {
    if flags.stop {
        PreCheck::Stop
    } else if flags.pending_terminate && event != RsyncEvent::Terminate {
        PreCheck::Skip
    } else {
        PreCheck::Proceed
    }
}
