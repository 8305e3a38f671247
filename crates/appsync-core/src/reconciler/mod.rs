// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-AppContext worker.
//!
//! The worker drains the AppContext's event queue one element at a time:
//! flag pre-checks, state machine validation, update diffing, then the
//! cluster-parallel [`executor`]. Every terminal queue transition is
//! published as a [`ReadyEvent`].

pub mod executor;
pub mod projection;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use self::executor::EventRun;
use self::projection::AppTree;
use crate::appcontext::{self, AppContext};
use crate::connector::{ClusterConnector, LogicalCloud};
use crate::dispatcher::{self, Context, ContextState};
use crate::error::{Error, Result};
use crate::queue::{EventQueue, QueueElement};
use crate::runtime::{ReadyEvent, Runtime};
use crate::state_machine::{self, PreCheck};
use crate::types::{EventStatus, OpType, RsyncEvent, StateValue};

enum Step {
    Continue,
    Exit,
}

/// Worker task of one AppContext. Spawned by the dispatcher.
pub(crate) async fn run_worker(rt: Runtime, ctx: Arc<Context>) {
    info!(app_context_id = %ctx.id(), "Worker started");
    loop {
        match worker_step(&rt, &ctx).await {
            Ok(Step::Continue) => {}
            Ok(Step::Exit) => break,
            Err(e) => {
                // The queue itself is unreadable: give up on this worker but
                // keep the AppContext registered as active for a restart.
                error!(app_context_id = %ctx.id(), error = %e, "Worker failed");
                release(&ctx).await;
                break;
            }
        }
    }
    info!(app_context_id = %ctx.id(), "Worker exited");
}

/// Mark the Context idle while keeping the AppContext in the active set.
async fn release(ctx: &Context) {
    let mut state = ctx.state.lock().await;
    state.running = false;
    state.current_event = None;
    drop(state);
    ctx.set_idle(true);
}

/// Remove the AppContext from the active set and stop the worker.
///
/// The caller holds the per-Context lock, so no enqueue can slip in between
/// the last queue read and the worker going away.
async fn retire(rt: &Runtime, ctx: &Context, state: &mut ContextState) -> Result<()> {
    appcontext::delete_active(rt.store().as_ref(), ctx.id()).await?;
    state.running = false;
    state.current_event = None;
    if let Some(connector) = state.connector.take() {
        connector.close().await;
    }
    ctx.set_idle(true);
    Ok(())
}

async fn worker_step(rt: &Runtime, ctx: &Arc<Context>) -> Result<Step> {
    if rt.is_shutting_down() {
        release(ctx).await;
        return Ok(Step::Exit);
    }
    let ac = AppContext::load(rt.store().clone(), ctx.id()).await?;

    let (index, element, token, connector) = {
        let mut state = ctx.state.lock().await;
        let Some((index, element)) = EventQueue::new(&ac).find_first_pending().await? else {
            retire(rt, ctx, &mut state).await?;
            debug!(app_context_id = %ctx.id(), "Queue drained");
            return Ok(Step::Exit);
        };
        let token = rt.shutdown_token().child_token();
        state.cancel = token.clone();
        state.current_event = Some(element.event);
        let connector = match &state.connector {
            Some(connector) => Arc::clone(connector),
            None => {
                let connector = rt.connector(ctx.id());
                state.connector = Some(Arc::clone(&connector));
                connector
            }
        };
        (index, element, token, connector)
    };

    match state_machine::pre_check(ac.get_flags().await?, element.event) {
        PreCheck::Stop => {
            refuse_all(rt, ctx, &ac, element.event).await?;
            return Ok(Step::Exit);
        }
        PreCheck::Skip => {
            info!(app_context_id = %ctx.id(), event = %element.event, "Terminate pending; skipping event");
            EventQueue::new(&ac)
                .update_status(index, EventStatus::Skip)
                .await?;
            publish(rt, &ac, element.event, EventStatus::Skip).await;
            return Ok(Step::Continue);
        }
        PreCheck::Proceed => {}
    }

    let outcome = process_element(rt, ctx, &ac, index, &element, token, connector).await;
    match outcome {
        Ok(step) => Ok(step),
        Err(e) => {
            // Store faults are fatal to the event only.
            warn!(app_context_id = %ctx.id(), event = %element.event, error = %e, "Store fault while processing event");
            fail_event(&ac, index, element.event).await?;
            publish(rt, &ac, element.event, EventStatus::Error).await;
            Ok(Step::Continue)
        }
    }
}

/// StopFlag is set: every pending element fails and the worker stops.
async fn refuse_all(rt: &Runtime, ctx: &Arc<Context>, ac: &AppContext, first: RsyncEvent) -> Result<()> {
    let mut state = ctx.state.lock().await;
    let pending: Vec<QueueElement> = EventQueue::new(ac)
        .elements()
        .await?
        .into_iter()
        .filter(|e| e.status == EventStatus::Pending)
        .collect();
    EventQueue::new(ac)
        .mark_all_pending(EventStatus::Error)
        .await?;
    warn!(
        app_context_id = %ctx.id(),
        refused = pending.len(),
        "{}",
        Error::StopFlagSet(ctx.id().to_string())
    );
    if let Some(error_state) = state_machine::error_state(first) {
        ac.set_status(error_state).await?;
        ac.set_current_state(error_state).await?;
    }
    retire(rt, ctx, &mut state).await?;
    drop(state);
    for element in pending {
        publish(rt, ac, element.event, EventStatus::Error).await;
    }
    Ok(())
}

async fn fail_event(ac: &AppContext, index: usize, event: RsyncEvent) -> Result<()> {
    EventQueue::new(ac)
        .update_status(index, EventStatus::Error)
        .await?;
    if let Some(state) = state_machine::error_state(event) {
        ac.set_status(state).await?;
        ac.set_current_state(state).await?;
    }
    Ok(())
}

async fn publish(rt: &Runtime, ac: &AppContext, event: RsyncEvent, status: EventStatus) {
    let state = ac.get_status().await.unwrap_or(StateValue::Created);
    rt.publish(ReadyEvent {
        app_context_id: ac.id().to_string(),
        event,
        status,
        state,
    });
}

#[instrument(skip_all, fields(app_context_id = %ctx.id(), event = %element.event))]
async fn process_element(
    rt: &Runtime,
    ctx: &Arc<Context>,
    ac: &AppContext,
    index: usize,
    element: &QueueElement,
    token: CancellationToken,
    connector: Arc<dyn ClusterConnector>,
) -> Result<Step> {
    let event = element.event;
    let current = ac.get_current_state().await?;
    if event == RsyncEvent::Terminate
        && current == StateValue::Created
        && only_skipped_before(ac, index).await?
    {
        // The events this Terminate superseded never reached a cluster.
        EventQueue::new(ac)
            .update_status(index, EventStatus::Done)
            .await?;
        ac.set_current_state(StateValue::Terminated).await?;
        ac.set_desired_state(StateValue::Terminated).await?;
        ac.set_status(StateValue::Terminated).await?;
        ac.set_pending_terminate_flag(false).await?;
        info!("Nothing was deployed; Terminate completed without cluster operations");
        publish(rt, ac, event, EventStatus::Done).await;
        return Ok(Step::Continue);
    }
    let change = match state_machine::check(event, current) {
        Ok(change) => change,
        Err(e) => {
            warn!(error = %e, "Event rejected");
            EventQueue::new(ac)
                .update_status(index, EventStatus::Skip)
                .await?;
            if let Some(state) = state_machine::error_state(event) {
                ac.set_status(state).await?;
                ac.set_current_state(state).await?;
            }
            if event == RsyncEvent::Terminate {
                ac.set_pending_terminate_flag(false).await?;
            }
            publish(rt, ac, event, EventStatus::Skip).await;
            return Ok(Step::Continue);
        }
    };

    let previous_status = ac.get_status().await?;
    ac.set_current_state(change.current).await?;
    ac.set_desired_state(change.desired).await?;
    ac.set_status(change.current).await?;
    info!(from = %current, to = %change.current, "Processing event");

    let poller = spawn_stop_poller(rt, ac.clone(), token.clone());
    let result = process_event(rt, ac, element, &token, connector).await;
    poller.abort();

    if result.as_ref().is_err_and(Error::is_cancelled) && rt.is_shutting_down() {
        // Leave the element pending so a restart picks it up again.
        ac.set_current_state(current).await?;
        ac.set_status(previous_status).await?;
        info!("Interrupted by shutdown; event left pending");
        release(ctx).await;
        return Ok(Step::Exit);
    }

    let status = match &result {
        Ok(()) => {
            ac.set_current_state(change.desired).await?;
            ac.set_status(change.desired).await?;
            info!(state = %change.desired, "Event done");
            EventStatus::Done
        }
        Err(e) => {
            ac.set_current_state(change.error).await?;
            ac.set_status(change.error).await?;
            if e.is_cancelled() {
                info!(state = %change.error, "Event cancelled");
            } else {
                warn!(state = %change.error, error = %e, "Event failed");
            }
            EventStatus::Error
        }
    };
    EventQueue::new(ac).update_status(index, status).await?;
    if event == RsyncEvent::Terminate {
        ac.set_pending_terminate_flag(false).await?;
    }
    publish(rt, ac, event, status).await;
    Ok(Step::Continue)
}

/// True when at least one element precedes `index` and every one of them was skipped.
async fn only_skipped_before(ac: &AppContext, index: usize) -> Result<bool> {
    let elements = EventQueue::new(ac).elements().await?;
    let earlier = &elements[..index.min(elements.len())];
    Ok(!earlier.is_empty() && earlier.iter().all(|e| e.status == EventStatus::Skip))
}

/// Cancel `token` once the StopFlag of `ac` is observed.
fn spawn_stop_poller(
    rt: &Runtime,
    ac: AppContext,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let interval = rt.settings().stop_poll_interval;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            match ac.get_stop_flag().await {
                Ok(true) => {
                    info!(app_context_id = %ac.id(), "StopFlag set; cancelling event");
                    token.cancel();
                    return;
                }
                Ok(false) => {}
                Err(e) => debug!(app_context_id = %ac.id(), error = %e, "StopFlag poll failed"),
            }
        }
    })
}

/// AppContext receiving status writes for `ac`.
///
/// Falls back to `ac` itself when the status AppContext cannot be loaded.
async fn resolve_status_context(rt: &Runtime, ac: &AppContext) -> Result<AppContext> {
    let Some(id) = ac.get_status_app_context_id().await? else {
        return Ok(ac.clone());
    };
    match AppContext::load(rt.store().clone(), &id).await {
        Ok(status_ac) => Ok(status_ac),
        Err(e) => {
            warn!(
                app_context_id = %ac.id(),
                status_app_context_id = %id,
                error = %e,
                "Status AppContext unavailable; writing status to the primary AppContext"
            );
            Ok(ac.clone())
        }
    }
}

fn update_target(element: &QueueElement) -> Result<&str> {
    element.update_context_id.as_deref().ok_or_else(|| {
        Error::Other(format!("{} event without an update AppContext id", element.event))
    })
}

async fn process_event(
    rt: &Runtime,
    ac: &AppContext,
    element: &QueueElement,
    token: &CancellationToken,
    connector: Arc<dyn ClusterConnector>,
) -> Result<()> {
    let mut tree = AppTree::load(ac).await?;
    let op = match element.event {
        RsyncEvent::Instantiate => OpType::Apply,
        RsyncEvent::Terminate => OpType::Delete,
        RsyncEvent::Read => OpType::Read,
        RsyncEvent::Update => {
            let target = update_target(element)?;
            let new_ac = AppContext::load(rt.store().clone(), target).await?;
            tree.mark_delete_phase(&AppTree::load(&new_ac).await?);
            dispatcher::handle_app_context(
                rt.clone(),
                target.to_string(),
                Some(ac.id().to_string()),
                RsyncEvent::UpdateModify,
                connector.for_app_context(target),
            )
            .await?;
            OpType::Delete
        }
        RsyncEvent::UpdateModify => {
            let source = update_target(element)?;
            let old_ac = AppContext::load(rt.store().clone(), source).await?;
            let old_tree = AppTree::load(&old_ac).await?;
            tree.mark_modify_phase(ac, &old_tree, &old_ac).await?;
            OpType::Apply
        }
        RsyncEvent::AddChildContext => {
            return Err(Error::Other("AddChildContext is not supported".to_string()));
        }
    };

    let status_ac = resolve_status_context(rt, ac).await?;
    let cloud = LogicalCloud::of(ac).await?;
    debug!(op = %op, resources = tree.active_resources(), "Executing");

    let run = Arc::new(EventRun {
        ac: ac.clone(),
        status_ac,
        connector,
        settings: rt.settings().clone(),
        op,
        event: element.event,
        cloud,
    });
    run.execute(tree, token).await
}
