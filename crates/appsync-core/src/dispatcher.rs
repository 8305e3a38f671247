// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Context dispatcher.
//!
//! Keeps the process-wide map `AppContextID → Context` and guarantees that at
//! most one worker exists per AppContext. Lock order is always: dispatcher
//! map, then the per-Context lock, then the connector's client cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::appcontext::{self, AppContext};
use crate::connector::ClusterConnector;
use crate::error::Result;
use crate::queue::{EventQueue, QueueElement};
use crate::reconciler;
use crate::runtime::Runtime;
use crate::types::RsyncEvent;

/// Mutable state of a Context, guarded by the per-Context lock.
pub(crate) struct ContextState {
    /// A worker task is alive for this AppContext.
    pub running: bool,
    /// Token of the event currently in flight.
    pub cancel: CancellationToken,
    /// Event currently in flight.
    pub current_event: Option<RsyncEvent>,
    /// Connector used by the worker.
    pub connector: Option<Arc<dyn ClusterConnector>>,
    /// Handle of the most recent worker task.
    pub worker: Option<JoinHandle<()>>,
}

/// Per-AppContext dispatch state.
pub struct Context {
    id: String,
    pub(crate) state: tokio::sync::Mutex<ContextState>,
    idle: watch::Sender<bool>,
}

impl Context {
    fn new(id: &str) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            id: id.to_string(),
            state: tokio::sync::Mutex::new(ContextState {
                running: false,
                cancel: CancellationToken::new(),
                current_event: None,
                connector: None,
                worker: None,
            }),
            idle,
        }
    }

    /// The AppContext id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True while a worker is alive.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    pub(crate) fn set_idle(&self, idle: bool) {
        self.idle.send_replace(idle);
    }

    /// Wait until no worker is alive for this AppContext.
    pub async fn wait_idle(&self) {
        let mut rx = self.idle.subscribe();
        // The sender lives as long as the Context, so this only fails if it is dropped.
        let _ = rx.wait_for(|idle| *idle).await;
    }
}

/// Process-wide registry of Contexts.
#[derive(Default)]
pub struct Dispatcher {
    contexts: Mutex<HashMap<String, Arc<Context>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Context>>> {
        self.contexts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Context of an AppContext, created on first use.
    pub fn get_or_create(&self, id: &str) -> Arc<Context> {
        Arc::clone(
            self.lock()
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Context::new(id))),
        )
    }

    /// Context of an AppContext if one was created.
    pub fn get(&self, id: &str) -> Option<Arc<Context>> {
        self.lock().get(id).cloned()
    }

    /// Every known Context.
    pub fn all(&self) -> Vec<Arc<Context>> {
        self.lock().values().cloned().collect()
    }
}

/// Start a worker for `ctx`. The caller holds the per-Context lock.
fn start_worker(
    rt: &Runtime,
    ctx: &Arc<Context>,
    state: &mut ContextState,
    connector: Arc<dyn ClusterConnector>,
) {
    state.running = true;
    state.connector = Some(connector);
    ctx.set_idle(false);
    state.worker = Some(tokio::spawn(reconciler::run_worker(
        rt.clone(),
        Arc::clone(ctx),
    )));
    debug!(app_context_id = %ctx.id(), "Worker spawned");
}

/// Enqueue `event` for an AppContext and make sure a worker is processing it.
///
/// If the event is `Terminate` and another event is in flight, that event is
/// cancelled so the terminate can proceed.
pub fn handle_app_context(
    rt: Runtime,
    id: String,
    update_id: Option<String>,
    event: RsyncEvent,
    connector: Arc<dyn ClusterConnector>,
) -> BoxFuture<'static, Result<()>> {
    async move { enqueue_and_dispatch(rt, id, update_id, event, connector).await }.boxed()
}

#[instrument(skip(rt, connector), fields(app_context_id = %id))]
async fn enqueue_and_dispatch(
    rt: Runtime,
    id: String,
    update_id: Option<String>,
    event: RsyncEvent,
    connector: Arc<dyn ClusterConnector>,
) -> Result<()> {
    let ac = AppContext::load(rt.store().clone(), &id).await?;
    let ctx = rt.dispatcher().get_or_create(&id);

    let mut state = ctx.state.lock().await;
    let index = EventQueue::new(&ac)
        .enqueue(QueueElement::pending(event, update_id))
        .await?;
    if event == RsyncEvent::Terminate {
        ac.set_pending_terminate_flag(true).await?;
    }
    appcontext::record_active(rt.store().as_ref(), &id).await?;
    info!(event = %event, index, "Event enqueued");

    if !state.running {
        start_worker(&rt, &ctx, &mut state, connector);
    } else if event == RsyncEvent::Terminate
        && state
            .current_event
            .is_some_and(|current| current != RsyncEvent::Terminate)
    {
        info!("Cancelling in-flight event for Terminate");
        state.cancel.cancel();
    }
    Ok(())
}

/// Restart workers for every AppContext recorded as active.
///
/// AppContexts whose queue has nothing pending, or that no longer exist,
/// are removed from the active set. Returns the number of workers started.
#[instrument(skip(rt))]
pub async fn restart_app_contexts(rt: &Runtime) -> Result<usize> {
    let store = rt.store().clone();
    let mut started = 0;
    for id in appcontext::list_active(store.as_ref()).await? {
        let ac = match AppContext::load(store.clone(), &id).await {
            Ok(ac) => ac,
            Err(e) => {
                warn!(app_context_id = %id, error = %e, "Dropping unknown AppContext from active set");
                appcontext::delete_active(store.as_ref(), &id).await?;
                continue;
            }
        };

        let ctx = rt.dispatcher().get_or_create(&id);
        let mut state = ctx.state.lock().await;
        if state.running {
            continue;
        }
        if EventQueue::new(&ac).has_pending().await? {
            start_worker(rt, &ctx, &mut state, rt.connector(&id));
            started += 1;
            info!(app_context_id = %id, "Restarted worker");
        } else {
            appcontext::delete_active(store.as_ref(), &id).await?;
            debug!(app_context_id = %id, "Nothing pending; removed from active set");
        }
    }
    Ok(started)
}
