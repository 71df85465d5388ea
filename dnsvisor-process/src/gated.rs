//! Process decorator that holds actions back until its routing instance
//! exists.
//!
//! A single actor thread owns the gate flag and the pending slot. Caller
//! requests, namespace events and teardown all arrive on one channel, so they
//! are totally ordered and at most one wrapped action runs at a time.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::Span;

use crate::error::ProcessError;
use crate::managed::{Action, DeferredAction, Dispatch, ManagedProcess};
use crate::namespace::{NamespaceAvailability, Subscription};

enum GateMessage {
    Request {
        action: Action,
        ack: oneshot::Sender<Dispatch>,
    },
    /// Run only while present; never touches the pending slot.
    TryRequest {
        action: Action,
        ack: oneshot::Sender<Option<Result<(), ProcessError>>>,
    },
    Added,
    Removed,
    Teardown {
        ack: oneshot::Sender<Result<(), ProcessError>>,
    },
}

struct Pending {
    action: Action,
    reply: oneshot::Sender<Result<(), ProcessError>>,
}

pub struct VrfGatedProcess {
    namespace: String,
    unit: String,
    tx: mpsc::UnboundedSender<GateMessage>,
    subscriptions: Mutex<Vec<Subscription>>,
    actor: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl VrfGatedProcess {
    /// Wrap `inner` so its actions only run while `namespace` exists.
    ///
    /// Subscriptions are taken before the initial existence check so an event
    /// racing with construction is queued, not lost.
    pub fn new(
        namespace: impl Into<String>,
        namespaces: &dyn NamespaceAvailability,
        inner: Arc<dyn ManagedProcess>,
    ) -> Result<Self, ProcessError> {
        let namespace = namespace.into();
        let unit = inner.unit().to_string();
        let span = tracing::info_span!("vrf_gate", instance = %namespace, unit = %unit);
        let (tx, rx) = mpsc::unbounded_channel();

        let added = {
            let tx = tx.clone();
            let wanted = namespace.clone();
            namespaces.subscribe_added(Arc::new(move |name: &str| {
                if name == wanted {
                    let _ = tx.send(GateMessage::Added);
                }
            }))
        };
        let removed = {
            let tx = tx.clone();
            let wanted = namespace.clone();
            namespaces.subscribe_removed(Arc::new(move |name: &str| {
                if name == wanted {
                    let _ = tx.send(GateMessage::Removed);
                }
            }))
        };

        let present = namespaces.exists(&namespace);
        span.in_scope(|| tracing::debug!(present, "gate initialised"));

        let actor_span = span.clone();
        let actor_unit = unit.clone();
        let actor = std::thread::Builder::new()
            .name(format!("vrf-gate-{namespace}"))
            .spawn(move || run_gate(rx, inner, actor_unit, present, actor_span))
            .map_err(|e| ProcessError::Spawn {
                unit: unit.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            namespace,
            unit,
            tx,
            subscriptions: Mutex::new(vec![added, removed]),
            actor: Mutex::new(Some(actor)),
            span,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn terminated(&self) -> ProcessError {
        ProcessError::Terminated {
            unit: self.unit.clone(),
        }
    }

    fn cancel_subscriptions(&self) {
        let subs = std::mem::take(&mut *self.subscriptions.lock());
        for sub in subs {
            sub.cancel();
        }
    }
}

impl ManagedProcess for VrfGatedProcess {
    fn unit(&self) -> &str {
        &self.unit
    }

    fn dispatch(&self, action: Action) -> Dispatch {
        let (ack, ack_rx) = oneshot::channel();
        if self.tx.send(GateMessage::Request { action, ack }).is_err() {
            return Dispatch::Done(Err(self.terminated()));
        }
        ack_rx
            .blocking_recv()
            .unwrap_or_else(|_| Dispatch::Done(Err(self.terminated())))
    }

    fn try_dispatch(&self, action: Action) -> Option<Result<(), ProcessError>> {
        let (ack, ack_rx) = oneshot::channel();
        if self.tx.send(GateMessage::TryRequest { action, ack }).is_err() {
            return Some(Err(self.terminated()));
        }
        ack_rx
            .blocking_recv()
            .unwrap_or_else(|_| Some(Err(self.terminated())))
    }

    /// Cancel subscriptions, stop the unit regardless of gate state and hand
    /// that result to any parked caller. Later calls return `Ok(())`.
    fn shutdown(&self) -> Result<(), ProcessError> {
        let _enter = self.span.enter();
        self.cancel_subscriptions();
        let Some(actor) = self.actor.lock().take() else {
            return Ok(());
        };
        let (ack, ack_rx) = oneshot::channel();
        let result = if self.tx.send(GateMessage::Teardown { ack }).is_ok() {
            ack_rx
                .blocking_recv()
                .unwrap_or_else(|_| Err(self.terminated()))
        } else {
            Err(self.terminated())
        };
        if actor.join().is_err() {
            tracing::error!("gate actor panicked");
        }
        result
    }
}

impl Drop for VrfGatedProcess {
    /// Releases the actor without stopping the unit. The actor exits once the
    /// last sender is gone; a parked caller then sees `Terminated`.
    fn drop(&mut self) {
        self.cancel_subscriptions();
        if self.actor.lock().take().is_some() {
            self.span
                .in_scope(|| tracing::debug!("gate released without teardown"));
        }
    }
}

fn run_gate(
    mut rx: mpsc::UnboundedReceiver<GateMessage>,
    inner: Arc<dyn ManagedProcess>,
    unit: String,
    mut present: bool,
    span: Span,
) {
    let _enter = span.enter();
    let mut pending: Option<Pending> = None;

    while let Some(msg) = rx.blocking_recv() {
        match msg {
            GateMessage::Request { action, ack } => {
                if present {
                    let result = inner.run(action);
                    let _ = ack.send(Dispatch::Done(result));
                    continue;
                }
                let (reply, reply_rx) = oneshot::channel();
                if let Some(prev) = pending.replace(Pending { action, reply }) {
                    tracing::debug!(superseded = %prev.action, by = %action, "pending action replaced");
                    let _ = prev.reply.send(Err(ProcessError::Superseded {
                        unit: unit.clone(),
                        action: prev.action,
                    }));
                } else {
                    tracing::info!(%action, "namespace absent, action deferred");
                }
                let _ = ack.send(Dispatch::Deferred(DeferredAction::new(
                    unit.clone(),
                    action,
                    reply_rx,
                )));
            }
            GateMessage::TryRequest { action, ack } => {
                let outcome = if present {
                    Some(inner.run(action))
                } else {
                    tracing::debug!(%action, "namespace absent, action skipped");
                    None
                };
                let _ = ack.send(outcome);
            }
            GateMessage::Added => {
                present = true;
                if let Some(p) = pending.take() {
                    tracing::info!(action = %p.action, "namespace available, running deferred action");
                    let _ = p.reply.send(inner.run(p.action));
                } else {
                    tracing::debug!("namespace available");
                }
            }
            GateMessage::Removed => {
                tracing::info!("namespace removed, gating actions");
                present = false;
            }
            GateMessage::Teardown { ack } => {
                let result = inner.stop();
                if let Some(p) = pending.take() {
                    let _ = p.reply.send(result.clone());
                }
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "final stop failed");
                }
                let _ = ack.send(result);
                break;
            }
        }
    }
}
