//! Queue event subscription and emission.
//!
//! A small owned dispatcher: handlers are registered per [`EventKind`],
//! invoked in registration order, and removed through the [`HandlerId`]
//! handed out at registration. Emission snapshots the registration list
//! first, so handlers may add or remove registrations (including their
//! own, via `once`) without disturbing an in-progress delivery. A
//! panicking handler is logged and swallowed; it never reaches the code
//! that emitted the event and never blocks the handlers after it.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

// ── Events ───────────────────────────────────────────────────────────

/// The event families a queue can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A task body failed (returned an error or panicked).
    Error,
    /// The queue transitioned to empty: no current task, nothing queued.
    Drained,
    /// A task exceeded its time budget; fired before the cancellation
    /// completes the task.
    Timeout,
}

/// A queue event delivered to registered handlers.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// The failure produced by a task body.
    Error(Arc<anyhow::Error>),
    Drained,
    Timeout,
}

impl QueueEvent {
    /// The kind handlers subscribe under.
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::Error(_) => EventKind::Error,
            QueueEvent::Drained => EventKind::Drained,
            QueueEvent::Timeout => EventKind::Timeout,
        }
    }
}

/// Identifies one handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

struct Registration {
    id: HandlerId,
    handler: Handler,
    once: bool,
}

// ── Dispatcher ───────────────────────────────────────────────────────

/// Registration map and delivery loop for queue events.
pub(crate) struct Dispatcher {
    /// Queue name, carried for log context.
    name: String,
    handlers: Mutex<HashMap<EventKind, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for every emission of `kind`.
    pub(crate) fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler), false)
    }

    /// Register `handler` for the next emission of `kind` only. The
    /// registration is removed before the handler runs, so a handler
    /// that triggers a nested emission cannot fire twice.
    pub(crate) fn once<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler), true)
    }

    fn register(&self, kind: EventKind, handler: Handler, once: bool) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(kind)
            .or_default()
            .push(Registration { id, handler, once });
        id
    }

    /// Remove the registration behind `id`. Returns `true` if it was
    /// still registered. A handler removed during an emission it was
    /// snapshotted into is still invoked for that emission.
    pub(crate) fn off(&self, id: HandlerId) -> bool {
        let mut map = self.lock();
        for registrations in map.values_mut() {
            if let Some(pos) = registrations.iter().position(|r| r.id == id) {
                registrations.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every handler currently registered for its
    /// kind, in registration order.
    pub(crate) fn emit(&self, event: QueueEvent) {
        let snapshot: Vec<(HandlerId, Handler)> = {
            let mut map = self.lock();
            let Some(registrations) = map.get_mut(&event.kind()) else {
                return;
            };
            let snapshot = registrations
                .iter()
                .map(|r| (r.id, Arc::clone(&r.handler)))
                .collect();
            registrations.retain(|r| !r.once);
            snapshot
        };

        for (id, handler) in snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                warn!(
                    queue = %self.name,
                    event = ?event.kind(),
                    handler = id.0,
                    panic = panic_message(payload.as_ref()),
                    "event handler panicked"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<Registration>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Best-effort text for a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

// ── Tests ────────────────────────────────────────────────────────────
