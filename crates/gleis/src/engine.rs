//! The single-consumer execution engine.
//!
//! Owns the ordered store, the current-task slot, the waiter set, and
//! the closed flag, all behind one mutex that is never held across an
//! await. Exactly one task is current at any instant; every run-loop
//! entry crosses the scheduler port, so the engine never recurses into
//! itself and long queues cannot grow the call stack.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::error::{QueueError, TaskError};
use crate::events::{panic_message, Dispatcher, QueueEvent};
use crate::schedule::Scheduler;
use crate::task::{QueuedTask, TaskFn, Ticket};
use crate::token::{CancelReason, CancelToken};

// ── Engine state ─────────────────────────────────────────────────────

/// Bookkeeping for the entry that currently owns the execution slot.
/// The body itself runs in a spawned task supervised by `supervise`.
struct CurrentTask<T> {
    seq: u64,
    token: CancelToken,
    done: oneshot::Sender<Result<T, TaskError>>,
    started: Instant,
}

/// Mutable queue state. Every lock section is short and synchronous.
struct EngineState<T> {
    store: VecDeque<QueuedTask<T>>,
    current: Option<CurrentTask<T>>,
    waiters: Vec<oneshot::Sender<()>>,
    closed: bool,
}

struct Inner<T> {
    name: String,
    default_timeout: Option<Duration>,
    scheduler: Arc<dyn Scheduler>,
    events: Dispatcher,
    state: Mutex<EngineState<T>>,
    next_seq: AtomicU64,
}

/// Cheap-clone handle over the shared engine; scheduled run-loop jobs
/// carry one of these.
pub(crate) struct Engine<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Engine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// How the supervision of one entry ended.
enum Outcome<T> {
    Value(T),
    Fault(anyhow::Error),
    Cancelled,
}

impl<T: Send + 'static> Engine<T> {
    pub(crate) fn new(
        name: String,
        default_timeout: Option<Duration>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                events: Dispatcher::new(name.clone()),
                name,
                default_timeout,
                scheduler,
                state: Mutex::new(EngineState {
                    store: VecDeque::new(),
                    current: None,
                    waiters: Vec::new(),
                    closed: false,
                }),
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn default_timeout(&self) -> Option<Duration> {
        self.inner.default_timeout
    }

    pub(crate) fn events(&self) -> &Dispatcher {
        &self.inner.events
    }

    /// Queued entries, not counting the current task.
    pub(crate) fn len(&self) -> usize {
        self.lock().store.len()
    }

    /// No current task and nothing queued.
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.lock();
        state.current.is_none() && state.store.is_empty()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // ── Submission ───────────────────────────────────────────────────

    pub(crate) fn push(
        &self,
        task: TaskFn<T>,
        timeout: Option<Duration>,
    ) -> Result<Ticket<T>, QueueError> {
        let timeout = self.effective_timeout(timeout);
        let token = CancelToken::new();
        let (done_tx, done_rx) = oneshot::channel();

        let seq = {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed(self.name().to_string()));
            }
            let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
            state.store.push_back(QueuedTask {
                seq,
                task,
                timeout,
                token: token.clone(),
                done: done_tx,
            });
            seq
        };

        debug!(queue = %self.name(), task = seq, timeout = ?timeout, "task queued");
        self.kick();
        Ok(Ticket::new(token, done_rx))
    }

    /// Per-task timeout falls back to the queue default; an explicit
    /// zero disables the timeout entirely.
    fn effective_timeout(&self, requested: Option<Duration>) -> Option<Duration> {
        requested
            .or(self.inner.default_timeout)
            .filter(|timeout| !timeout.is_zero())
    }

    /// Request a run-loop entry through the scheduler port.
    fn kick(&self) {
        let engine = self.clone();
        self.inner.scheduler.schedule(Box::pin(async move {
            engine.run_next().await;
        }));
    }

    // ── Run loop ─────────────────────────────────────────────────────

    /// One run-loop entry: promote the next live entry and supervise it
    /// to completion. Entries are idempotent; while a task is current
    /// this is a no-op, because that task's completion owes a fresh
    /// entry.
    async fn run_next(&self) {
        let mut skipped = Vec::new();

        let (runnable, waiters, drained) = {
            let mut state = self.lock();
            if state.current.is_some() {
                return;
            }

            let head = loop {
                match state.store.pop_front() {
                    None => break None,
                    Some(entry) if entry.token.is_cancelled() => skipped.push(entry),
                    Some(entry) => break Some(entry),
                }
            };

            match head {
                Some(QueuedTask {
                    seq,
                    task,
                    timeout,
                    token,
                    done,
                }) => {
                    state.current = Some(CurrentTask {
                        seq,
                        token: token.clone(),
                        done,
                        started: Instant::now(),
                    });
                    (Some((seq, task, timeout, token)), Vec::new(), false)
                }
                None => {
                    let waiters = std::mem::take(&mut state.waiters);
                    (None, waiters, !skipped.is_empty())
                }
            }
        };

        for entry in skipped {
            self.settle_skipped(entry);
        }
        if drained {
            self.notify_drained();
        }
        for waiter in waiters {
            let _ = waiter.send(());
        }

        let Some((seq, task, timeout, token)) = runnable else {
            return;
        };
        self.supervise(seq, task, timeout, token).await;
    }

    /// Settle an entry that was cancelled while still queued. Its
    /// callable is never invoked.
    fn settle_skipped(&self, entry: QueuedTask<T>) {
        let reason = entry.token.reason().unwrap_or(CancelReason::User);
        debug!(queue = %self.name(), task = entry.seq, %reason, "queued task cancelled before start");
        let _ = entry.done.send(Err(TaskError::Cancelled(reason)));
    }

    /// Run the promoted entry's body and drive its completion.
    ///
    /// The body is spawned so a panic inside the callable surfaces as a
    /// task failure instead of tearing down the run loop, and so a
    /// cancelled body can be left behind (dropped handle, never
    /// aborted) while the queue moves on.
    async fn supervise(
        &self,
        seq: u64,
        task: TaskFn<T>,
        timeout: Option<Duration>,
        token: CancelToken,
    ) {
        // A cancel that raced the promotion settles the entry without
        // ever invoking the body.
        if token.is_cancelled() {
            self.complete(seq, Outcome::Cancelled);
            return;
        }

        debug!(queue = %self.name(), task = seq, "task started");

        let body_token = token.clone();
        let mut body = tokio::spawn(async move { task(body_token).await });

        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            biased;

            _ = token.cancelled() => Outcome::Cancelled,

            joined = &mut body => match joined {
                Ok(Ok(value)) => Outcome::Value(value),
                Ok(Err(error)) => Outcome::Fault(error),
                Err(join_error) => Outcome::Fault(task_panic(join_error)),
            },

            _ = deadline => {
                warn!(queue = %self.name(), task = seq, timeout = ?timeout, "task timed out");
                self.events().emit(QueueEvent::Timeout);
                token.cancel_with(CancelReason::Timeout);
                Outcome::Cancelled
            }
        };

        self.complete(seq, outcome);
    }

    // ── Completion ───────────────────────────────────────────────────

    /// Settle the current entry, if `seq` still owns the slot, then
    /// either report the queue drained or request the next run-loop
    /// entry. Events and ticket resolution happen outside the state
    /// lock, so handlers are free to re-enter the queue.
    fn complete(&self, seq: u64, outcome: Outcome<T>) {
        let (current, empty, waiters) = {
            let mut state = self.lock();
            match state.current.as_ref() {
                Some(current) if current.seq == seq => {}
                // cancel_all settled this entry already; a fresh entry
                // may even own the slot by now.
                _ => return,
            }
            let Some(current) = state.current.take() else {
                return;
            };
            let empty = state.store.is_empty();
            let waiters = if empty {
                std::mem::take(&mut state.waiters)
            } else {
                Vec::new()
            };
            (current, empty, waiters)
        };

        let elapsed = current.started.elapsed().as_millis() as u64;
        match outcome {
            Outcome::Fault(error) => {
                current.token.seal();
                let error = Arc::new(error);
                warn!(queue = %self.name(), task = seq, duration_ms = elapsed, error = %error, "task failed");
                self.events().emit(QueueEvent::Error(Arc::clone(&error)));
                let _ = current.done.send(Err(TaskError::Failed(error)));
            }
            // Sealing decides the cancel-vs-complete race: a cancel that
            // lands before the seal still takes the task down.
            Outcome::Value(value) if current.token.seal() => {
                debug!(queue = %self.name(), task = seq, duration_ms = elapsed, "task finished");
                let _ = current.done.send(Ok(value));
            }
            Outcome::Value(_) | Outcome::Cancelled => {
                let reason = current.token.reason().unwrap_or(CancelReason::User);
                debug!(queue = %self.name(), task = seq, duration_ms = elapsed, %reason, "task cancelled");
                let _ = current.done.send(Err(TaskError::Cancelled(reason)));
            }
        }

        if empty {
            self.notify_drained();
            for waiter in waiters {
                let _ = waiter.send(());
            }
        } else {
            self.kick();
        }
    }

    fn notify_drained(&self) {
        debug!(queue = %self.name(), "queue drained");
        self.events().emit(QueueEvent::Drained);
    }

    // ── Queue-level operations ───────────────────────────────────────

    /// Cancel the current task (if any) and every queued entry. The
    /// current body is left to finish on its own; its eventual result
    /// is discarded by the seq guard in `complete`.
    pub(crate) fn cancel_all(&self) {
        let (current, queued, waiters) = {
            let mut state = self.lock();
            let current = state.current.take();
            let queued: Vec<QueuedTask<T>> = state.store.drain(..).collect();
            let waiters = std::mem::take(&mut state.waiters);
            (current, queued, waiters)
        };

        let had_work = current.is_some() || !queued.is_empty();
        if had_work {
            info!(
                queue = %self.name(),
                running = current.is_some(),
                queued = queued.len(),
                "cancelling all tasks"
            );
        }

        if let Some(current) = current {
            current.token.cancel_with(CancelReason::Shutdown);
            let reason = current.token.reason().unwrap_or(CancelReason::Shutdown);
            let _ = current.done.send(Err(TaskError::Cancelled(reason)));
        }
        for entry in queued {
            entry.token.cancel_with(CancelReason::Shutdown);
            let reason = entry.token.reason().unwrap_or(CancelReason::Shutdown);
            let _ = entry.done.send(Err(TaskError::Cancelled(reason)));
        }

        if had_work {
            self.notify_drained();
        }
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    /// Mark the queue closed; later submissions fail. Optionally sweep
    /// pending work the way `cancel_all` does.
    pub(crate) fn close(&self, cancel_pending: bool) {
        {
            let mut state = self.lock();
            if !state.closed {
                state.closed = true;
                info!(queue = %self.name(), cancel_pending, "queue closed");
            }
        }
        if cancel_pending {
            self.cancel_all();
        }
    }

    /// Resolves when the queue has no current task and nothing queued.
    /// Resolves immediately on an idle queue without touching the
    /// scheduler port.
    pub(crate) async fn wait(&self) {
        let pending = {
            let mut state = self.lock();
            if state.current.is_none() && state.store.is_empty() {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            }
        };

        if let Some(rx) = pending {
            let _ = rx.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState<T>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Map a join failure of the spawned body to a task fault.
fn task_panic(error: JoinError) -> anyhow::Error {
    if error.is_panic() {
        let payload = error.into_panic();
        anyhow::anyhow!("task panicked: {}", panic_message(payload.as_ref()))
    } else {
        anyhow::anyhow!("task aborted before completion")
    }
}

// ── Tests ────────────────────────────────────────────────────────────
