//! Task entries and submission tickets.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::TaskError;
use crate::token::{CancelReason, CancelToken};

// ── Task callable ────────────────────────────────────────────────────

/// Boxed future produced by a task callable.
pub type TaskFuture<T> = Pin<Box<dyn Future<Output = Result<T, anyhow::Error>> + Send>>;

/// Boxed task callable: receives the entry's cancellation token and
/// returns the task future. Invoked at most once, when the entry
/// reaches the head of the queue; an entry cancelled while still queued
/// is settled without ever invoking it.
pub type TaskFn<T> = Box<dyn FnOnce(CancelToken) -> TaskFuture<T> + Send>;

// ── PushOptions ──────────────────────────────────────────────────────

/// Per-submission options.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Time budget for this task. `None` falls back to the queue's
    /// default; an explicit zero duration disables the timeout.
    pub timeout: Option<Duration>,
}

impl PushOptions {
    /// Options with an explicit timeout.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

// ── QueuedTask ───────────────────────────────────────────────────────

/// One submitted unit of work awaiting execution.
pub(crate) struct QueuedTask<T> {
    pub(crate) seq: u64,
    pub(crate) task: TaskFn<T>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) token: CancelToken,
    pub(crate) done: oneshot::Sender<Result<T, TaskError>>,
}

// ── Ticket ───────────────────────────────────────────────────────────

/// Handle to one submitted task's eventual outcome.
///
/// A `Ticket` is a future resolving to the task's result. It also
/// carries the task's cancellation token, so the submitter can cancel
/// the task whether it is still queued or already running. Dropping a
/// ticket neither cancels the task nor discards its slot in the queue.
pub struct Ticket<T> {
    token: CancelToken,
    done: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> Ticket<T> {
    pub(crate) fn new(
        token: CancelToken,
        done: oneshot::Receiver<Result<T, TaskError>>,
    ) -> Self {
        Self { token, done }
    }

    /// The task's cancellation token.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Cancel the task with [`CancelReason::User`].
    pub fn cancel(&self) -> bool {
        self.token.cancel()
    }

    /// Cancel the task with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        self.token.cancel_with(reason)
    }
}

impl<T> fmt::Debug for Ticket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl<T> Future for Ticket<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.done).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The queue went away without settling the entry; the work
            // is gone along with it.
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(TaskError::Cancelled(CancelReason::Shutdown)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
