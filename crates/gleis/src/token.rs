//! Per-task cancellation tokens.
//!
//! Every queued task owns one [`CancelToken`], shared with the task body
//! and with the submitter through the returned ticket. Cancellation is a
//! one-way latch: the first recorded reason wins, and once the owning
//! task has completed without being cancelled, the token is sealed and
//! every later cancel call is a permanent no-op.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

// ── CancelReason ─────────────────────────────────────────────────────

/// Why a task was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// Explicit cancellation by the caller.
    User,
    /// The task exceeded its time budget.
    Timeout,
    /// The queue discarded its work (cancel-all or close).
    Shutdown,
    /// A caller-supplied reason.
    Other(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::User => write!(f, "cancelled"),
            CancelReason::Timeout => write!(f, "timed out"),
            CancelReason::Shutdown => write!(f, "queue shut down"),
            CancelReason::Other(reason) => write!(f, "{reason}"),
        }
    }
}

// ── Token state ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum TokenState {
    /// The owning task is queued or running and not cancelled.
    Active,
    /// Cancelled with the recorded reason.
    Cancelled(CancelReason),
    /// The owning task completed without cancellation; the token can
    /// never become cancelled.
    Sealed,
}

// ── CancelToken ──────────────────────────────────────────────────────

/// Cancellation handle for a single queued task.
///
/// Clones are cheap and all observe the same state. Cancelling does not
/// interrupt a running task body; it signals the queue to stop waiting
/// on the task and move on, while a cooperative body can watch the
/// token and stop early.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<TokenState>>,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(TokenState::Active);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Cancel with [`CancelReason::User`]. See [`cancel_with`](Self::cancel_with).
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::User)
    }

    /// Cancel with an explicit reason.
    ///
    /// Returns `true` if this call performed the cancellation. Returns
    /// `false`, without overwriting the recorded reason, if the token
    /// was already cancelled or the owning task has already completed.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        self.state.send_if_modified(|state| match state {
            TokenState::Active => {
                *state = TokenState::Cancelled(reason);
                true
            }
            _ => false,
        })
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.state.borrow(), TokenState::Cancelled(_))
    }

    /// The recorded cancellation reason, if cancelled.
    pub fn reason(&self) -> Option<CancelReason> {
        match &*self.state.borrow() {
            TokenState::Cancelled(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Resolves once the token is cancelled, even if the cancellation
    /// happened before this call.
    ///
    /// Never resolves for a token whose task completed without being
    /// cancelled, so await it alongside the signals that bound the
    /// task's lifetime, the way the queue's supervision loop does.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|state| matches!(state, TokenState::Cancelled(_)))
            .await;
    }

    /// Mark the owning task completed. Every later cancel call becomes a
    /// no-op.
    ///
    /// Returns `true` if this call sealed the token, `false` if a
    /// cancellation got there first. The queue settles the task as
    /// cancelled in that case, so seal-or-cancel is a single race with
    /// one winner.
    pub(crate) fn seal(&self) -> bool {
        self.state.send_if_modified(|state| match state {
            TokenState::Active => {
                *state = TokenState::Sealed;
                true
            }
            _ => false,
        })
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
