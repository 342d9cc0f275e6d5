use std::sync::Arc;

use thiserror::Error;

use crate::token::CancelReason;

/// Errors returned synchronously from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue \"{0}\" is closed")]
    Closed(String),
}

/// The failure outcome of a single task, delivered through its ticket.
///
/// `Failed` carries the error produced by the task body (an `Err`
/// return or a panic); the same value is shared with `error` event
/// handlers, hence the `Arc`. `Cancelled` is not a diagnostic error:
/// it records why the task was abandoned and is never reported through
/// the `error` event.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(Arc<anyhow::Error>),

    #[error("task cancelled: {0}")]
    Cancelled(CancelReason),
}

impl TaskError {
    /// Whether this outcome is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled(_))
    }

    /// The cancellation reason, if this outcome is a cancellation.
    pub fn reason(&self) -> Option<&CancelReason> {
        match self {
            TaskError::Cancelled(reason) => Some(reason),
            TaskError::Failed(_) => None,
        }
    }
}
