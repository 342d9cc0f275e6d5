//! Single-consumer, strictly-ordered async task queue.
//!
//! This crate provides:
//! - `SerialQueue` running submitted tasks one at a time, in submission order
//! - Per-task `CancelToken` for cooperative cancellation of queued or running work
//! - Timeout supervision that time-boxes individual tasks
//! - Queue events (`error`, `drained`, `timeout`) with panic-safe handler dispatch
//! - A pluggable `Scheduler` port for deterministic run-loop deferral in tests

mod engine;

pub mod error;
pub mod events;
pub mod queue;
pub mod schedule;
pub mod task;
pub mod token;

pub use error::{QueueError, TaskError};
pub use events::{EventKind, HandlerId, QueueEvent};
pub use queue::{QueueBuilder, SerialQueue};
pub use schedule::{Job, Scheduler, TokioScheduler};
pub use task::{PushOptions, TaskFn, TaskFuture, Ticket};
pub use token::{CancelReason, CancelToken};
