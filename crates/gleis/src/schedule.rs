//! Deferred-execution port.
//!
//! The queue never re-enters its run loop recursively: every entry is
//! handed to a [`Scheduler`] as a boxed job, so long queues cannot grow
//! the call stack and the runtime gets a chance to run other work
//! between tasks. The default [`TokioScheduler`] defers through
//! `tokio::spawn`; tests can inject a scheduler of their own to observe
//! or control the queue's re-entry points.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A unit of deferred work.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Defers jobs to run soon, never inline.
///
/// Implementations must eventually run every accepted job; the queue's
/// run-loop entries are idempotent, so relative ordering between jobs is
/// not load-bearing.
pub trait Scheduler: Send + Sync {
    /// Run `job` asynchronously, after the current synchronous context.
    fn schedule(&self, job: Job);
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(&self, job: Job) {
        (**self).schedule(job)
    }
}

// ── TokioScheduler ───────────────────────────────────────────────────

/// Schedules jobs onto the ambient tokio runtime in spawn order.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, job: Job) {
        tokio::spawn(job);
    }
}

// ── Tests ────────────────────────────────────────────────────────────
