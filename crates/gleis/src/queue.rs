//! Public queue surface.
//!
//! [`SerialQueue`] composes the engine, the cancellation tokens, the
//! scheduler port, and the event dispatcher behind a small handle;
//! [`QueueBuilder`] is the fluent way to configure one.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;
use crate::error::QueueError;
use crate::events::{EventKind, HandlerId, QueueEvent};
use crate::schedule::{Scheduler, TokioScheduler};
use crate::task::{PushOptions, Ticket};
use crate::token::CancelToken;

// ── SerialQueue ──────────────────────────────────────────────────────

/// A single-consumer, strictly-ordered task queue.
///
/// Tasks run one at a time, in submission order, each with its own
/// cancellation token and optional time budget. Handles are cheap to
/// clone and all clones drive the same queue.
///
/// # Example
/// ```ignore
/// let queue: SerialQueue<u32> = SerialQueue::builder()
///     .name("thumbnails")
///     .timeout(Duration::from_secs(30))
///     .build();
///
/// let ticket = queue.push(|_token| async move { Ok(42) })?;
/// assert_eq!(ticket.await?, 42);
/// ```
pub struct SerialQueue<T> {
    engine: Engine<T>,
}

impl<T> Clone for SerialQueue<T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<T: Send + 'static> SerialQueue<T> {
    /// A queue with the given diagnostic name and default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder().name(name).build()
    }

    /// Start building a queue.
    pub fn builder() -> QueueBuilder<T> {
        QueueBuilder::new()
    }

    /// Submit a task.
    ///
    /// The callable receives the entry's [`CancelToken`] and is invoked
    /// once the entry reaches the head of the queue. Fails if the queue
    /// is closed; nothing is queued in that case. The returned
    /// [`Ticket`] resolves with the task's outcome and can cancel the
    /// task at any point before it completes.
    pub fn push<F, Fut>(&self, task: F) -> Result<Ticket<T>, QueueError>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, anyhow::Error>> + Send + 'static,
    {
        self.push_with(task, PushOptions::default())
    }

    /// Submit a task with per-submission options.
    pub fn push_with<F, Fut>(
        &self,
        task: F,
        options: PushOptions,
    ) -> Result<Ticket<T>, QueueError>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, anyhow::Error>> + Send + 'static,
    {
        self.engine.push(
            Box::new(move |token| Box::pin(task(token))),
            options.timeout,
        )
    }

    /// Cancel the current task and every queued entry, then resolve
    /// once the queue is empty. In-flight work is not interrupted, only
    /// abandoned.
    pub async fn cancel_all(&self) {
        self.engine.cancel_all();
        self.engine.wait().await;
    }

    /// Close the queue to new submissions and resolve once the work
    /// already queued has drained.
    pub async fn close(&self) {
        self.engine.close(false);
        self.engine.wait().await;
    }

    /// Close the queue to new submissions and cancel everything that is
    /// queued or running.
    pub async fn close_now(&self) {
        self.engine.close(true);
        self.engine.wait().await;
    }

    /// Resolves once the queue has no current task and nothing queued.
    /// Resolves immediately on an idle queue.
    pub async fn wait(&self) {
        self.engine.wait().await;
    }

    /// Register `handler` for every emission of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.engine.events().on(kind, handler)
    }

    /// Register `handler` for the next emission of `kind` only.
    pub fn once<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.engine.events().once(kind, handler)
    }

    /// Remove a handler registration. Returns `true` if it was still
    /// registered.
    pub fn off(&self, id: HandlerId) -> bool {
        self.engine.events().off(id)
    }

    /// Whether the queue has been closed to new submissions.
    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    /// Queued entries, not counting the current task.
    pub fn len(&self) -> usize {
        self.engine.len()
    }

    /// No current task and nothing queued.
    pub fn is_idle(&self) -> bool {
        self.engine.is_idle()
    }

    /// The queue's diagnostic name.
    pub fn name(&self) -> &str {
        self.engine.name()
    }

    /// The default per-task time budget, if one was configured.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.engine.default_timeout()
    }
}

// ── QueueBuilder ─────────────────────────────────────────────────────

/// Fluent builder for [`SerialQueue`].
///
/// # Example
/// ```ignore
/// let queue: SerialQueue<()> = SerialQueue::builder()
///     .name("mailer")
///     .timeout(Duration::from_secs(10))
///     .build();
/// ```
pub struct QueueBuilder<T> {
    name: String,
    timeout: Option<Duration>,
    scheduler: Arc<dyn Scheduler>,
    _outcome: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> QueueBuilder<T> {
    fn new() -> Self {
        Self {
            name: "default".to_string(),
            timeout: None,
            scheduler: Arc::new(TokioScheduler),
            _outcome: PhantomData,
        }
    }

    /// Set the queue's diagnostic name (default: `"default"`).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the default per-task time budget. Individual submissions can
    /// override it, and an explicit zero disables it for that task.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replace the scheduler the queue defers its run-loop entries
    /// through (default: [`TokioScheduler`]).
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Build the queue.
    pub fn build(self) -> SerialQueue<T> {
        SerialQueue {
            engine: Engine::new(self.name, self.timeout, self.scheduler),
        }
    }
}

impl<T: Send + 'static> Default for QueueBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
