//! Task trait, lifecycle handle and closure adapters.
//!
//! A task is split in two halves:
//!
//! - the **body**, anything implementing [`Task`]. It is consumed when it runs.
//! - the **handle**, a cloneable [`TaskHandle`] carrying the task's identity,
//!   lifecycle state and cancellation flag. The scheduler owns the body once a
//!   task is submitted; everyone else holds handles.
//!
//! # Lifecycle
//!
//! ```text
//!            start()              finish()
//!   Ready ────────────► Executing ────────► Finished
//!     │                                        ▲
//!     └────── start() after cancel() ──────────┘
//! ```
//!
//! Cancellation is cooperative. [`TaskHandle::cancel`] only raises a flag (and
//! fires the abort hook a body may have registered); the body polls
//! [`TaskHandle::is_cancelled`] at its own safe points and returns early.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{AbortHandle, BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing::trace;

use crate::types::TaskId;

const READY: u8 = 0;
const EXECUTING: u8 = 1;
const FINISHED: u8 = 2;

static NEXT_TASK_ID: AtomicUsize = AtomicUsize::new(0);

/// A unit of async work.
///
/// The body receives its own [`TaskHandle`] so it can poll for cancellation
/// and register an abort hook. Returning from the future ends the work; the
/// scheduler then marks the task Finished.
///
/// Most bodies are written with [`task_fn`] (async) or [`block_fn`]
/// (synchronous) rather than by implementing this trait by hand.
pub trait Task: Send + 'static {
    fn run(self: Box<Self>, handle: TaskHandle) -> BoxFuture<'static, ()>;
}

/// Observable lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Ready,
    Executing,
    Finished,
}

struct TaskCore {
    id: TaskId,
    state: AtomicU8,
    cancelled: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
    done_rx: Shared<oneshot::Receiver<()>>,
}

/// Shared handle to one task's lifecycle.
///
/// Handles are cheap to clone. Two handles are equal when they refer to the
/// same task.
#[derive(Clone)]
pub struct TaskHandle {
    core: Arc<TaskCore>,
}

impl TaskHandle {
    /// Create a handle for a new task in the `Ready` state.
    pub fn new() -> Self {
        let (done_tx, done_rx) = oneshot::channel();
        Self {
            core: Arc::new(TaskCore {
                id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
                state: AtomicU8::new(READY),
                cancelled: AtomicBool::new(false),
                abort: Mutex::new(None),
                done_tx: Mutex::new(Some(done_tx)),
                done_rx: done_rx.shared(),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.core.id
    }

    pub fn state(&self) -> TaskState {
        match self.core.state.load(Ordering::Acquire) {
            READY => TaskState::Ready,
            EXECUTING => TaskState::Executing,
            _ => TaskState::Finished,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.cancelled.load(Ordering::Acquire)
    }

    /// Move the task from `Ready` to `Executing`.
    ///
    /// Returns `false` (and does nothing) if the task is already executing or
    /// finished. If cancellation was requested before start, the task goes
    /// straight to `Finished` without doing any work and `false` is returned.
    pub fn start(&self) -> bool {
        if self.is_cancelled() {
            if self.transition(READY, FINISHED) {
                #[cfg(feature = "tracing")]
                trace!(task_id = self.id().0, "cancelled before start");
                self.notify_finished();
            }
            return false;
        }
        self.transition(READY, EXECUTING)
    }

    /// Request cancellation.
    ///
    /// Sets the cancellation flag and fires the registered abort hook, if any.
    /// No state transition happens here; the body must observe the flag and
    /// return so the task can reach `Finished`.
    pub fn cancel(&self) {
        if self.core.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "tracing")]
        trace!(task_id = self.id().0, state = ?self.state(), "cancellation requested");

        if let Some(abort) = self.core.abort.lock().take() {
            abort.abort();
        }
    }

    /// Move the task from `Executing` to `Finished`.
    ///
    /// Terminal and idempotent: returns `true` only for the call that
    /// performed the transition.
    pub fn finish(&self) -> bool {
        if self.transition(EXECUTING, FINISHED) {
            self.notify_finished();
            true
        } else {
            false
        }
    }

    /// Resolves once the task is `Finished`.
    pub fn finished(&self) -> impl Future<Output = ()> + Send + 'static {
        self.core.done_rx.clone().map(|_| ())
    }

    /// Install the hook that aborts in-flight work when [`cancel`](Self::cancel)
    /// is called. Fires immediately if cancellation was already requested.
    pub(crate) fn set_abort(&self, abort: AbortHandle) {
        let mut slot = self.core.abort.lock();
        if self.is_cancelled() {
            abort.abort();
        } else {
            *slot = Some(abort);
        }
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.core
            .state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn notify_finished(&self) {
        self.core.abort.lock().take();
        if let Some(tx) = self.core.done_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for TaskHandle {}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Task body built from an async closure. See [`task_fn`].
pub struct TaskFn<F> {
    f: F,
}

impl<F, Fut> Task for TaskFn<F>
where
    F: FnOnce(TaskHandle) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn run(self: Box<Self>, handle: TaskHandle) -> BoxFuture<'static, ()> {
        (self.f)(handle).boxed()
    }
}

/// Create a task body from an async closure.
pub fn task_fn<F, Fut>(f: F) -> TaskFn<F>
where
    F: FnOnce(TaskHandle) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    TaskFn { f }
}

/// Task body built from a synchronous closure. See [`block_fn`].
pub struct BlockFn<F> {
    f: F,
}

impl<F> Task for BlockFn<F>
where
    F: FnOnce(&TaskHandle) + Send + 'static,
{
    fn run(self: Box<Self>, handle: TaskHandle) -> BoxFuture<'static, ()> {
        // Deferred to first poll so a panic lands inside the scheduler's unwind guard
        let f = self.f;
        async move { f(&handle) }.boxed()
    }
}

/// Create a task body from a synchronous closure.
///
/// Cache-store and apply steps are short, non-blocking bookkeeping and are
/// written this way.
pub fn block_fn<F>(f: F) -> BlockFn<F>
where
    F: FnOnce(&TaskHandle) + Send + 'static,
{
    BlockFn { f }
}
