//! Batch and task builder for wiring dependencies before submission.
//!
//! Dependencies are explicit data: every task lists the handles it waits
//! for, and the scheduler computes readiness from those edges rather than
//! from submission order. A task can only depend on handles that already
//! exist, so a batch can never describe a cycle.

use crate::scheduler::Scheduler;
use crate::task::{Task, TaskHandle};
use crate::types::ExecContext;

#[cfg(feature = "tracing")]
use tracing::debug;

pub(crate) struct Entry {
    pub(crate) handle: TaskHandle,
    pub(crate) task: Box<dyn Task>,
    pub(crate) context: ExecContext,
    pub(crate) deps: Vec<TaskHandle>,
}

/// A set of tasks submitted to a [`Scheduler`] together.
///
/// Tasks added to a batch do not run until [`Batch::submit`] is called. A
/// batch dropped without being submitted cancels its tasks, so their handles
/// still reach `Finished`.
///
/// # Examples
///
/// ```no_run
/// use mediafetch::{block_fn, ExecContext, Scheduler, TaskHandle};
///
/// # async {
/// let scheduler = Scheduler::new(|fut| { tokio::spawn(fut); });
///
/// let mut batch = scheduler.batch();
/// let produce = batch.add_task(block_fn(|_: &TaskHandle| {})).handle();
/// let consume = batch
///     .add_task(block_fn(|_: &TaskHandle| {}))
///     .depends_on(&produce)
///     .on(ExecContext::Apply)
///     .handle();
/// batch.submit();
///
/// consume.finished().await;
/// # };
/// ```
pub struct Batch<'s> {
    scheduler: &'s Scheduler,
    entries: Vec<Entry>,
}

impl<'s> Batch<'s> {
    pub(crate) fn new(scheduler: &'s Scheduler) -> Self {
        Self {
            scheduler,
            entries: Vec::new(),
        }
    }

    /// Add a task body, returning a builder for wiring its dependencies and
    /// execution context. The task runs on [`ExecContext::Worker`] unless
    /// told otherwise.
    pub fn add_task<Tk: Task>(&mut self, task: Tk) -> TaskBuilder<'_, 's> {
        let handle = TaskHandle::new();

        #[cfg(feature = "tracing")]
        debug!(
            task_id = handle.id().as_usize(),
            task_type = std::any::type_name::<Tk>(),
            "adding task to batch"
        );

        self.entries.push(Entry {
            handle,
            task: Box::new(task),
            context: ExecContext::Worker,
            deps: Vec::new(),
        });

        TaskBuilder {
            index: self.entries.len() - 1,
            batch: self,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hand every task to the scheduler. Returns their handles in the order
    /// they were added.
    pub fn submit(mut self) -> Vec<TaskHandle> {
        let entries = std::mem::take(&mut self.entries);
        self.scheduler.submit(entries)
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        for entry in self.entries.drain(..) {
            entry.handle.cancel();
            entry.handle.start();
        }
    }
}

/// Builder for one task inside a [`Batch`].
pub struct TaskBuilder<'b, 's> {
    index: usize,
    batch: &'b mut Batch<'s>,
}

impl TaskBuilder<'_, '_> {
    /// Wait for `dep` to finish before starting. Call once per predecessor.
    ///
    /// `dep` may belong to this batch or to anything already submitted to
    /// the same scheduler. A predecessor that has already finished imposes
    /// no wait.
    pub fn depends_on(self, dep: &TaskHandle) -> Self {
        #[cfg(feature = "tracing")]
        debug!(
            task_id = self.batch.entries[self.index].handle.id().as_usize(),
            dependency_id = dep.id().as_usize(),
            "wiring task dependency"
        );

        self.batch.entries[self.index].deps.push(dep.clone());
        self
    }

    /// Choose where the task runs once ready.
    pub fn on(self, context: ExecContext) -> Self {
        self.batch.entries[self.index].context = context;
        self
    }

    /// The handle of the task being built.
    pub fn handle(&self) -> TaskHandle {
        self.batch.entries[self.index].handle.clone()
    }
}

impl From<TaskBuilder<'_, '_>> for TaskHandle {
    fn from(builder: TaskBuilder<'_, '_>) -> Self {
        builder.handle()
    }
}
