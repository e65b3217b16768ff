//! Dependency-ordered task scheduler.
//!
//! Provides [`Scheduler`] for running tasks on two kinds of execution context:
//!
//! - a concurrent **worker pool** (optionally bounded), fed through the
//!   caller-supplied spawner, for fetch and cache-store work;
//! - one serial **apply context**, a single future draining a channel of
//!   jobs one at a time, for steps that mutate caller-visible state.
//!
//! A task becomes ready once every predecessor has reached `Finished`.
//! Uses a Mutex around the graph so submission and completion can happen
//! from any thread; no lock is held while a task body runs or while jobs are
//! handed to the spawner.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing::{debug, error, trace, warn};

use crate::builder::{Batch, Entry};
use crate::config::SchedulerConfig;
use crate::task::{Task, TaskHandle};
use crate::types::{ExecContext, TaskId};

type Spawner = Arc<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>;

struct Node {
    handle: TaskHandle,
    task: Option<Box<dyn Task>>,
    context: ExecContext,
    pending: usize,
}

#[derive(Default)]
struct Graph {
    nodes: HashMap<TaskId, Node>,
    dependents: HashMap<TaskId, Vec<TaskId>>, // node -> tasks waiting on it
    ready_workers: VecDeque<TaskId>,
    ready_apply: Vec<TaskId>,
    running_workers: usize,
}

impl Graph {
    fn make_ready(&mut self, id: TaskId) {
        match self.nodes.get(&id).map(|node| node.context) {
            Some(ExecContext::Worker) => self.ready_workers.push_back(id),
            Some(ExecContext::Apply) => self.ready_apply.push(id),
            None => {}
        }
    }
}

#[derive(Default)]
struct Jobs {
    workers: Vec<BoxFuture<'static, ()>>,
    apply: Vec<BoxFuture<'static, ()>>,
}

struct Inner {
    config: SchedulerConfig,
    spawner: Spawner,
    apply_tx: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
    graph: Mutex<Graph>,
}

/// Runs submitted tasks once their predecessors have finished.
///
/// Cloning a `Scheduler` yields another handle to the same graph and pools.
///
/// # Examples
///
/// ```no_run
/// use mediafetch::{task_fn, Scheduler, TaskHandle};
///
/// # async {
/// let scheduler = Scheduler::new(|fut| { tokio::spawn(fut); });
///
/// let handle = scheduler.spawn(task_fn(|handle: TaskHandle| async move {
///     if handle.is_cancelled() {
///         return;
///     }
///     // ... work ...
/// }));
///
/// handle.finished().await;
/// # };
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler with an unbounded worker pool.
    ///
    /// `spawner` runs futures on the async runtime of your choice, for
    /// example `|fut| { tokio::spawn(fut); }`. The apply context is spawned
    /// through it as well.
    pub fn new<S>(spawner: S) -> Self
    where
        S: Fn(BoxFuture<'static, ()>) + Send + Sync + 'static,
    {
        Self::with_config(SchedulerConfig::default(), spawner)
    }

    /// Create a scheduler with explicit configuration.
    pub fn with_config<S>(config: SchedulerConfig, spawner: S) -> Self
    where
        S: Fn(BoxFuture<'static, ()>) + Send + Sync + 'static,
    {
        let (scheduler, apply_loop) = Self::detached(config, spawner);
        (scheduler.inner.spawner)(apply_loop.run().boxed());
        scheduler
    }

    /// Create a scheduler whose apply context is driven by the caller.
    ///
    /// Nothing on [`ExecContext::Apply`] runs until the returned
    /// [`ApplyLoop`] is polled, typically on the host's UI thread.
    pub fn detached<S>(config: SchedulerConfig, spawner: S) -> (Self, ApplyLoop)
    where
        S: Fn(BoxFuture<'static, ()>) + Send + Sync + 'static,
    {
        let (apply_tx, apply_rx) = mpsc::unbounded();
        let scheduler = Self {
            inner: Arc::new(Inner {
                config,
                spawner: Arc::new(spawner),
                apply_tx,
                graph: Mutex::new(Graph::default()),
            }),
        };
        (scheduler, ApplyLoop { jobs: apply_rx })
    }

    /// Start a new batch of tasks.
    pub fn batch(&self) -> Batch<'_> {
        Batch::new(self)
    }

    /// Submit a single worker task with no dependencies.
    pub fn spawn<Tk: Task>(&self, task: Tk) -> TaskHandle {
        self.spawn_on(ExecContext::Worker, task)
    }

    /// Submit a single task with no dependencies on the given context.
    pub fn spawn_on<Tk: Task>(&self, context: ExecContext, task: Tk) -> TaskHandle {
        let mut batch = self.batch();
        let handle = batch.add_task(task).on(context).handle();
        batch.submit();
        handle
    }

    /// Number of submitted tasks that have not completed yet.
    pub fn live_tasks(&self) -> usize {
        self.inner.graph.lock().nodes.len()
    }

    /// Number of worker-context tasks currently running.
    pub fn running_workers(&self) -> usize {
        self.inner.graph.lock().running_workers
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub(crate) fn submit(&self, entries: Vec<Entry>) -> Vec<TaskHandle> {
        let handles: Vec<TaskHandle> = entries.iter().map(|entry| entry.handle.clone()).collect();

        #[cfg(feature = "tracing")]
        debug!(task_count = entries.len(), "submitting batch");

        let jobs = {
            let mut graph = self.inner.graph.lock();

            let mut wiring = Vec::with_capacity(entries.len());
            for entry in entries {
                let id = entry.handle.id();
                graph.nodes.insert(
                    id,
                    Node {
                        handle: entry.handle,
                        task: Some(entry.task),
                        context: entry.context,
                        pending: 0,
                    },
                );
                wiring.push((id, entry.deps));
            }

            for (id, deps) in wiring {
                let mut pending = 0;
                for dep in deps {
                    // Finished but not yet completed counts as done: completion
                    // cannot decrement an edge registered after it ran.
                    if dep.is_finished() {
                        continue;
                    }
                    if graph.nodes.contains_key(&dep.id()) {
                        pending += 1;
                        graph.dependents.entry(dep.id()).or_default().push(id);
                    } else {
                        #[cfg(feature = "tracing")]
                        warn!(
                            task_id = id.as_usize(),
                            dependency_id = dep.id().as_usize(),
                            "dependency is not known to this scheduler; ignoring it"
                        );
                    }
                }

                if let Some(node) = graph.nodes.get_mut(&id) {
                    node.pending = pending;
                }
                if pending == 0 {
                    graph.make_ready(id);
                }
            }

            self.inner.take_jobs(&mut graph)
        };

        self.inner.launch(jobs);
        handles
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let graph = self.inner.graph.lock();
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("live_tasks", &graph.nodes.len())
            .field("running_workers", &graph.running_workers)
            .finish()
    }
}

impl Inner {
    /// Pop every task that may start now. Must be called with the graph locked.
    fn take_jobs(self: &Arc<Self>, graph: &mut Graph) -> Jobs {
        let mut jobs = Jobs::default();
        let limit = self.config.worker_limit();

        while limit.map_or(true, |max| graph.running_workers < max) {
            let Some(id) = graph.ready_workers.pop_front() else {
                break;
            };
            if let Some(job) = self.job(graph, id) {
                graph.running_workers += 1;
                jobs.workers.push(job);
            }
        }

        let ready_apply = std::mem::take(&mut graph.ready_apply);
        for id in ready_apply {
            if let Some(job) = self.job(graph, id) {
                jobs.apply.push(job);
            }
        }

        jobs
    }

    fn job(self: &Arc<Self>, graph: &mut Graph, id: TaskId) -> Option<BoxFuture<'static, ()>> {
        let node = graph.nodes.get_mut(&id)?;
        let task = node.task.take()?;
        let completion = Completion {
            inner: Arc::clone(self),
            handle: node.handle.clone(),
            context: node.context,
        };

        #[cfg(feature = "tracing")]
        trace!(task_id = id.as_usize(), context = ?node.context, "dispatching task");

        Some(execute(completion, task).boxed())
    }

    /// Hand jobs to their contexts. Must be called without the graph locked.
    fn launch(&self, jobs: Jobs) {
        for job in jobs.workers {
            (self.spawner)(job);
        }
        for job in jobs.apply {
            if self.apply_tx.unbounded_send(job).is_err() {
                // Dropping the job cancels and completes it through its Completion
                #[cfg(feature = "tracing")]
                error!("apply context is gone; cancelling apply task");
            }
        }
    }

    fn complete(self: &Arc<Self>, id: TaskId, context: ExecContext) {
        let jobs = {
            let mut graph = self.graph.lock();
            graph.nodes.remove(&id);
            if context == ExecContext::Worker {
                graph.running_workers = graph.running_workers.saturating_sub(1);
            }

            let dependents = graph.dependents.remove(&id).unwrap_or_default();
            for dependent in dependents {
                let now_ready = match graph.nodes.get_mut(&dependent) {
                    Some(node) => {
                        node.pending = node.pending.saturating_sub(1);
                        node.pending == 0
                    }
                    None => false,
                };
                if now_ready {
                    graph.make_ready(dependent);
                }
            }

            self.take_jobs(&mut graph)
        };

        #[cfg(feature = "tracing")]
        trace!(task_id = id.as_usize(), "task completed");

        self.launch(jobs);
    }
}

/// Completion bookkeeping for one dispatched task.
///
/// Lives inside the job future, so it runs however the job ends: normally,
/// by panic, or by being dropped unpolled (runtime shutdown, apply loop gone).
struct Completion {
    inner: Arc<Inner>,
    handle: TaskHandle,
    context: ExecContext,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            self.handle.cancel();
            if !self.handle.start() {
                self.handle.finish();
            }
        }
        self.inner.complete(self.handle.id(), self.context);
    }
}

async fn execute(completion: Completion, task: Box<dyn Task>) {
    let handle = completion.handle.clone();

    if !handle.start() {
        #[cfg(feature = "tracing")]
        trace!(task_id = handle.id().as_usize(), "skipping cancelled task");
        return;
    }

    #[cfg(feature = "tracing")]
    trace!(task_id = handle.id().as_usize(), "task started");

    let body = {
        let handle = handle.clone();
        async move { task.run(handle).await }
    };

    if let Err(_panic_payload) = AssertUnwindSafe(body).catch_unwind().await {
        #[cfg(feature = "tracing")]
        {
            let panic_message = if let Some(s) = _panic_payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = _panic_payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            error!(
                task_id = handle.id().as_usize(),
                panic_message = %panic_message,
                "task panicked during execution"
            );
        }
    }

    handle.finish();
    drop(completion);
}

/// The serial apply context.
///
/// Returned by [`Scheduler::detached`]. Poll [`ApplyLoop::run`] on the thread
/// that owns caller-visible state; apply tasks run there one at a time, in
/// the order they became ready. The loop ends once every scheduler handle
/// and every in-flight task is gone.
pub struct ApplyLoop {
    jobs: mpsc::UnboundedReceiver<BoxFuture<'static, ()>>,
}

impl ApplyLoop {
    pub async fn run(mut self) {
        while let Some(job) = self.jobs.next().await {
            job.await;
        }
    }
}

impl std::fmt::Debug for ApplyLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyLoop").finish_non_exhaustive()
    }
}
