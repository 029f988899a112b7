//! Worker pool fed by an aging priority queue.
//!
//! The pool owns the function registry, the shared queue, a bounded hand-off
//! channel and a fixed set of workers. One dispatcher loop drains the queue
//! into the hand-off channel; each worker runs the tasks it receives and
//! reports `(task id, envelope)` on the result channel.
//!
//! # Features
//!
//! - Fixed number of workers, each an independent async task
//! - Task functions run on the blocking thread pool
//! - Dispatcher never holds the queue lock across a channel send
//! - Two completion barriers sequence the graceful shutdown
//! - Pool statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::aging_queue::{Popped, SharedQueue};
use super::barrier::{CompletionBarrier, CompletionTicket};
use super::message::{Payload, ResultEnvelope};
use super::registry::FunctionRegistry;
use super::task::Task;
use crate::config::WorkerConfig;
use crate::error::{PoolError, TaskError};

/// Sending half of the result channel.
pub type ResultSender = mpsc::Sender<TaskReport>;

/// Receiving half of the result channel.
pub type ResultReceiver = mpsc::Receiver<TaskReport>;

/// Creates the channel workers report results on.
pub fn result_channel(capacity: usize) -> (ResultSender, ResultReceiver) {
    mpsc::channel(capacity.max(1))
}

/// A finished task on its way to the result store.
///
/// Carries the result-write ticket; the writer signals it once the envelope
/// has been persisted (or dropped).
#[derive(Debug)]
pub struct TaskReport {
    pub task_id: String,
    pub envelope: ResultEnvelope,
    ticket: CompletionTicket,
}

impl TaskReport {
    /// Marks the result as written.
    pub fn written(self) {
        self.ticket.signal();
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently running a task.
    pub active_workers: usize,
    /// Tasks waiting in the priority queue.
    pub queued_tasks: usize,
    /// Tasks that produced a `"Success"` envelope.
    pub tasks_succeeded: u64,
    /// Tasks that produced a `"Fail"` envelope.
    pub tasks_failed: u64,
    /// Average task run duration.
    pub average_task_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of tasks processed (succeeded + failed).
    pub fn total_processed(&self) -> u64 {
        self.tasks_succeeded + self.tasks_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.tasks_succeeded as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            tasks_succeeded: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record(&self, success: bool, duration: Duration) {
        if success {
            self.tasks_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize, queued_tasks: usize) -> PoolStats {
        let succeeded = self.tasks_succeeded.load(Ordering::SeqCst);
        let failed = self.tasks_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total = succeeded + failed;
        let average_duration = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            queued_tasks,
            tasks_succeeded: succeeded,
            tasks_failed: failed,
            average_task_duration: average_duration,
        }
    }
}

/// Handle for submitting tasks into a running pool.
///
/// Cheap to clone. Obtained from [`WorkerPool::run`] or
/// [`WorkerPool::submitter`].
#[derive(Clone)]
pub struct TaskSubmitter {
    queue: Arc<SharedQueue<Task>>,
    registry: Arc<FunctionRegistry>,
    task_barrier: CompletionBarrier,
}

impl TaskSubmitter {
    /// Queues a task.
    ///
    /// Never waits for a free worker. An unknown `function_name` is still
    /// queued; it fails with `unknown task type` when a worker picks it up.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Closed` once the pool has begun shutting down.
    pub fn add_task(
        &self,
        task_id: impl Into<String>,
        function_name: impl Into<String>,
        args: Payload,
        priority: f64,
    ) -> Result<(), PoolError> {
        let task_id = task_id.into();
        let function_name = function_name.into();
        let function = match self.registry.lookup(&function_name) {
            Ok(function) => Some(function),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Queueing task with no registered function");
                None
            }
        };

        debug!(task_id = %task_id, function = %function_name, priority, "Adding task");

        let task = Task::new(
            task_id,
            function_name,
            function,
            args,
            priority,
            self.task_barrier.register(),
        );
        self.queue
            .push(priority, task)
            .map_err(|task| PoolError::Closed(task.id().to_string()))
    }

    /// Number of tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Pool of workers executing tasks from the aging priority queue.
pub struct WorkerPool {
    size: usize,
    dispatch_interval: Duration,
    registry: FunctionRegistry,
    queue: Arc<SharedQueue<Task>>,
    wake_dispatcher: Arc<Notify>,
    task_barrier: CompletionBarrier,
    write_barrier: CompletionBarrier,
    results_tx: Option<ResultSender>,
    submitter: Option<TaskSubmitter>,
    dispatcher_handle: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
}

impl WorkerPool {
    /// Creates a pool that reports results on `results_tx`.
    ///
    /// Uses `config.size` workers and `config.dispatch_interval` as the
    /// dispatcher's idle sleep.
    pub fn new(config: &WorkerConfig, results_tx: ResultSender) -> Self {
        Self {
            size: config.size,
            dispatch_interval: config.dispatch_interval,
            registry: FunctionRegistry::new(),
            queue: Arc::new(SharedQueue::new()),
            wake_dispatcher: Arc::new(Notify::new()),
            task_barrier: CompletionBarrier::new("tasks"),
            write_barrier: CompletionBarrier::new("result-writes"),
            results_tx: Some(results_tx),
            submitter: None,
            dispatcher_handle: None,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
        }
    }

    /// Registers a task function.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` once the pool has started; the
    /// registry is read-only from then on.
    pub fn register_task_function<F, T, E>(
        &mut self,
        name: impl Into<String>,
        function: F,
    ) -> Result<(), PoolError>
    where
        F: Fn(&Payload) -> Result<T, E> + Send + Sync + 'static,
        T: serde::Serialize,
        E: std::fmt::Display,
    {
        if self.is_running() {
            return Err(PoolError::AlreadyRunning);
        }
        self.registry.register(name, function);
        Ok(())
    }

    /// Starts the workers and the dispatcher. Returns immediately.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if called twice and
    /// `PoolError::NoWorkers` for a zero-sized pool.
    pub fn run(&mut self) -> Result<TaskSubmitter, PoolError> {
        if self.is_running() {
            return Err(PoolError::AlreadyRunning);
        }
        if self.size == 0 {
            return Err(PoolError::NoWorkers);
        }
        let results_tx = self.results_tx.clone().ok_or(PoolError::NotRunning)?;

        let registry = Arc::new(std::mem::take(&mut self.registry));
        let (task_tx, task_rx) = mpsc::channel::<Task>(1);
        let task_rx = Arc::new(Mutex::new(task_rx));

        for i in 0..self.size {
            let worker = Worker {
                id: format!("worker-{}", i),
                tasks: Arc::clone(&task_rx),
                results: results_tx.clone(),
                write_barrier: self.write_barrier.clone(),
                stats: Arc::clone(&self.stats),
            };
            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        let dispatcher = Dispatcher {
            queue: Arc::clone(&self.queue),
            tasks: task_tx,
            wake: Arc::clone(&self.wake_dispatcher),
            idle_interval: self.dispatch_interval,
        };
        self.dispatcher_handle = Some(tokio::spawn(dispatcher.run()));

        let submitter = TaskSubmitter {
            queue: Arc::clone(&self.queue),
            registry,
            task_barrier: self.task_barrier.clone(),
        };
        self.submitter = Some(submitter.clone());

        info!(num_workers = self.size, "Worker pool started");
        Ok(submitter)
    }

    /// Returns a submission handle for a running pool.
    pub fn submitter(&self) -> Result<TaskSubmitter, PoolError> {
        self.submitter.clone().ok_or(PoolError::NotRunning)
    }

    /// Gracefully shuts the pool down.
    ///
    /// Stops accepting tasks, lets the dispatcher hand every queued task to a
    /// worker and close the hand-off channel, waits for all tasks to finish,
    /// closes the result channel and waits until every result has been
    /// written. Consumes the pool.
    ///
    /// A task function that never returns blocks this forever.
    pub async fn shutdown(mut self) -> Result<PoolStats, PoolError> {
        let Some(dispatcher) = self.dispatcher_handle.take() else {
            return Err(PoolError::NotRunning);
        };

        info!(queued = self.queue.len(), "Closing task queue");
        self.queue.close();
        self.wake_dispatcher.notify_one();
        dispatcher
            .await
            .map_err(|e| PoolError::LoopFailed(format!("dispatcher: {}", e)))?;

        debug!(pending = self.task_barrier.pending(), "Waiting for in-flight tasks");
        self.task_barrier.wait().await;

        for handle in self.worker_handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked during shutdown");
            }
        }

        info!("Closing result channel");
        self.submitter = None;
        drop(self.results_tx.take());

        debug!(pending = self.write_barrier.pending(), "Waiting for result writes");
        self.write_barrier.wait().await;

        let stats = self.stats();
        info!(
            succeeded = stats.tasks_succeeded,
            failed = stats.tasks_failed,
            "Worker pool shutdown complete"
        );
        Ok(stats)
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.size, self.queue.len())
    }

    /// Returns whether the pool has been started.
    pub fn is_running(&self) -> bool {
        self.dispatcher_handle.is_some()
    }
}

/// Moves tasks from the priority queue onto the hand-off channel.
struct Dispatcher {
    queue: Arc<SharedQueue<Task>>,
    tasks: mpsc::Sender<Task>,
    wake: Arc<Notify>,
    idle_interval: Duration,
}

impl Dispatcher {
    /// Dispatch loop. Exits once the queue is closed and drained, dropping
    /// the sender and with it the hand-off channel.
    ///
    /// A channel slot is reserved before popping, so a task only leaves the
    /// queue (and ages the rest) once a worker can take it next. The queue
    /// lock is never held across an await.
    async fn run(self) {
        loop {
            let permit = self.tasks.reserve().await.ok();
            match self.queue.pop() {
                Popped::Entry(entry) => match permit {
                    Some(permit) => {
                        trace!(
                            task_id = %entry.item.id(),
                            submitted_priority = entry.item.priority(),
                            priority = entry.priority,
                            remaining = self.queue.len(),
                            "Dispatching task"
                        );
                        permit.send(entry.item);
                    }
                    None => {
                        error!(task_id = %entry.item.id(), "Hand-off channel closed, dropping task");
                    }
                },
                Popped::Empty => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.idle_interval) => {}
                        _ = self.wake.notified() => {}
                    }
                }
                Popped::Drained => break,
            }
        }
        debug!("Dispatcher stopped");
    }
}

/// A single worker consuming the hand-off channel.
struct Worker {
    id: String,
    tasks: Arc<Mutex<mpsc::Receiver<Task>>>,
    results: ResultSender,
    write_barrier: CompletionBarrier,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    /// Main worker loop. Ends when the hand-off channel closes.
    async fn run(self) {
        debug!(worker_id = %self.id, "Worker started");

        loop {
            let task = {
                let mut tasks = self.tasks.lock().await;
                tasks.recv().await
            };
            let Some(task) = task else {
                break;
            };
            self.process_task(task).await;
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    async fn process_task(&self, task: Task) {
        let task_id = task.id().to_string();
        let function_name = task.function_name().to_string();

        // Registered before the task signals completion, so once the task
        // barrier is clear every pending write is already counted.
        let write_ticket = self.write_barrier.register();

        self.stats.increment_active();
        let start_time = Instant::now();

        let outcome = match tokio::task::spawn_blocking(move || task.run()).await {
            Ok(outcome) => outcome,
            Err(e) => Err(TaskError::Cancelled(e.to_string())),
        };

        let duration = start_time.elapsed();
        self.stats.decrement_active();

        let envelope = ResultEnvelope::from_outcome(&outcome);
        self.stats.record(envelope.is_success(), duration);

        match &outcome {
            Ok(_) => info!(
                worker_id = %self.id,
                task_id = %task_id,
                function = %function_name,
                duration_ms = duration.as_millis(),
                "Task succeeded"
            ),
            Err(e) => warn!(
                worker_id = %self.id,
                task_id = %task_id,
                function = %function_name,
                error = %e,
                "Task failed"
            ),
        }

        let report = TaskReport {
            task_id,
            envelope,
            ticket: write_ticket,
        };
        if let Err(mpsc::error::SendError(report)) = self.results.send(report).await {
            error!(
                worker_id = %self.id,
                task_id = %report.task_id,
                "Result channel closed, dropping result"
            );
        }
    }
}
