//! Worker: one pool plus one broker sharing a result channel.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::broker::Broker;
use super::message::Payload;
use super::worker_pool::{result_channel, PoolStats, ResultReceiver, WorkerPool};
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::store::{RedisStore, TaskStore};

/// Runs scheduled tasks from a store on a local worker pool.
///
/// Register functions first, then call [`Worker::run_until`]:
///
/// ```rust,ignore
/// let mut worker = Worker::connect(WorkerConfig::new(4)).await?;
/// worker.register_task_function("echo", |args: &Payload| Ok::<_, String>(args.clone()))?;
/// let stats = worker.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
/// ```
pub struct Worker<S> {
    config: WorkerConfig,
    store: Arc<S>,
    pool: WorkerPool,
    results: ResultReceiver,
}

impl Worker<RedisStore> {
    /// Connects to the Redis server described by `config`.
    pub async fn connect(config: WorkerConfig) -> Result<Self, WorkerError> {
        let store = RedisStore::connect(&config.redis_url()).await?;
        Ok(Self::new(config, store))
    }
}

impl<S: TaskStore> Worker<S> {
    pub fn new(config: WorkerConfig, store: S) -> Self {
        let (results_tx, results) = result_channel(config.size.max(1));
        let pool = WorkerPool::new(&config, results_tx);
        Self {
            config,
            store: Arc::new(store),
            pool,
            results,
        }
    }

    /// Registers a task function with the pool.
    pub fn register_task_function<F, T, E>(
        &mut self,
        name: impl Into<String>,
        function: F,
    ) -> Result<(), WorkerError>
    where
        F: Fn(&Payload) -> Result<T, E> + Send + Sync + 'static,
        T: serde::Serialize,
        E: std::fmt::Display,
    {
        self.pool.register_task_function(name, function)?;
        Ok(())
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Shared handle to the underlying store.
    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Runs until `shutdown` resolves, then shuts down gracefully.
    ///
    /// Shutdown order: stop polling and finish in-flight dispatch batches,
    /// shut the pool down (every queued task runs), then wait for the result
    /// writer to drain. Returns the final pool statistics.
    pub async fn run_until<F>(self, shutdown: F) -> Result<PoolStats, WorkerError>
    where
        F: Future<Output = ()>,
    {
        let Worker {
            config,
            store,
            mut pool,
            results,
        } = self;

        let submitter = pool.run()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let handles = Broker::new(store, submitter, &config).start(results, stop_rx);
        info!(
            namespace = %config.namespace,
            num_workers = config.size,
            "Worker running"
        );

        shutdown.await;
        info!("Shutdown requested, stopping broker");

        if stop_tx.send(true).is_err() {
            debug!("Broker poll loop already stopped");
        }
        // Queued tasks still run even if the poll loop died.
        let polled = handles.poll.await;
        if let Err(e) = &polled {
            error!(error = %e, "Broker poll loop failed, draining pool");
        }

        let stats = pool.shutdown().await?;
        let written = handles.writer.await?;
        polled?;

        info!(
            results_written = written,
            succeeded = stats.tasks_succeeded,
            failed = stats.tasks_failed,
            "Worker stopped"
        );
        Ok(stats)
    }

    /// Runs forever.
    pub async fn run(self) -> Result<PoolStats, WorkerError> {
        self.run_until(std::future::pending()).await
    }
}
