//! Broker between the durable store and the worker pool.
//!
//! Every poll interval the broker claims the ids whose scheduled time has
//! passed, removes them from the schedule and hands the batch to a background
//! task that fetches, decodes and submits each message. A separate result
//! writer persists the envelopes coming back from the pool.
//!
//! Store errors never stop the broker: they are logged and the work is
//! retried on the next tick. There is no backoff and no atomic claim, so two
//! brokers on the same schedule may both pick up a task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::message::TaskMessage;
use super::worker_pool::{ResultReceiver, TaskSubmitter};
use crate::config::{DecodeFailurePolicy, StoreKeys, WorkerConfig};
use crate::store::TaskStore;

/// What happened to one due task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Submitted to the pool and removed from the store.
    Queued,
    /// The message could not be fetched; it was deleted anyway.
    FetchFailed,
    /// The message could not be decoded.
    Undecodable,
    /// The pool refused the task; the message was left in place.
    Rejected,
}

/// Per-batch tally of dispatch outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub queued: usize,
    pub fetch_failed: usize,
    pub undecodable: usize,
    pub rejected: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Queued => self.queued += 1,
            DispatchOutcome::FetchFailed => self.fetch_failed += 1,
            DispatchOutcome::Undecodable => self.undecodable += 1,
            DispatchOutcome::Rejected => self.rejected += 1,
        }
    }
}

/// Join handles for the broker's two background loops.
pub struct BrokerHandles {
    /// Poll loop. Finishes after a shutdown request once in-flight batches
    /// have been submitted.
    pub poll: JoinHandle<()>,
    /// Result writer. Finishes when the result channel closes and returns
    /// the number of envelopes written.
    pub writer: JoinHandle<u64>,
}

/// Polls the store for due tasks and feeds them to the pool.
pub struct Broker<S> {
    store: Arc<S>,
    keys: StoreKeys,
    submitter: TaskSubmitter,
    poll_interval: Duration,
    decode_failure: DecodeFailurePolicy,
}

impl<S: TaskStore> Broker<S> {
    pub fn new(store: Arc<S>, submitter: TaskSubmitter, config: &WorkerConfig) -> Self {
        Self {
            store,
            keys: config.keys(),
            submitter,
            poll_interval: config.poll_interval,
            decode_failure: config.decode_failure,
        }
    }

    /// Starts the result writer and the poll loop.
    ///
    /// The poll loop stops when `shutdown` flips to `true` (or its sender is
    /// dropped). The writer keeps draining `results` until the pool closes
    /// the channel.
    pub fn start(self, results: ResultReceiver, shutdown: watch::Receiver<bool>) -> BrokerHandles {
        let writer = ResultWriter::new(Arc::clone(&self.store), self.keys.results.clone());
        let writer = tokio::spawn(writer.run(results));
        let poll = tokio::spawn(Arc::new(self).run(shutdown));
        BrokerHandles { poll, writer }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            schedule = %self.keys.schedule,
            interval_ms = self.poll_interval.as_millis(),
            "Broker started"
        );
        let mut batches = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Some(ids) = self.claim_due().await {
                let broker = Arc::clone(&self);
                batches.spawn(async move { broker.dispatch_batch(ids).await });
            }

            while let Some(joined) = batches.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Dispatch batch panicked");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(in_flight = batches.len(), "Waiting for dispatch batches");
        while let Some(joined) = batches.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Dispatch batch panicked");
            }
        }
        info!("Broker stopped");
    }

    /// Claims every due id: reads them and removes them from the schedule.
    ///
    /// Returns `None` when there is nothing to do or the store failed; the
    /// ids stay scheduled in the latter case and are retried next tick.
    pub async fn claim_due(&self) -> Option<Vec<String>> {
        let now = chrono::Utc::now().timestamp();

        let ids = match self.store.get_due_ids(&self.keys.schedule, now).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to query due tasks");
                return None;
            }
        };
        if ids.is_empty() {
            return None;
        }
        debug!(count = ids.len(), ids = ?ids, "Found due tasks");

        if let Err(e) = self
            .store
            .remove_from_schedule(&self.keys.schedule, &ids)
            .await
        {
            error!(error = %e, count = ids.len(), "Failed to remove due tasks from schedule");
            return None;
        }
        Some(ids)
    }

    /// Fetches, decodes and submits each id in order.
    pub async fn dispatch_batch(&self, ids: Vec<String>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for id in ids {
            summary.record(self.dispatch_one(&id).await);
        }
        if summary != BatchSummary::default() {
            debug!(?summary, "Dispatched batch");
        }
        summary
    }

    async fn dispatch_one(&self, task_id: &str) -> DispatchOutcome {
        let outcome = match self.store.get_message(&self.keys.messages, task_id).await {
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Failed to fetch task message");
                DispatchOutcome::FetchFailed
            }
            Ok(raw) => match TaskMessage::decode(&raw) {
                Err(e) => {
                    warn!(
                        task_id = %task_id,
                        error = %e,
                        policy = ?self.decode_failure,
                        "Undecodable task message"
                    );
                    DispatchOutcome::Undecodable
                }
                Ok(message) => match self.submitter.add_task(
                    task_id,
                    message.task,
                    message.args,
                    message.priority,
                ) {
                    Ok(()) => DispatchOutcome::Queued,
                    Err(e) => {
                        error!(task_id = %task_id, error = %e, "Pool rejected task");
                        DispatchOutcome::Rejected
                    }
                },
            },
        };

        let delete = match outcome {
            DispatchOutcome::Queued | DispatchOutcome::FetchFailed => true,
            DispatchOutcome::Undecodable => self.decode_failure == DecodeFailurePolicy::Discard,
            DispatchOutcome::Rejected => false,
        };
        if delete {
            if let Err(e) = self.store.delete_message(&self.keys.messages, task_id).await {
                error!(task_id = %task_id, error = %e, "Failed to delete task message");
            }
        }
        outcome
    }
}

/// Persists result envelopes to the store.
pub struct ResultWriter<S> {
    store: Arc<S>,
    result_key: String,
}

impl<S: TaskStore> ResultWriter<S> {
    pub fn new(store: Arc<S>, result_key: impl Into<String>) -> Self {
        Self {
            store,
            result_key: result_key.into(),
        }
    }

    /// Writes every report until the channel closes. Each report's
    /// result-write completion is signaled whether or not the write worked.
    pub async fn run(self, mut results: ResultReceiver) -> u64 {
        let mut written = 0;
        while let Some(report) = results.recv().await {
            match report.envelope.encode() {
                Ok(json) => match self
                    .store
                    .put_result(&self.result_key, &report.task_id, &json)
                    .await
                {
                    Ok(()) => {
                        written += 1;
                        debug!(task_id = %report.task_id, status = %report.envelope.status, "Result written");
                    }
                    Err(e) => {
                        error!(task_id = %report.task_id, error = %e, "Failed to write result");
                    }
                },
                Err(e) => {
                    error!(task_id = %report.task_id, error = %e, "Failed to encode result");
                }
            }
            report.written();
        }
        debug!(written, "Result writer stopped");
        written
    }
}
