//! Producer side: schedule tasks and read back their results.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::{StoreKeys, WorkerConfig};
use crate::error::StoreError;
use crate::scheduler::{Payload, ResultEnvelope, TaskMessage};
use crate::store::{RedisStore, TaskStore};

/// Schedules tasks for a worker reading the same namespace.
pub struct Producer<S> {
    store: Arc<S>,
    keys: StoreKeys,
}

impl Producer<RedisStore> {
    /// Connects to the Redis server described by `config`.
    pub async fn connect(config: &WorkerConfig) -> Result<Self, StoreError> {
        let store = RedisStore::connect(&config.redis_url()).await?;
        Ok(Self::new(Arc::new(store), config.keys()))
    }
}

impl<S: TaskStore> Producer<S> {
    pub fn new(store: Arc<S>, keys: StoreKeys) -> Self {
        Self { store, keys }
    }

    /// Schedules `task` to run after `delay`. Returns the generated task id.
    pub async fn enqueue(
        &self,
        task: &str,
        args: Payload,
        priority: f64,
        delay: Duration,
    ) -> Result<String, StoreError> {
        let delay = i64::try_from(delay.as_secs()).unwrap_or(i64::MAX);
        let execute_at = Utc::now().timestamp().saturating_add(delay);
        self.schedule(task, args, priority, execute_at).await
    }

    /// Schedules `task` to run at `at`. Returns the generated task id.
    pub async fn enqueue_at(
        &self,
        task: &str,
        args: Payload,
        priority: f64,
        at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        self.schedule(task, args, priority, at.timestamp()).await
    }

    /// Reads the result envelope for `task_id`, if one has been written.
    pub async fn result(&self, task_id: &str) -> Result<Option<ResultEnvelope>, StoreError> {
        match self.store.get_result(&self.keys.results, task_id).await? {
            Some(raw) => Ok(Some(ResultEnvelope::decode(&raw)?)),
            None => Ok(None),
        }
    }

    // The message goes in before the schedule entry so a broker never sees
    // an id without its message.
    async fn schedule(
        &self,
        task: &str,
        args: Payload,
        priority: f64,
        execute_at: i64,
    ) -> Result<String, StoreError> {
        let task_id = Uuid::new_v4().to_string();
        let message = TaskMessage::new(task, args).with_priority(priority).encode()?;

        self.store
            .put_message(&self.keys.messages, &task_id, &message)
            .await?;
        self.store
            .add_to_schedule(&self.keys.schedule, &task_id, execute_at)
            .await?;

        debug!(task_id = %task_id, task, priority, execute_at, "Task scheduled");
        Ok(task_id)
    }
}
