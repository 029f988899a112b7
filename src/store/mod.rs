//! Durable task store.
//!
//! The engine only needs a handful of operations on a sorted set (the
//! schedule, scored by execute-at unix timestamp) and two hashes (messages and
//! results). [`TaskStore`] captures exactly those, plus the two producer-side
//! writes used by [`crate::producer::Producer`].
//!
//! - [`RedisStore`]: Redis through a reconnecting `ConnectionManager`
//! - [`MemoryStore`]: in-process implementation for tests and local runs
//!
//! # Store Layout
//!
//! - `{namespace}:task:queue`: sorted set of task ids
//! - `{namespace}:task:msg`: hash of task id to submission message
//! - `{namespace}:task:result`: hash of task id to result envelope

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;

use crate::error::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Operations the broker and producer need from the store.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Returns every scheduled id whose score is at most `now`.
    async fn get_due_ids(&self, schedule_key: &str, now: i64) -> Result<Vec<String>, StoreError>;

    /// Removes ids from the schedule.
    async fn remove_from_schedule(
        &self,
        schedule_key: &str,
        ids: &[String],
    ) -> Result<(), StoreError>;

    /// Fetches the serialized submission message for a task.
    ///
    /// Returns `StoreError::MissingMessage` when nothing is stored.
    async fn get_message(&self, message_key: &str, task_id: &str) -> Result<String, StoreError>;

    /// Deletes a task's submission message.
    async fn delete_message(&self, message_key: &str, task_id: &str) -> Result<(), StoreError>;

    /// Writes a serialized result envelope.
    async fn put_result(
        &self,
        result_key: &str,
        task_id: &str,
        envelope: &str,
    ) -> Result<(), StoreError>;

    /// Stores a submission message.
    async fn put_message(
        &self,
        message_key: &str,
        task_id: &str,
        message: &str,
    ) -> Result<(), StoreError>;

    /// Schedules a task id to become due at `execute_at` (unix seconds).
    async fn add_to_schedule(
        &self,
        schedule_key: &str,
        task_id: &str,
        execute_at: i64,
    ) -> Result<(), StoreError>;

    /// Reads a stored result envelope, if any.
    async fn get_result(&self, result_key: &str, task_id: &str)
        -> Result<Option<String>, StoreError>;
}
