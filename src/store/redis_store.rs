//! Redis-backed task store.
//!
//! Uses a `ConnectionManager`, which reconnects on its own; a failed command
//! surfaces as `StoreError::Redis` and the caller retries on its next tick.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::TaskStore;
use crate::error::StoreError;

/// Task store on a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379/0")
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        tracing::debug!("Connected to Redis task store");
        Ok(Self { redis })
    }
}

#[async_trait]
impl TaskStore for RedisStore {
    async fn get_due_ids(&self, schedule_key: &str, now: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn.zrangebyscore(schedule_key, "-inf", now).await?;
        Ok(ids)
    }

    async fn remove_from_schedule(
        &self,
        schedule_key: &str,
        ids: &[String],
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.redis.clone();
        conn.zrem::<_, _, ()>(schedule_key, ids).await?;
        Ok(())
    }

    async fn get_message(&self, message_key: &str, task_id: &str) -> Result<String, StoreError> {
        let mut conn = self.redis.clone();
        let message: Option<String> = conn.hget(message_key, task_id).await?;
        message.ok_or_else(|| StoreError::MissingMessage(task_id.to_string()))
    }

    async fn delete_message(&self, message_key: &str, task_id: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.hdel::<_, _, ()>(message_key, task_id).await?;
        Ok(())
    }

    async fn put_result(
        &self,
        result_key: &str,
        task_id: &str,
        envelope: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.hset::<_, _, _, ()>(result_key, task_id, envelope)
            .await?;
        Ok(())
    }

    async fn put_message(
        &self,
        message_key: &str,
        task_id: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.hset::<_, _, _, ()>(message_key, task_id, message)
            .await?;
        Ok(())
    }

    async fn add_to_schedule(
        &self,
        schedule_key: &str,
        task_id: &str,
        execute_at: i64,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.zadd::<_, _, _, ()>(schedule_key, task_id, execute_at)
            .await?;
        Ok(())
    }

    async fn get_result(
        &self,
        result_key: &str,
        task_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        let envelope: Option<String> = conn.hget(result_key, task_id).await?;
        Ok(envelope)
    }
}
