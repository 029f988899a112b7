//! Error types for delayed-worker operations.
//!
//! Defines error types for each subsystem:
//! - Durable store access (Redis or in-memory)
//! - Worker pool lifecycle
//! - Task function execution and result marshaling
//! - Orchestrator startup and shutdown

use thiserror::Error;

/// Errors that can occur while talking to the task store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the store.
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to serialize or deserialize store data.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No message stored under the given task id.
    #[error("Message for task '{0}' not found")]
    MissingMessage(String),

    /// The store rejected the operation for another reason.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool was configured without workers.
    #[error("Pool size must be at least 1")]
    NoWorkers,

    /// Pool has not been started.
    #[error("Pool is not running")]
    NotRunning,

    /// Pool is shutting down and no longer accepts tasks.
    #[error("Pool is closed, task '{0}' rejected")]
    Closed(String),

    /// A pool loop panicked or was cancelled.
    #[error("Pool loop failed: {0}")]
    LoopFailed(String),
}

/// Errors produced while running a single task.
///
/// Every variant ends up as the `msg` of a `"Fail"` result envelope, so the
/// `Display` output is what operators read in the result store.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The registered function returned an error.
    #[error("{0}")]
    Function(String),

    /// The registered function panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The function succeeded but its result could not be serialized.
    #[error("failed to marshal result: {0}")]
    Marshal(#[source] serde_json::Error),

    /// No function is registered under the requested name.
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    /// The blocking thread running the task was cancelled.
    #[error("task execution cancelled: {0}")]
    Cancelled(String),
}

/// Errors surfaced by the top-level worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Background loop failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display_is_envelope_text() {
        assert_eq!(TaskError::Function("boom".to_string()).to_string(), "boom");
        assert_eq!(
            TaskError::UnknownTaskType("resize".to_string()).to_string(),
            "unknown task type: resize"
        );
        assert!(TaskError::Panicked("index out of bounds".to_string())
            .to_string()
            .contains("index out of bounds"));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::MissingMessage("abc".to_string());
        assert!(err.to_string().contains("abc"));

        let err = StoreError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_pool_error_display() {
        assert!(PoolError::AlreadyRunning.to_string().contains("already running"));
        assert!(PoolError::NotRunning.to_string().contains("not running"));
        assert!(PoolError::Closed("t-1".to_string()).to_string().contains("t-1"));
    }
}
