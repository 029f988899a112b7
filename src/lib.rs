//! delayed-worker: Redis-backed delayed task execution.
//!
//! Producers store a task message and schedule its id at an execute-at
//! timestamp. A worker polls for due ids, runs the matching registered
//! function on a priority-ordered pool and writes a result envelope back.

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod producer;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use config::{DecodeFailurePolicy, StoreKeys, WorkerConfig};
pub use error::{PoolError, StoreError, TaskError, WorkerError};
pub use producer::Producer;
pub use scheduler::{Payload, PoolStats, ResultEnvelope, TaskMessage, TaskStatus, Worker, WorkerPool};
pub use store::{MemoryStore, RedisStore, TaskStore};
