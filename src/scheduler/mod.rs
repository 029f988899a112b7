//! Delayed task execution: store-backed scheduling and a local worker pool.
//!
//! - **Broker**: polls the store for due task ids, fetches and decodes their
//!   messages, and submits them to the pool
//! - **WorkerPool**: runs tasks on N workers, lowest priority value first,
//!   with aging so nothing starves
//! - **ResultWriter**: persists each task's result envelope
//! - **Worker**: composes the above and owns the shutdown sequence
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────────┐        ┌──────────────────────────────┐
//!    │   Producer   │──────▶ │ Store                        │
//!    │  (API/CLI)   │        │ schedule / messages / results│
//!    └──────────────┘        └───────┬──────────────▲───────┘
//!                                    │ due ids      │ envelopes
//!                             ┌──────▼──────┐ ┌─────┴────────┐
//!                             │   Broker    │ │ ResultWriter │
//!                             └──────┬──────┘ └─────▲────────┘
//!                                    │ add_task     │ TaskReport
//!                             ┌──────▼──────────────┴────────┐
//!                             │ AgingQueue ─▶ Dispatcher ─▶  │
//!                             │ Worker 1 .. Worker N         │
//!                             └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use delayed_worker::config::WorkerConfig;
//! use delayed_worker::scheduler::{Payload, Worker};
//!
//! let mut worker = Worker::connect(WorkerConfig::new(4)).await?;
//! worker.register_task_function("echo", |args: &Payload| Ok::<_, String>(args.clone()))?;
//!
//! // Graceful shutdown on Ctrl-C
//! let stats = worker
//!     .run_until(async { tokio::signal::ctrl_c().await.ok(); })
//!     .await?;
//! ```
//!
//! # Delivery
//!
//! - **At most once**: ids are removed from the schedule before their
//!   messages are fetched, so a crash mid-batch loses those tasks
//! - **No retries**: a failing function produces a `"Fail"` envelope
//! - **Graceful shutdown**: every task queued before shutdown runs and has
//!   its result written

pub mod aging_queue;
pub mod barrier;
pub mod broker;
pub mod message;
pub mod registry;
pub mod task;
pub mod worker;
pub mod worker_pool;

// Re-export main types for convenience
pub use aging_queue::{AgingQueue, SharedQueue, AGING_STEP};
pub use barrier::{CompletionBarrier, CompletionTicket};
pub use broker::{BatchSummary, Broker, BrokerHandles, DispatchOutcome, ResultWriter};
pub use message::{Payload, ResultEnvelope, TaskMessage, TaskStatus};
pub use registry::{FunctionRegistry, TaskFunction};
pub use task::Task;
pub use worker::Worker;
pub use worker_pool::{
    result_channel, PoolStats, ResultReceiver, ResultSender, TaskReport, TaskSubmitter, WorkerPool,
};
