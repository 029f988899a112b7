//! Command-line interface for delayed-worker.
//!
//! Provides commands for running a worker, scheduling tasks and reading
//! their results.

mod commands;
pub mod tasks;

pub use commands::{parse_cli, run_with_cli, Cli};
