//! Built-in task functions registered by `delayed-worker run`.

use std::convert::Infallible;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::scheduler::{Payload, Worker};
use crate::store::TaskStore;

/// Longest pause the `sleep` task accepts.
const MAX_SLEEP_MS: u64 = 60_000;

#[derive(Debug, Deserialize)]
struct SleepArgs {
    ms: u64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SleepOutput {
    pub slept_ms: u64,
}

/// Returns its arguments unchanged.
pub fn echo(args: &Payload) -> Result<Payload, Infallible> {
    Ok(args.clone())
}

/// Blocks for `{"ms": n}` milliseconds.
pub fn sleep(args: &Payload) -> Result<SleepOutput, String> {
    let SleepArgs { ms } = args
        .parse()
        .map_err(|e| format!("sleep expects {{\"ms\": <number>}}: {}", e))?;
    if ms > MAX_SLEEP_MS {
        return Err(format!("sleep of {}ms exceeds the {}ms limit", ms, MAX_SLEEP_MS));
    }
    std::thread::sleep(Duration::from_millis(ms));
    Ok(SleepOutput { slept_ms: ms })
}

/// Registers `echo` and `sleep`.
pub fn register_builtins<S: TaskStore>(worker: &mut Worker<S>) -> Result<(), WorkerError> {
    worker.register_task_function("echo", echo)?;
    worker.register_task_function("sleep", sleep)?;
    Ok(())
}
