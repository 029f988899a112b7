//! CLI command definitions for delayed-worker.
//!
//! `run` starts a worker with the built-in task functions, `enqueue`
//! schedules a task and `result` prints a stored result envelope. Store
//! connection flags fall back to `DELAYED_WORKER_*` environment variables.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use super::tasks;
use crate::config::{DecodeFailurePolicy, WorkerConfig};
use crate::producer::Producer;
use crate::scheduler::{Payload, Worker};

/// Default number of pool workers.
const DEFAULT_WORKERS: &str = "4";

/// Delayed task worker backed by Redis.
#[derive(Parser)]
#[command(name = "delayed-worker")]
#[command(about = "Run delayed tasks scheduled in Redis on a local worker pool")]
#[command(version)]
#[command(
    long_about = "delayed-worker polls a Redis sorted set for tasks whose execute-at time has passed, runs them on a priority-ordered worker pool and writes each result back to Redis.\n\nExample usage:\n  delayed-worker run --workers 8\n  delayed-worker enqueue echo --args '{\"x\":1}' --delay-secs 30\n  delayed-worker result <task-id>"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Start a worker and run due tasks until SIGINT or SIGTERM.
    Run(RunArgs),

    /// Schedule a task.
    Enqueue(EnqueueArgs),

    /// Print the stored result of a task.
    #[command(name = "result")]
    GetResult(ResultArgs),
}

/// Store connection flags shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    /// Redis address as host:port.
    #[arg(long, env = "DELAYED_WORKER_ADDRESS", default_value = "127.0.0.1:6379")]
    pub address: String,

    /// Redis password.
    #[arg(long, env = "DELAYED_WORKER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Redis database index.
    #[arg(long, env = "DELAYED_WORKER_DB", default_value = "0")]
    pub db: i64,

    /// Prefix for all store keys.
    #[arg(long, env = "DELAYED_WORKER_NAMESPACE", default_value = "delayed-worker")]
    pub namespace: String,
}

impl StoreArgs {
    fn to_config(&self, size: usize) -> WorkerConfig {
        let config = WorkerConfig::new(size)
            .with_address(self.address.clone())
            .with_db(self.db)
            .with_namespace(self.namespace.clone());
        match &self.password {
            Some(password) => config.with_password(password.clone()),
            None => config,
        }
    }
}

/// Arguments for `delayed-worker run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Number of concurrent workers.
    #[arg(short = 'w', long, env = "DELAYED_WORKER_SIZE", default_value = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Milliseconds between store polls.
    #[arg(long, default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Milliseconds the dispatcher sleeps when the queue is empty.
    #[arg(long, default_value = "1000")]
    pub dispatch_interval_ms: u64,

    /// What to do with undecodable messages (discard, retain).
    #[arg(long, default_value = "discard")]
    pub decode_failure: DecodeFailurePolicy,
}

/// Arguments for `delayed-worker enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Registered task function name.
    pub task: String,

    /// Task arguments as JSON.
    #[arg(short, long, default_value = "null")]
    pub args: String,

    /// Priority; lower runs sooner.
    #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
    pub priority: f64,

    /// Seconds from now until the task becomes due.
    #[arg(short, long, default_value = "0")]
    pub delay_secs: u64,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `delayed-worker result`.
#[derive(Parser, Debug)]
pub struct ResultArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Task id printed by `enqueue`.
    pub id: String,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments without executing any command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_worker_command(args).await,
        Commands::Enqueue(args) => run_enqueue_command(args).await,
        Commands::GetResult(args) => run_result_command(args).await,
    }
}

async fn run_worker_command(args: RunArgs) -> anyhow::Result<()> {
    let config = args
        .store
        .to_config(args.workers)
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
        .with_dispatch_interval(Duration::from_millis(args.dispatch_interval_ms))
        .with_decode_failure(args.decode_failure);

    info!(
        address = %config.address,
        namespace = %config.namespace,
        workers = config.size,
        "Starting worker"
    );

    let mut worker = Worker::connect(config)
        .await
        .context("Failed to connect to Redis")?;
    tasks::register_builtins(&mut worker)?;

    let stats = worker.run_until(shutdown_signal()).await?;
    info!(
        processed = stats.total_processed(),
        success_rate = %format!("{:.1}%", stats.success_rate()),
        avg_ms = stats.average_task_duration.as_millis(),
        "Worker exited"
    );
    Ok(())
}

async fn run_enqueue_command(args: EnqueueArgs) -> anyhow::Result<()> {
    let payload = Payload::from_json(args.args.clone()).context("--args must be valid JSON")?;
    let producer = Producer::connect(&args.store.to_config(1))
        .await
        .context("Failed to connect to Redis")?;

    let id = producer
        .enqueue(
            &args.task,
            payload,
            args.priority,
            Duration::from_secs(args.delay_secs),
        )
        .await
        .context("Failed to schedule task")?;

    if args.json {
        println!(
            "{}",
            serde_json::json!({ "id": id, "task": args.task, "delay_secs": args.delay_secs })
        );
    } else {
        println!("{}", id);
    }
    Ok(())
}

async fn run_result_command(args: ResultArgs) -> anyhow::Result<()> {
    let producer = Producer::connect(&args.store.to_config(1))
        .await
        .context("Failed to connect to Redis")?;

    match producer.result(&args.id).await? {
        Some(envelope) if args.json => println!("{}", envelope.encode()?),
        Some(envelope) => println!("{}: {}", envelope.status, envelope.msg),
        None => anyhow::bail!("No result stored for task '{}'", args.id),
    }
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
