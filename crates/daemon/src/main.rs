//! jobq - Main Entry Point
//! Background job engine: SQLite-backed queues + worker pool

mod handlers;
mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobq_core::domain::TaskState;
use jobq_core::port::time_provider::SystemTimeProvider;
use jobq_core::{EnqueueOptions, JobConfig, JobService, TaskPayload, VERSION};
use jobq_infra_sqlite::{create_pool, run_migrations, SqliteQueueStore};

const DEFAULT_LOG_FILTER: &str = "jobq=info,jobq_core=info,jobq_infra_sqlite=info";
const LOG_FORMAT_ENV: &str = "JOBQ_LOG_FORMAT";

#[derive(Parser)]
#[command(name = "jobq", version, about = "Background job engine")]
struct Cli {
    /// Optional TOML configuration file
    #[arg(long, env = "JOBQ_CONFIG", default_value = "jobq.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool until Ctrl+C (default)
    Run,

    /// Enqueue one task and exit
    Enqueue {
        /// Task type, e.g. welcome_email
        #[arg(long = "type")]
        task_type: String,

        #[arg(long, default_value = "default")]
        queue: String,

        /// Raw payload (JSON for the built-in handlers)
        #[arg(long, default_value = "{}")]
        payload: String,

        #[arg(long)]
        max_retries: Option<u32>,

        /// Postpone first delivery
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Print task counts and the dead set per queue
    Inspect {
        /// Limit output to one queue
        #[arg(long)]
        queue: Option<String>,
    },

    /// Delete completed tasks older than `completed_retention_ms` and exit
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = settings::load(&cli.config)?;
    let service = open_service(config).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(service).await,
        Command::Enqueue {
            task_type,
            queue,
            payload,
            max_retries,
            delay_ms,
        } => {
            let mut options = EnqueueOptions::new();
            if let Some(max_retries) = max_retries {
                options = options.max_retries(max_retries);
            }
            if let Some(delay_ms) = delay_ms {
                options = options.delay(Duration::from_millis(delay_ms));
            }

            let result = service
                .enqueue(queue, task_type, TaskPayload::new(payload.into_bytes()), options)
                .await;
            service.stop(Duration::ZERO).await;
            println!("{}", result?);
            Ok(())
        }
        Command::Inspect { queue } => {
            let result = inspect(&service, queue).await;
            service.stop(Duration::ZERO).await;
            result
        }
        Command::Purge => {
            let result = service.purge_completed().await;
            service.stop(Duration::ZERO).await;
            println!("purged {}", result?);
            Ok(())
        }
    }
}

/// Initialize logging: JSON for production, pretty for development
fn init_tracing() {
    let log_format = std::env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| "pretty".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

/// DI wiring: SQLite pool, migrations, store, service
async fn open_service(config: JobConfig) -> Result<JobService> {
    info!(database_url = %config.database_url, "Initializing database...");
    ensure_parent_dir(&config.database_url)?;

    let pool = create_pool(&config.database_url)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    let time_provider = Arc::new(SystemTimeProvider);
    let store = Arc::new(SqliteQueueStore::new(pool, time_provider));
    Ok(JobService::with_defaults(config, store)?)
}

fn ensure_parent_dir(database_url: &str) -> Result<()> {
    let path = match database_url.strip_prefix("sqlite://") {
        Some(rest) => rest.split('?').next().unwrap_or(rest),
        None if database_url.starts_with("sqlite:") => return Ok(()),
        None => database_url,
    };
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

async fn run(service: JobService) -> Result<()> {
    info!("jobq v{} starting...", VERSION);

    handlers::register_all(&service)?;
    service.start().await?;

    info!("System ready. Waiting for tasks...");
    info!("Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Draining workers...");

    let report = service.shutdown().await;
    if !report.drained {
        warn!(
            abandoned_workers = report.abandoned_workers,
            "Drain timeout elapsed; abandoned tasks will be redelivered after their lease expires"
        );
    }
    info!(
        completed = report.stats.completed,
        retried = report.stats.retried,
        dead = report.stats.dead,
        "Shutdown complete."
    );
    Ok(())
}

async fn inspect(service: &JobService, queue: Option<String>) -> Result<()> {
    let queues: Vec<String> = match queue {
        Some(q) => vec![q],
        None => service
            .config()
            .queue_configs()
            .into_iter()
            .map(|q| q.name)
            .collect(),
    };

    let store = service.store();
    for queue in queues {
        let mut counts = Vec::new();
        for state in [
            TaskState::Pending,
            TaskState::Leased,
            TaskState::Completed,
            TaskState::Dead,
        ] {
            counts.push(format!("{}={}", state, store.count_by_state(&queue, state).await?));
        }
        println!("{}: {}", queue, counts.join(" "));

        for task in store.dead_tasks(&queue).await? {
            println!(
                "  dead {} type={} attempts={} error={}",
                task.id,
                task.task_type,
                task.attempt(),
                task.last_error.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}
