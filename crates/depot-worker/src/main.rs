//! # Depot Worker
//!
//! Worker process for the Depot job queue. Without a subcommand it runs the
//! worker pool and the cron scheduler until SIGINT or SIGTERM; the remaining
//! subcommands are one-shot admin tasks against the same database.

use clap::Parser;
use depot_config::{AppConfig, ConfigLoader};
use depot_core::{init_tracing, DepotError, DepotResult, LogFormat};
use depot_jobs::{
    register_builtin, register_metrics, HandlerRegistry, JobQueue, JobsConfig, MySqlJobStore,
    NewJob, ScheduledJob, Scheduler, WorkerPool, WorkerPoolConfig,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Application error: {}", e);
        eprintln!("depot-worker: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> DepotResult<()> {
    let loader = match &cli.config_dir {
        Some(dir) => ConfigLoader::new(dir.to_string_lossy().into_owned())?,
        None => ConfigLoader::from_default_location()?,
    };
    let config = loader.get().clone();
    let jobs: JobsConfig = loader.section("jobs")?;
    jobs.validate()?;

    let log_format: LogFormat = config.observability.log_format.parse()?;
    init_tracing(&config.observability.log_level, log_format)?;

    info!("Starting Depot worker...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        environment = %loader.environment(),
        config_dir = %loader.config_dir(),
        files = ?loader.files(),
        "Configuration loaded"
    );

    let store = Arc::new(MySqlJobStore::connect(&config.database).await?);
    if config.database.run_migrations {
        store.run_migrations().await?;
    }
    let queue = JobQueue::from_config(store.clone(), &jobs.queue);

    let result = match cli.command() {
        Command::Run => run_worker(&config, &jobs, queue).await,
        Command::Stats => print_stats(&queue).await,
        Command::Cleanup { days } => {
            cleanup(&queue, days.unwrap_or(jobs.queue.retention_days)).await
        }
        Command::Submit {
            job_type,
            payload,
            priority,
            delay_secs,
        } => submit(&queue, job_type, &payload, priority, delay_secs).await,
    };

    store.close().await;
    result
}

/// Runs the worker pool and scheduler until a shutdown signal arrives.
async fn run_worker(config: &AppConfig, jobs: &JobsConfig, queue: JobQueue) -> DepotResult<()> {
    if config.observability.metrics_enabled {
        install_metrics_exporter(&config.observability.metrics_addr)?;
    }

    let registry = register_builtin(HandlerRegistry::builder(), &queue, &jobs.queue).build();
    info!(handlers = ?registry.job_types(), "Handlers registered");

    let pool = WorkerPool::new(
        queue.clone(),
        registry,
        WorkerPoolConfig::from(&jobs.worker),
    );
    pool.start()?;

    let scheduler = if jobs.scheduler.enabled {
        let scheduler = Arc::new(Scheduler::new(queue));
        scheduler.register(ScheduledJob::cleanup(&jobs.scheduler, &jobs.queue)?);

        let handle = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.start().await }
        });
        Some((scheduler, handle))
    } else {
        info!("Scheduler disabled");
        None
    };

    shutdown_signal().await;

    if let Some((scheduler, handle)) = scheduler {
        scheduler.stop();
        match handle.await {
            Ok(Err(e)) => warn!(error = %e, "Scheduler exited with error"),
            Err(e) => warn!(error = %e, "Scheduler task panicked"),
            Ok(Ok(())) => {}
        }
    }
    pool.shutdown().await;

    info!("Worker shutdown complete");
    Ok(())
}

async fn print_stats(queue: &JobQueue) -> DepotResult<()> {
    let stats = queue.stats().await?;
    let json = serde_json::to_string_pretty(&stats)
        .map_err(|e| DepotError::internal(format!("Failed to encode stats: {}", e)))?;
    println!("{}", json);
    Ok(())
}

async fn cleanup(queue: &JobQueue, days: u32) -> DepotResult<()> {
    let deleted = queue.cleanup(days).await?;
    info!(retention_days = days, deleted, "Cleanup finished");
    println!("{}", deleted);
    Ok(())
}

async fn submit(
    queue: &JobQueue,
    job_type: String,
    payload: &str,
    priority: Option<i32>,
    delay_secs: Option<u64>,
) -> DepotResult<()> {
    let payload = serde_json::from_str(payload)
        .map_err(|e| DepotError::validation(format!("Payload is not valid JSON: {}", e)))?;

    let mut job = NewJob::new(job_type, payload);
    if let Some(priority) = priority {
        job = job.priority(priority);
    }
    if let Some(secs) = delay_secs {
        job = job.delay(Duration::from_secs(secs));
    }

    let id = queue.submit_with(job).await?;
    println!("{}", id);
    Ok(())
}

fn install_metrics_exporter(addr: &str) -> DepotResult<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| DepotError::configuration(format!("Invalid metrics_addr {}: {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| DepotError::internal(format!("Failed to install metrics exporter: {}", e)))?;

    register_metrics();
    info!("Serving Prometheus metrics on http://{}/metrics", addr);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
