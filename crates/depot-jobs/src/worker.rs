//! Worker loop and pool.

use crate::config::WorkerConfig;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId};
use crate::metrics::{JobMetrics, WorkerMetrics};
use crate::queue::{JobQueue, Outcome};
use crate::registry::HandlerRegistry;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// A job the worker took through one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedJob {
    /// Job ID.
    pub job_id: JobId,
    /// Job type.
    pub job_type: String,
    /// What the attempt did.
    pub outcome: Outcome,
}

/// Claims jobs and runs their handlers.
#[derive(Debug, Clone)]
pub struct Worker {
    id: String,
    queue: JobQueue,
    registry: HandlerRegistry,
    allowed_types: Vec<String>,
}

impl Worker {
    /// Creates a worker accepting every job type.
    pub fn new(queue: JobQueue, registry: HandlerRegistry) -> Self {
        Self {
            id: format!("worker-{}", Uuid::new_v4()),
            queue,
            registry,
            allowed_types: Vec::new(),
        }
    }

    /// Restricts the worker to `types` (empty = all).
    pub fn with_allowed_types(mut self, types: Vec<String>) -> Self {
        self.allowed_types = types;
        self
    }

    fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }

    /// Worker ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Claims one job and dispatches it. Returns `None` if nothing was eligible.
    pub async fn process_next(&self) -> JobResult<Option<ProcessedJob>> {
        let Some(job) = self.queue.claim(&self.allowed_types).await? else {
            return Ok(None);
        };

        let outcome = self.dispatch(&job).await?;

        Ok(Some(ProcessedJob {
            job_id: job.id,
            job_type: job.job_type,
            outcome,
        }))
    }

    /// Runs the handler for a claimed job and records the outcome.
    ///
    /// Handler errors and panics never escape; they become a failed attempt.
    pub async fn dispatch(&self, job: &Job) -> JobResult<Outcome> {
        let Some(handler) = self.registry.get(&job.job_type) else {
            let err = JobError::NoHandler(job.job_type.clone());
            error!(
                worker_id = %self.id,
                job_id = %job.id,
                job_type = %job.job_type,
                "No handler registered for job type"
            );
            return self.queue.fail(job.id, &err.to_string(), false).await;
        };

        debug!(
            worker_id = %self.id,
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            "Processing job"
        );

        let started = Instant::now();
        let result = AssertUnwindSafe(handler.handle(job.payload.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(JobError::Panicked(panic_message(panic.as_ref()))));
        let elapsed = started.elapsed();

        match result {
            Ok(value) => {
                JobMetrics::handler_duration(&job.job_type, "completed", elapsed);
                self.queue.complete(job.id, value).await
            }
            Err(e) => {
                JobMetrics::handler_duration(&job.job_type, "failed", elapsed);
                warn!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    error = %e,
                    "Job handler failed"
                );
                self.queue.fail(job.id, &e.to_string(), e.is_retryable()).await
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker loops.
    pub concurrency: usize,

    /// Sleep between empty claims.
    pub poll_interval: Duration,

    /// How long shutdown waits for in-flight jobs.
    pub shutdown_timeout: Duration,

    /// Job types to claim (empty = all).
    pub allowed_types: Vec<String>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for WorkerPoolConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            poll_interval: config.poll_interval(),
            shutdown_timeout: config.shutdown_timeout(),
            allowed_types: config.allowed_types.clone(),
        }
    }
}

/// Worker pool statistics.
#[derive(Debug, Clone)]
pub struct WorkerPoolStats {
    /// Pool ID.
    pub id: String,

    /// Is running.
    pub running: bool,

    /// Configured concurrency.
    pub concurrency: usize,

    /// Jobs completed.
    pub jobs_processed: u64,

    /// Failed attempts, retried or not.
    pub jobs_failed: u64,
}

/// Runs `concurrency` worker loops against one queue.
///
/// Idle workers wake on an in-process submission or after the poll
/// interval, whichever comes first. Shutdown lets running handlers finish.
pub struct WorkerPool {
    id: String,
    queue: JobQueue,
    registry: HandlerRegistry,
    config: WorkerPoolConfig,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
    tasks: Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(queue: JobQueue, registry: HandlerRegistry, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            id: format!("worker-pool-{}", Uuid::new_v4()),
            queue,
            registry,
            config,
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            jobs_processed: Arc::new(AtomicU64::new(0)),
            jobs_failed: Arc::new(AtomicU64::new(0)),
            tasks: Mutex::new(None),
        }
    }

    /// Spawns the worker tasks and returns.
    pub fn start(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Internal("Worker pool already running".to_string()));
        }

        info!(
            pool_id = %self.id,
            concurrency = self.config.concurrency,
            allowed_types = ?self.config.allowed_types,
            handlers = ?self.registry.job_types(),
            "Starting worker pool"
        );

        let mut tasks = JoinSet::new();
        for n in 0..self.config.concurrency {
            let worker = Worker::new(self.queue.clone(), self.registry.clone())
                .with_allowed_types(self.config.allowed_types.clone())
                .with_id(format!("{}-{}", self.id, n));
            let span = tracing::info_span!("worker", worker_id = %worker.id());

            tasks.spawn(
                run_worker(
                    worker,
                    self.shutdown_tx.subscribe(),
                    self.queue.notifier(),
                    self.config.poll_interval,
                    Arc::clone(&self.jobs_processed),
                    Arc::clone(&self.jobs_failed),
                )
                .instrument(span),
            );
        }

        *self.tasks.lock() = Some(tasks);
        WorkerMetrics::update_workers(&self.id, self.config.concurrency);
        Ok(())
    }

    /// Signals every worker to stop after its current job.
    pub fn stop(&self) {
        info!(pool_id = %self.id, "Stopping worker pool...");
        let _ = self.shutdown_tx.send(());
    }

    /// Stops the pool and waits up to the shutdown timeout for workers to exit.
    ///
    /// Workers still running a handler at the deadline are detached, not aborted.
    pub async fn shutdown(&self) {
        self.stop();

        let Some(mut tasks) = self.tasks.lock().take() else {
            return;
        };

        info!(pool_id = %self.id, "Waiting for workers to finish...");
        let drained = timeout(self.config.shutdown_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(pool_id = %self.id, error = %e, "Worker task ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                pool_id = %self.id,
                remaining = tasks.len(),
                "Shutdown timeout reached, leaving in-flight jobs to finish"
            );
            tasks.detach_all();
        }

        self.running.store(false, Ordering::SeqCst);
        WorkerMetrics::update_workers(&self.id, 0);

        info!(
            pool_id = %self.id,
            processed = self.jobs_processed(),
            failed = self.jobs_failed(),
            "Worker pool stopped"
        );
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the number of jobs completed.
    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Get the number of failed attempts.
    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Get the pool ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            id: self.id.clone(),
            running: self.is_running(),
            concurrency: self.config.concurrency,
            jobs_processed: self.jobs_processed(),
            jobs_failed: self.jobs_failed(),
        }
    }
}

async fn run_worker(
    worker: Worker,
    mut shutdown_rx: broadcast::Receiver<()>,
    notify: Arc<tokio::sync::Notify>,
    poll_interval: Duration,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
) {
    debug!("Worker started");

    loop {
        if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }

        match worker.process_next().await {
            Ok(Some(processed)) => {
                match processed.outcome {
                    Outcome::Completed => {
                        jobs_processed.fetch_add(1, Ordering::Relaxed);
                    }
                    Outcome::Retrying { .. } | Outcome::Failed => {
                        jobs_failed.fetch_add(1, Ordering::Relaxed);
                    }
                    Outcome::Ignored => {}
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "Failed to process job");
            }
        }

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            () = notify.notified() => {}
            () = tokio::time::sleep(poll_interval) => {}
        }
    }

    debug!("Worker stopped");
}
