//! Cron scheduler for recurring jobs.
//!
//! Each process runs its own scheduler; there is no leader election, so
//! scheduled job types should tolerate an occasional duplicate run.

use crate::config::{QueueConfig, SchedulerConfig};
use crate::error::{JobError, JobResult};
use crate::handlers::CLEANUP_JOB_TYPE;
use crate::metrics::SchedulerMetrics;
use crate::queue::{JobQueue, NewJob, Priority};
use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Name of the built-in retention schedule.
pub const CLEANUP_SCHEDULE: &str = "queue-cleanup";

/// Scheduled job definition.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    /// Unique name for this scheduled job.
    pub name: String,

    /// Cron expression.
    pub cron: String,

    /// Parsed cron schedule.
    schedule: Schedule,

    /// Submitted on every trigger.
    template: NewJob,

    /// Is job enabled.
    pub enabled: bool,
}

impl ScheduledJob {
    /// Create a new scheduled job.
    pub fn new(name: impl Into<String>, cron_expr: &str, template: NewJob) -> JobResult<Self> {
        let schedule = Schedule::from_str(cron_expr)
            .map_err(|e| JobError::Configuration(format!("Invalid cron expression: {}", e)))?;

        Ok(Self {
            name: name.into(),
            cron: cron_expr.to_string(),
            schedule,
            template,
            enabled: true,
        })
    }

    /// The daily retention cleanup, submitted at BACKGROUND priority.
    pub fn cleanup(scheduler: &SchedulerConfig, queue: &QueueConfig) -> JobResult<Self> {
        let template = NewJob::new(CLEANUP_JOB_TYPE, json!({ "days": queue.retention_days }))
            .priority(Priority::Background);
        Self::new(CLEANUP_SCHEDULE, &scheduler.cleanup_cron, template)
    }

    /// Set whether the job is enabled.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The job submitted on each trigger.
    pub fn template(&self) -> &NewJob {
        &self.template
    }

    /// Calculate the next run time after `from`.
    pub fn next_run_from(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }
}

#[derive(Debug)]
struct Entry {
    job: ScheduledJob,
    next_run: Option<DateTime<Utc>>,
}

/// Scheduler statistics.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Scheduler ID.
    pub id: String,

    /// Number of scheduled jobs.
    pub scheduled_jobs: usize,

    /// Submissions made.
    pub jobs_executed: u64,
}

/// Submits jobs on cron schedules.
pub struct Scheduler {
    id: String,
    queue: JobQueue,
    tick_interval: Duration,
    jobs: RwLock<HashMap<String, Entry>>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
    stopping: AtomicBool,
    jobs_executed: AtomicU64,
}

impl Scheduler {
    /// Create a new scheduler checking schedules every second.
    pub fn new(queue: JobQueue) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            id: format!("scheduler-{}", Uuid::new_v4()),
            queue,
            tick_interval: Duration::from_secs(1),
            jobs: RwLock::new(HashMap::new()),
            shutdown_tx,
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            jobs_executed: AtomicU64::new(0),
        }
    }

    /// Sets how often schedules are checked.
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick;
        self
    }

    /// Register a scheduled job. Its first run is the next cron time after now.
    pub fn register(&self, job: ScheduledJob) {
        let next_run = job.next_run_from(self.queue.now());
        let name = job.name.clone();

        info!(
            job_name = %name,
            cron = %job.cron,
            next_run = ?next_run,
            "Registered scheduled job"
        );
        self.jobs.write().insert(name, Entry { job, next_run });
    }

    /// Unregister a scheduled job.
    pub fn unregister(&self, name: &str) -> Option<ScheduledJob> {
        self.jobs.write().remove(name).map(|entry| entry.job)
    }

    /// Next trigger time of a registered job.
    pub fn next_run(&self, name: &str) -> Option<DateTime<Utc>> {
        self.jobs.read().get(name).and_then(|entry| entry.next_run)
    }

    /// Get scheduler ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Submits every job whose trigger time has passed. Returns how many were submitted.
    pub async fn tick(&self) -> usize {
        let now = self.queue.now();

        let due: Vec<(String, NewJob)> = {
            let mut jobs = self.jobs.write();
            jobs.values_mut()
                .filter(|entry| entry.job.enabled)
                .filter(|entry| entry.next_run.is_some_and(|at| at <= now))
                .map(|entry| {
                    entry.next_run = entry.job.next_run_from(now);
                    (entry.job.name.clone(), entry.job.template.clone())
                })
                .collect()
        };

        let mut submitted = 0;
        for (name, template) in due {
            let job_type = template.job_type().to_string();
            match self.queue.submit_with(template).await {
                Ok(job_id) => {
                    debug!(job_name = %name, job_id = %job_id, "Submitted scheduled job");
                    SchedulerMetrics::job_triggered(&name, &job_type);
                    self.jobs_executed.fetch_add(1, Ordering::Relaxed);
                    submitted += 1;
                }
                Err(e) => {
                    error!(job_name = %name, error = %e, "Failed to submit scheduled job");
                }
            }
        }

        submitted
    }

    /// Runs the scheduler until [`stop`](Self::stop) is called.
    pub async fn start(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Configuration("Scheduler already running".to_string()));
        }

        info!(
            scheduler_id = %self.id,
            scheduled_jobs = self.jobs.read().len(),
            "Starting scheduler"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = interval(self.tick_interval);

        // a stop() sent before the subscription above is only visible here
        while !self.stopping.load(Ordering::SeqCst) {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(scheduler_id = %self.id, "Received shutdown signal");
                    break;
                }

                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(scheduler_id = %self.id, "Scheduler stopped");

        Ok(())
    }

    /// Stop the scheduler.
    pub fn stop(&self) {
        info!(scheduler_id = %self.id, "Stopping scheduler...");
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Get scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            id: self.id.clone(),
            scheduled_jobs: self.jobs.read().len(),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.id)
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

/// Common cron expressions (with seconds field).
pub mod cron_expressions {
    /// Every minute.
    pub const EVERY_MINUTE: &str = "0 * * * * *";
    /// Every hour at minute 0.
    pub const HOURLY: &str = "0 0 * * * *";
    /// Every day at midnight.
    pub const DAILY: &str = "0 0 0 * * *";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::job::JobStatus;
    use crate::store::MemoryJobStore;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Arc;

    fn scheduler() -> (Scheduler, Arc<MemoryJobStore>, ManualClock) {
        let store = Arc::new(MemoryJobStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap());
        let queue = JobQueue::new(store.clone()).with_clock(clock.clone());
        (Scheduler::new(queue), store, clock)
    }

    #[test]
    fn test_invalid_cron() {
        let result = ScheduledJob::new("bad", "not a cron", NewJob::new("x", json!({})));
        assert!(matches!(result, Err(JobError::Configuration(_))));
    }

    #[test]
    fn test_cleanup_schedule_defaults() {
        let job =
            ScheduledJob::cleanup(&SchedulerConfig::default(), &QueueConfig::default()).unwrap();
        assert_eq!(job.name, CLEANUP_SCHEDULE);
        assert_eq!(job.template().job_type(), CLEANUP_JOB_TYPE);
        assert_eq!(job.template().priority_value(), Priority::Background.value());
        assert_eq!(job.template().payload()["days"], 7);
    }

    #[test]
    fn test_next_run() {
        let job =
            ScheduledJob::new("m", cron_expressions::EVERY_MINUTE, NewJob::new("x", json!({})))
                .unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
        assert_eq!(
            job.next_run_from(from),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_tick_submits_when_due() {
        let (scheduler, store, clock) = scheduler();
        scheduler.register(
            ScheduledJob::new(
                "heartbeat",
                cron_expressions::EVERY_MINUTE,
                NewJob::new("heartbeat", json!({})),
            )
            .unwrap(),
        );

        assert_eq!(scheduler.tick().await, 0);

        clock.advance(ChronoDuration::seconds(30));
        assert_eq!(scheduler.tick().await, 1);
        assert_eq!(scheduler.tick().await, 0);

        clock.advance(ChronoDuration::minutes(5));
        assert_eq!(scheduler.tick().await, 1);

        let jobs = store.snapshot();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|job| job.status == JobStatus::Pending));
        assert_eq!(scheduler.stats().jobs_executed, 2);
    }

    #[tokio::test]
    async fn test_disabled_job_never_runs() {
        let (scheduler, store, clock) = scheduler();
        scheduler.register(
            ScheduledJob::new(
                "off",
                cron_expressions::EVERY_MINUTE,
                NewJob::new("x", json!({})),
            )
            .unwrap()
            .enabled(false),
        );

        clock.advance(ChronoDuration::hours(1));
        assert_eq!(scheduler.tick().await, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_start_stop() {
        let (scheduler, _, _) = scheduler();
        let scheduler = Arc::new(scheduler.with_tick_interval(Duration::from_millis(10)));

        let handle = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.start().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start_is_not_lost() {
        let (scheduler, _, _) = scheduler();
        let scheduler = Arc::new(scheduler.with_tick_interval(Duration::from_millis(10)));

        scheduler.stop();
        let handle = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.start().await }
        });

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler kept running after stop")
            .unwrap()
            .unwrap();
    }
}
