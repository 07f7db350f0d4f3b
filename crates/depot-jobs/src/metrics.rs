//! Prometheus metrics for job queue monitoring.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! host process installs a recorder.

use crate::stats::QueueStats;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job queue.
pub mod names {
    /// Total jobs submitted.
    pub const JOBS_SUBMITTED_TOTAL: &str = "depot_jobs_submitted_total";
    /// Total jobs claimed for processing.
    pub const JOBS_CLAIMED_TOTAL: &str = "depot_jobs_claimed_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "depot_jobs_completed_total";
    /// Total jobs rescheduled after a failed attempt.
    pub const JOBS_RETRIED_TOTAL: &str = "depot_jobs_retried_total";
    /// Total jobs failed permanently.
    pub const JOBS_FAILED_TOTAL: &str = "depot_jobs_failed_total";
    /// Total terminal jobs removed by cleanup.
    pub const JOBS_CLEANED_TOTAL: &str = "depot_jobs_cleaned_total";

    /// Jobs per status at the last stats read.
    pub const JOBS_BY_STATUS: &str = "depot_jobs_by_status";
    /// Pending plus processing jobs.
    pub const QUEUE_LENGTH: &str = "depot_jobs_queue_length";

    /// Handler execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "depot_job_duration_seconds";
    /// Time between `available_at` and the claim, in seconds.
    pub const JOB_WAIT_TIME_SECONDS: &str = "depot_job_wait_time_seconds";

    /// Worker tasks currently running.
    pub const WORKERS_ACTIVE: &str = "depot_workers_active";

    /// Scheduled submissions made.
    pub const SCHEDULER_JOBS_TRIGGERED: &str = "depot_scheduler_jobs_triggered_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_SUBMITTED_TOTAL, "Total number of jobs submitted");
    describe_counter!(
        names::JOBS_CLAIMED_TOTAL,
        "Total number of jobs claimed for processing"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(
        names::JOBS_RETRIED_TOTAL,
        "Total number of failed attempts rescheduled with backoff"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of jobs that failed permanently"
    );
    describe_counter!(
        names::JOBS_CLEANED_TOTAL,
        "Total number of terminal jobs deleted by cleanup"
    );

    describe_gauge!(names::JOBS_BY_STATUS, "Number of jobs per status");
    describe_gauge!(names::QUEUE_LENGTH, "Pending plus processing jobs");

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Handler execution duration in seconds"
    );
    describe_histogram!(
        names::JOB_WAIT_TIME_SECONDS,
        "Seconds a job waited between becoming available and being claimed"
    );

    describe_gauge!(names::WORKERS_ACTIVE, "Number of running worker tasks");
    describe_counter!(
        names::SCHEDULER_JOBS_TRIGGERED,
        "Total number of scheduled jobs submitted"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job submitted.
    pub fn job_submitted(job_type: &str, priority: i32) {
        counter!(
            names::JOBS_SUBMITTED_TOTAL,
            "job_type" => job_type.to_string(),
            "priority" => priority.to_string()
        )
        .increment(1);
    }

    /// Record a job claimed.
    pub fn job_claimed(job_type: &str, wait_time: Duration) {
        counter!(
            names::JOBS_CLAIMED_TOTAL,
            "job_type" => job_type.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_WAIT_TIME_SECONDS,
            "job_type" => job_type.to_string()
        )
        .record(wait_time.as_secs_f64());
    }

    /// Record a job completed.
    pub fn job_completed() {
        counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    }

    /// Record a failed attempt that will be retried.
    pub fn job_retried(job_type: &str, attempt: u32) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "job_type" => job_type.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
    }

    /// Record a permanent failure.
    pub fn job_failed(job_type: &str) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record one handler execution.
    pub fn handler_duration(job_type: &str, status: &'static str, duration: Duration) {
        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_type" => job_type.to_string(),
            "status" => status
        )
        .record(duration.as_secs_f64());
    }

    /// Record a cleanup pass.
    pub fn jobs_cleaned(deleted: u64) {
        counter!(names::JOBS_CLEANED_TOTAL).increment(deleted);
    }

    /// Update gauges from a stats snapshot.
    pub fn update_queue_sizes(stats: &QueueStats) {
        for (status, entry) in &stats.by_status {
            gauge!(names::JOBS_BY_STATUS, "status" => status.clone()).set(entry.count as f64);
        }
        gauge!(names::QUEUE_LENGTH).set(stats.queue_length as f64);
    }
}

/// Worker metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Update worker count.
    pub fn update_workers(pool_id: &str, active: usize) {
        gauge!(
            names::WORKERS_ACTIVE,
            "pool_id" => pool_id.to_string()
        )
        .set(active as f64);
    }
}

/// Scheduler metrics recorder.
#[derive(Clone)]
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    /// Record a scheduled job submitted.
    pub fn job_triggered(schedule: &str, job_type: &str) {
        counter!(
            names::SCHEDULER_JOBS_TRIGGERED,
            "schedule" => schedule.to_string(),
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }
}
