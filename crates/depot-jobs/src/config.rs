//! Job queue configuration.
//!
//! Read from the `[jobs]` section of the layered configuration.

use crate::error::{JobError, JobResult};
use crate::job::MAX_ATTEMPTS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the job queue system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl JobsConfig {
    /// Rejects settings that would leave the queue unable to run jobs.
    pub fn validate(&self) -> JobResult<()> {
        if self.worker.concurrency == 0 {
            return Err(JobError::Configuration(
                "jobs.worker.concurrency must be at least 1".to_string(),
            ));
        }

        if self.queue.max_attempts == 0 {
            return Err(JobError::Configuration(
                "jobs.queue.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.queue.notification_type.trim().is_empty() {
            return Err(JobError::Configuration(
                "jobs.queue.notification_type must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Polling interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Restrict workers to these job types (empty = all).
    #[serde(default)]
    pub allowed_types: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            allowed_types: Vec::new(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    1000 // 1 second
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl WorkerConfig {
    /// Returns poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns shutdown timeout as Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Claims allowed per job.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base retry delay in seconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Optional cap on a single retry delay in seconds.
    #[serde(default)]
    pub backoff_max_secs: Option<u64>,

    /// Days to keep completed and failed jobs.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Job type used for permanent-failure notifications.
    #[serde(default = "default_notification_type")]
    pub notification_type: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max_secs: None,
            retention_days: default_retention_days(),
            notification_type: default_notification_type(),
        }
    }
}

fn default_max_attempts() -> u32 {
    MAX_ATTEMPTS
}

fn default_backoff_base() -> u64 {
    60
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retention_days() -> u32 {
    7
}

fn default_notification_type() -> String {
    crate::handlers::NOTIFICATION_JOB_TYPE.to_string()
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Enable the scheduler.
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    /// Cron expression (with seconds) for the periodic cleanup job.
    #[serde(default = "default_cleanup_cron")]
    pub cleanup_cron: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            cleanup_cron: default_cleanup_cron(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_cleanup_cron() -> String {
    "0 30 3 * * *".to_string() // daily at 03:30 UTC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JobsConfig::default();
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.worker.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.backoff_base_secs, 60);
        assert_eq!(config.queue.retention_days, 7);
        assert_eq!(config.queue.notification_type, "notification");
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn test_partial_section() {
        let config: JobsConfig = serde_json::from_str(
            r#"{"worker": {"concurrency": 2, "allowed_types": ["email"]}, "queue": {"retention_days": 30}}"#,
        )
        .unwrap();

        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.worker.allowed_types, vec!["email".to_string()]);
        assert_eq!(config.worker.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.queue.retention_days, 30);
        assert_eq!(config.queue.max_attempts, 3);
    }

    #[test]
    fn test_validate_defaults() {
        assert!(JobsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_max_attempts() {
        let config: JobsConfig =
            serde_json::from_str(r#"{"queue": {"max_attempts": 0}}"#).unwrap();
        assert!(matches!(config.validate(), Err(JobError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config: JobsConfig =
            serde_json::from_str(r#"{"worker": {"concurrency": 0}}"#).unwrap();
        assert!(matches!(config.validate(), Err(JobError::Configuration(_))));
    }
}
