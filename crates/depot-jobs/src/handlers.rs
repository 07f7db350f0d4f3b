//! Built-in job types.

use crate::config::QueueConfig;
use crate::error::JobError;
use crate::job::JobId;
use crate::queue::JobQueue;
use crate::registry::{HandlerRegistryBuilder, JobHandler};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

/// Job type submitted when another job fails permanently.
pub const NOTIFICATION_JOB_TYPE: &str = "notification";

/// Job type that deletes old terminal jobs.
pub const CLEANUP_JOB_TYPE: &str = "cleanup";

/// Payload of a failure notification job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotification {
    /// The job that failed.
    pub failed_job_id: JobId,
    /// Its type.
    pub job_type: String,
    /// Final error message.
    pub error: String,
    /// Claims made before it failed.
    pub attempts: u32,
    /// When it failed.
    pub failed_at: DateTime<Utc>,
}

/// Records permanent failures in the log for operators.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationHandler;

#[async_trait]
impl JobHandler for NotificationHandler {
    async fn handle(&self, payload: Value) -> Result<Value, JobError> {
        let notification: FailureNotification = serde_json::from_value(payload)?;

        error!(
            target: "depot::alerts",
            failed_job_id = %notification.failed_job_id,
            job_type = %notification.job_type,
            attempts = notification.attempts,
            failed_at = %notification.failed_at,
            error = %notification.error,
            "Job failed permanently"
        );

        Ok(json!({ "notified": notification.failed_job_id }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct CleanupPayload {
    #[serde(default)]
    days: Option<u32>,
}

/// Deletes terminal jobs older than `days` (payload) or the configured retention.
#[derive(Debug, Clone)]
pub struct CleanupHandler {
    queue: JobQueue,
    default_days: u32,
}

impl CleanupHandler {
    /// Creates a handler falling back to `default_days` when the payload has none.
    pub fn new(queue: JobQueue, default_days: u32) -> Self {
        Self {
            queue,
            default_days,
        }
    }
}

#[async_trait]
impl JobHandler for CleanupHandler {
    async fn handle(&self, payload: Value) -> Result<Value, JobError> {
        let payload: CleanupPayload = if payload.is_null() {
            CleanupPayload::default()
        } else {
            serde_json::from_value(payload)?
        };

        let days = payload.days.unwrap_or(self.default_days);
        let deleted = self.queue.cleanup(days).await?;

        info!(days, deleted, "Cleanup job finished");
        Ok(json!({ "queue": deleted }))
    }
}

/// Registers the notification and cleanup handlers.
pub fn register_builtin(
    builder: HandlerRegistryBuilder,
    queue: &JobQueue,
    config: &QueueConfig,
) -> HandlerRegistryBuilder {
    builder
        .register(config.notification_type.clone(), NotificationHandler)
        .register(
            CLEANUP_JOB_TYPE,
            CleanupHandler::new(queue.clone(), config.retention_days),
        )
}
