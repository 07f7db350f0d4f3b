//! Job error types.

use crate::job::JobId;
use depot_core::DepotError;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job store could not persist a submission.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// Submission rejected before reaching the store.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// No handler registered for the job type.
    #[error("No handler registered for job type: {0}")]
    NoHandler(String),

    /// Handler failed; the job may be retried.
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// Handler failed in a way retrying cannot fix.
    #[error("Job failed permanently: {0}")]
    Permanent(String),

    /// Handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Creates a retryable execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }

    /// Creates a permanent (non-retryable) execution error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Returns true if a job failing with this error should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::ExecutionFailed(_)
                | JobError::Panicked(_)
                | JobError::Database(_)
                | JobError::QueueUnavailable(_)
                | JobError::Internal(_)
        )
    }
}

impl From<JobError> for DepotError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::QueueUnavailable(msg) => DepotError::Unavailable(msg),
            JobError::Database(e) => DepotError::from(e),
            JobError::Migration(e) => DepotError::Database(e.to_string()),
            JobError::NotFound(id) => DepotError::not_found("job", id),
            JobError::InvalidJob(msg) => DepotError::Validation(msg),
            JobError::Configuration(msg) => DepotError::Configuration(msg),
            other => DepotError::Internal(other.to_string()),
        }
    }
}

impl From<DepotError> for JobError {
    fn from(err: DepotError) -> Self {
        match err {
            DepotError::Configuration(msg) => JobError::Configuration(msg),
            other => JobError::Internal(other.to_string()),
        }
    }
}
