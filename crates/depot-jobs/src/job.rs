//! Job records and their lifecycle states.

use crate::error::JobError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Claim attempts allowed before a job is failed for good.
pub const MAX_ATTEMPTS: u32 = 3;

/// Unique, monotonically assigned job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    /// Returns the raw identifier.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<JobId> for i64 {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// Job status.
///
/// ```text
/// pending ──claim──▶ processing ──complete──▶ completed
///    ▲                   │
///    └──── retry ────────┤
///                        └──── fail ──▶ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by exactly one worker.
    Processing,
    /// Handler returned successfully.
    Completed,
    /// Retries exhausted or failure was permanent.
    Failed,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Column text for this status.
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Returns true for states with no outgoing transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobError::Internal(format!("Unknown job status: {}", other))),
        }
    }
}

/// One durable unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job ID.
    pub id: JobId,

    /// Type tag selecting the handler.
    #[serde(rename = "type")]
    pub job_type: String,

    /// Handler input document.
    pub payload: Value,

    /// Higher is served first.
    pub priority: i32,

    /// Current status.
    pub status: JobStatus,

    /// Claims made so far.
    pub attempts: u32,

    /// Not claimable before this instant.
    pub available_at: DateTime<Utc>,

    /// When the job was submitted.
    pub created_at: DateTime<Utc>,

    /// First claim.
    pub started_at: Option<DateTime<Utc>>,

    /// Successful completion.
    pub completed_at: Option<DateTime<Utc>>,

    /// Permanent failure.
    pub failed_at: Option<DateTime<Utc>>,

    /// Handler output, set on completion.
    pub result: Option<Value>,

    /// Most recent failure message.
    pub last_error: Option<String>,
}

impl Job {
    /// Returns true once the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true once `max_attempts` claims have been made.
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }

    /// Returns true if a claim at `now` may select this job.
    pub fn is_eligible(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        self.status == JobStatus::Pending
            && self.available_at <= now
            && self.attempts < max_attempts
    }

    /// When the job reached a terminal state.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or(self.failed_at)
    }

    /// Time from submission to completion.
    pub fn processing_time(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.created_at)
    }
}
