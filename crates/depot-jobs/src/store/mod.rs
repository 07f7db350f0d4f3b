//! Durable job storage.
//!
//! The store is the single synchronization point between producers and
//! workers. Every method takes its timestamps from the caller so that all
//! backends agree on what "now" means.

mod memory;
mod mysql;

pub use memory::MemoryJobStore;
pub use mysql::MySqlJobStore;

use crate::error::JobResult;
use crate::job::{Job, JobId};
use crate::stats::QueueStats;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// A row about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJobRecord {
    /// Type tag.
    pub job_type: String,
    /// Handler input.
    pub payload: Value,
    /// Priority.
    pub priority: i32,
    /// Earliest claim time.
    pub available_at: DateTime<Utc>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

/// Storage backend for jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new `pending` job. Returns once the row is durable.
    async fn insert(&self, job: &NewJobRecord) -> JobResult<JobId>;

    /// Atomically selects and locks the best eligible job.
    ///
    /// Eligible means `pending`, `available_at <= now`, `attempts <
    /// max_attempts` and, when `allowed_types` is non-empty, a type in that
    /// set. The winner has the highest priority, then the earliest
    /// `created_at`, then the lowest id. It is moved to `processing` with
    /// `attempts + 1` before this returns; two concurrent callers never get
    /// the same row.
    async fn claim(
        &self,
        allowed_types: &[String],
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> JobResult<Option<Job>>;

    /// Loads a job by id.
    async fn get(&self, id: JobId) -> JobResult<Option<Job>>;

    /// `processing` → `completed`. Returns false if the job was not processing.
    async fn mark_completed(&self, id: JobId, result: &Value, now: DateTime<Utc>)
        -> JobResult<bool>;

    /// `processing` → `pending` with a later `available_at`.
    ///
    /// `available_at` never moves backwards. Returns false if the job was
    /// not processing.
    async fn reschedule(
        &self,
        id: JobId,
        error: &str,
        available_at: DateTime<Utc>,
    ) -> JobResult<bool>;

    /// `processing` → `failed`. Returns false if the job was not processing.
    async fn mark_failed(&self, id: JobId, error: &str, now: DateTime<Utc>) -> JobResult<bool>;

    /// Aggregates counts per status and per type.
    async fn stats(&self) -> JobResult<QueueStats>;

    /// Deletes `completed`/`failed` rows that finished before `cutoff`.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64>;

    /// Checks the backend is reachable.
    async fn health_check(&self) -> JobResult<()>;
}
