//! Producer and outcome API over a [`JobStore`].

use crate::clock::{Clock, SystemClock};
use crate::config::QueueConfig;
use crate::error::{JobError, JobResult};
use crate::handlers::{FailureNotification, NOTIFICATION_JOB_TYPE};
use crate::job::{Job, JobId, JobStatus};
use crate::metrics::JobMetrics;
use crate::retry::RetryPolicy;
use crate::store::{JobStore, NewJobRecord};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Job priority tiers. Any integer is a legal priority; these are the named ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Housekeeping.
    Background = 1,
    /// Low priority.
    Low = 3,
    /// Normal priority (default).
    Normal = 5,
    /// High priority (failure notifications).
    High = 7,
    /// Critical priority.
    Critical = 10,
}

impl Priority {
    /// Numeric value stored in the `priority` column.
    pub const fn value(self) -> i32 {
        self as i32
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        priority.value()
    }
}

/// Longest job type the `job_queue.type` column holds, in characters.
pub const MAX_JOB_TYPE_LEN: usize = 100;

/// Builder for a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    job_type: String,
    payload: Value,
    priority: i32,
    delay: Duration,
}

impl NewJob {
    /// Creates a job of `job_type` at normal priority with no delay.
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: Priority::Normal.value(),
            delay: Duration::ZERO,
        }
    }

    /// Creates a job whose payload is `payload` serialized to JSON.
    pub fn serialize<T: Serialize>(job_type: impl Into<String>, payload: &T) -> JobResult<Self> {
        Ok(Self::new(job_type, serde_json::to_value(payload)?))
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: impl Into<i32>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Sets a delay before the job becomes claimable.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Job type.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Payload document.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Priority value.
    pub fn priority_value(&self) -> i32 {
        self.priority
    }

    fn into_record(self, now: DateTime<Utc>) -> JobResult<NewJobRecord> {
        if self.job_type.trim().is_empty() {
            return Err(JobError::InvalidJob("job type must not be empty".to_string()));
        }
        if self.job_type.chars().count() > MAX_JOB_TYPE_LEN {
            return Err(JobError::InvalidJob(format!(
                "job type longer than {} characters",
                MAX_JOB_TYPE_LEN
            )));
        }

        let available_at = ChronoDuration::from_std(self.delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .ok_or_else(|| {
                JobError::InvalidJob(format!("delay out of range: {:?}", self.delay))
            })?;

        Ok(NewJobRecord {
            job_type: self.job_type,
            payload: self.payload,
            priority: self.priority,
            available_at,
            created_at: now,
        })
    }
}

/// What an outcome call did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Now `completed`.
    Completed,
    /// Back to `pending`, claimable from `available_at`.
    Retrying {
        /// Earliest next claim.
        available_at: DateTime<Utc>,
    },
    /// Now `failed`.
    Failed,
    /// The job was not `processing`; nothing changed.
    Ignored,
}

/// The job queue service.
///
/// Cheap to clone; clones share the store, clock and wakeup signal.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
    notification_type: String,
    notify: Arc<Notify>,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("retry_policy", &self.retry_policy)
            .field("notification_type", &self.notification_type)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    /// Creates a queue with the wall clock and default retry policy.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            retry_policy: RetryPolicy::default(),
            notification_type: NOTIFICATION_JOB_TYPE.to_string(),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Creates a queue configured from the `[jobs.queue]` section.
    pub fn from_config(store: Arc<dyn JobStore>, config: &QueueConfig) -> Self {
        Self::new(store)
            .with_retry_policy(RetryPolicy::from(config))
            .with_notification_type(config.notification_type.clone())
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replaces the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the job type used for failure notifications.
    pub fn with_notification_type(mut self, job_type: impl Into<String>) -> Self {
        self.notification_type = job_type.into();
        self
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Current time according to the queue's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Retry policy in effect.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Signalled after every immediate submission.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Submits a job at normal priority with no delay.
    pub async fn submit(&self, job_type: impl Into<String>, payload: Value) -> JobResult<JobId> {
        self.submit_with(NewJob::new(job_type, payload)).await
    }

    /// Submits a job.
    ///
    /// The row is durable once this returns `Ok`. On `Err` the job must be
    /// assumed not to exist.
    pub async fn submit_with(&self, job: NewJob) -> JobResult<JobId> {
        let delayed = !job.delay.is_zero();
        let record = job.into_record(self.clock.now())?;

        let id = self.store.insert(&record).await.map_err(|e| {
            error!(job_type = %record.job_type, error = %e, "Failed to persist job");
            JobError::QueueUnavailable(e.to_string())
        })?;

        JobMetrics::job_submitted(&record.job_type, record.priority);
        info!(
            job_id = %id,
            job_type = %record.job_type,
            priority = record.priority,
            available_at = %record.available_at,
            "Job submitted"
        );

        if !delayed {
            self.notify.notify_waiters();
        }

        Ok(id)
    }

    /// Claims the best eligible job, if any.
    ///
    /// An empty `allowed_types` accepts every type.
    pub async fn claim(&self, allowed_types: &[String]) -> JobResult<Option<Job>> {
        let now = self.clock.now();
        let job = self
            .store
            .claim(allowed_types, now, self.retry_policy.max_attempts)
            .await?;

        if let Some(job) = &job {
            let waited = (now - job.available_at).to_std().unwrap_or_default();
            JobMetrics::job_claimed(&job.job_type, waited);
            debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                priority = job.priority,
                attempts = job.attempts,
                "Job claimed"
            );
        }

        Ok(job)
    }

    /// Loads a job.
    pub async fn get(&self, id: JobId) -> JobResult<Job> {
        self.store.get(id).await?.ok_or(JobError::NotFound(id))
    }

    /// Records success for a claimed job.
    pub async fn complete(&self, id: JobId, result: Value) -> JobResult<Outcome> {
        let now = self.clock.now();

        if self.store.mark_completed(id, &result, now).await? {
            JobMetrics::job_completed();
            info!(job_id = %id, "Job completed");
            Ok(Outcome::Completed)
        } else {
            warn!(job_id = %id, "Completion ignored, job is not processing");
            Ok(Outcome::Ignored)
        }
    }

    /// Records a failed attempt.
    ///
    /// With `retry_allowed` and attempts left, the job goes back to `pending`
    /// after `base * multiplier^attempts`. Otherwise it fails permanently and
    /// a notification job is submitted.
    pub async fn fail(&self, id: JobId, error: &str, retry_allowed: bool) -> JobResult<Outcome> {
        let Some(job) = self.store.get(id).await? else {
            warn!(job_id = %id, "Failure ignored, job does not exist");
            return Ok(Outcome::Ignored);
        };

        if job.status != JobStatus::Processing {
            warn!(job_id = %id, status = %job.status, "Failure ignored, job is not processing");
            return Ok(Outcome::Ignored);
        }

        let now = self.clock.now();

        if retry_allowed && !job.is_exhausted(self.retry_policy.max_attempts) {
            let delay = self.retry_policy.delay_for_attempt(job.attempts);
            let delay = ChronoDuration::from_std(delay)
                .map_err(|e| JobError::Internal(format!("Backoff out of range: {}", e)))?;
            let available_at = (now + delay).max(job.available_at);

            if !self.store.reschedule(id, error, available_at).await? {
                return Ok(Outcome::Ignored);
            }

            JobMetrics::job_retried(&job.job_type, job.attempts);
            warn!(
                job_id = %id,
                job_type = %job.job_type,
                attempts = job.attempts,
                retry_at = %available_at,
                error = %error,
                "Job failed, retry scheduled"
            );
            return Ok(Outcome::Retrying { available_at });
        }

        if !self.store.mark_failed(id, error, now).await? {
            return Ok(Outcome::Ignored);
        }

        JobMetrics::job_failed(&job.job_type);
        error!(
            job_id = %id,
            job_type = %job.job_type,
            attempts = job.attempts,
            error = %error,
            "Job failed permanently"
        );

        self.notify_failure(&job, error, now).await;
        Ok(Outcome::Failed)
    }

    /// Checks the store is reachable.
    pub async fn health_check(&self) -> JobResult<()> {
        self.store.health_check().await
    }

    async fn notify_failure(&self, job: &Job, error: &str, failed_at: DateTime<Utc>) {
        if job.job_type == self.notification_type {
            debug!(job_id = %job.id, "Not notifying about a failed notification");
            return;
        }

        let notification = FailureNotification {
            failed_job_id: job.id,
            job_type: job.job_type.clone(),
            error: error.to_string(),
            attempts: job.attempts,
            failed_at,
        };

        let submitted = match NewJob::serialize(self.notification_type.clone(), &notification) {
            Ok(new_job) => self.submit_with(new_job.priority(Priority::High)).await,
            Err(e) => Err(e),
        };

        if let Err(e) = submitted {
            error!(job_id = %job.id, error = %e, "Failed to submit failure notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::job::MAX_ATTEMPTS;
    use crate::store::MemoryJobStore;
    use serde_json::json;

    fn queue() -> (JobQueue, Arc<MemoryJobStore>, ManualClock) {
        let store = Arc::new(MemoryJobStore::new());
        let clock = ManualClock::default();
        let queue = JobQueue::new(store.clone()).with_clock(clock.clone());
        (queue, store, clock)
    }

    #[test]
    fn test_priority_values() {
        assert_eq!(i32::from(Priority::Critical), 10);
        assert_eq!(i32::from(Priority::High), 7);
        assert_eq!(i32::from(Priority::Normal), 5);
        assert_eq!(i32::from(Priority::Low), 3);
        assert_eq!(i32::from(Priority::Background), 1);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_new_job_builder() {
        let job = NewJob::new("email", json!({"to": "a@b.c"}))
            .priority(42)
            .delay(Duration::from_secs(30));

        assert_eq!(job.job_type(), "email");
        assert_eq!(job.priority_value(), 42);
        assert_eq!(job.payload()["to"], "a@b.c");
    }

    #[tokio::test]
    async fn test_submit_persists_pending_row() {
        let (queue, _, clock) = queue();
        let id = queue
            .submit_with(
                NewJob::new("email", json!({"to": "a@b.c"}))
                    .priority(Priority::High)
                    .delay(Duration::from_secs(90)),
            )
            .await
            .unwrap();

        let job = queue.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.priority, 7);
        assert_eq!(job.created_at, clock.now());
        assert_eq!(job.available_at, clock.now() + ChronoDuration::seconds(90));
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_type() {
        let (queue, store, _) = queue();
        let err = queue.submit("  ", json!({})).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidJob(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_job() {
        let (queue, _, _) = queue();
        let err = queue.get(JobId::from(404)).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_complete_stores_result() {
        let (queue, _, _) = queue();
        let id = queue.submit("report", json!({})).await.unwrap();
        queue.claim(&[]).await.unwrap();

        let outcome = queue.complete(id, json!({"rows": 12})).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);

        let job = queue.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"rows": 12})));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_is_noop_when_not_processing() {
        let (queue, _, _) = queue();
        let id = queue.submit("report", json!({})).await.unwrap();

        assert_eq!(queue.complete(id, json!({})).await.unwrap(), Outcome::Ignored);
        assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_fail_schedules_backoff() {
        let (queue, _, clock) = queue();
        let id = queue.submit("email", json!({})).await.unwrap();
        queue.claim(&[]).await.unwrap();

        let outcome = queue.fail(id, "smtp timeout", true).await.unwrap();
        let expected = clock.now() + ChronoDuration::seconds(120);
        assert_eq!(outcome, Outcome::Retrying { available_at: expected });

        let job = queue.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.last_error.as_deref(), Some("smtp timeout"));
        assert_eq!(job.available_at, expected);
    }

    #[tokio::test]
    async fn test_fail_without_retry_notifies() {
        let (queue, store, _) = queue();
        let id = queue.submit("import", json!({})).await.unwrap();
        queue.claim(&[]).await.unwrap();

        let outcome = queue.fail(id, "bad file", false).await.unwrap();
        assert_eq!(outcome, Outcome::Failed);

        let notification = store
            .snapshot()
            .into_iter()
            .find(|job| job.job_type == NOTIFICATION_JOB_TYPE)
            .unwrap();
        assert_eq!(notification.priority, Priority::High.value());
        assert_eq!(notification.payload["failed_job_id"], id.get());
        assert_eq!(notification.payload["job_type"], "import");
        assert_eq!(notification.payload["error"], "bad file");
        assert_eq!(notification.payload["attempts"], 1);
    }

    #[tokio::test]
    async fn test_failed_notification_does_not_notify() {
        let (queue, store, _) = queue();
        let id = queue.submit(NOTIFICATION_JOB_TYPE, json!({})).await.unwrap();
        queue.claim(&[]).await.unwrap();

        assert_eq!(queue.fail(id, "mailer down", false).await.unwrap(), Outcome::Failed);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_unknown_job_is_ignored() {
        let (queue, _, _) = queue();
        let outcome = queue.fail(JobId::from(77), "boom", true).await.unwrap();
        assert_eq!(outcome, Outcome::Ignored);
    }

    #[tokio::test]
    async fn test_custom_notification_type() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = JobQueue::new(store.clone()).with_notification_type("alert");
        let id = queue.submit("import", json!({})).await.unwrap();
        queue.claim(&[]).await.unwrap();
        queue.fail(id, "bad", false).await.unwrap();

        assert!(store.snapshot().iter().any(|job| job.job_type == "alert"));
    }

    #[tokio::test]
    async fn test_submit_rejects_overlong_type() {
        let (queue, store, _) = queue();

        let longest = "t".repeat(MAX_JOB_TYPE_LEN);
        assert!(queue.submit(longest, json!({})).await.is_ok());

        let err = queue
            .submit("t".repeat(MAX_JOB_TYPE_LEN + 1), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidJob(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_max_attempts_still_claims() {
        let store = Arc::new(MemoryJobStore::new());
        let config = QueueConfig {
            max_attempts: 0,
            ..QueueConfig::default()
        };
        let queue = JobQueue::from_config(store, &config);

        let id = queue.submit("import", json!({})).await.unwrap();
        let job = queue.claim(&[]).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(queue.fail(id, "bad", true).await.unwrap(), Outcome::Failed);
    }

    #[tokio::test]
    async fn test_retry_cap_follows_policy() {
        let (queue, _, clock) = queue();
        let queue = queue.with_retry_policy(RetryPolicy::default().with_max_attempts(5));
        let id = queue.submit("import", json!({})).await.unwrap();

        for _ in 0..MAX_ATTEMPTS {
            queue.claim(&[]).await.unwrap().unwrap();
            let outcome = queue.fail(id, "flaky", true).await.unwrap();
            assert!(matches!(outcome, Outcome::Retrying { .. }));
            clock.advance(ChronoDuration::days(1));
        }

        assert_eq!(queue.get(id).await.unwrap().attempts, MAX_ATTEMPTS);
    }
}
