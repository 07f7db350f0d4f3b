//! In-process job store.
//!
//! Same contract as the MySQL store, with a mutex standing in for row
//! locks: selection and update happen under one lock acquisition.

use super::{JobStore, NewJobRecord};
use crate::error::JobResult;
use crate::job::{Job, JobId, JobStatus};
use crate::stats::QueueStats;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    jobs: BTreeMap<JobId, Job>,
}

/// Mutex-guarded store for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: Mutex<State>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows held.
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Returns true if no rows are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies out every row, ordered by id.
    pub fn snapshot(&self) -> Vec<Job> {
        self.state.lock().jobs.values().cloned().collect()
    }

    fn transition<F>(&self, id: JobId, apply: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut state = self.state.lock();
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                apply(job);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &NewJobRecord) -> JobResult<JobId> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = JobId::from(state.next_id);

        state.jobs.insert(
            id,
            Job {
                id,
                job_type: job.job_type.clone(),
                payload: job.payload.clone(),
                priority: job.priority,
                status: JobStatus::Pending,
                attempts: 0,
                available_at: job.available_at,
                created_at: job.created_at,
                started_at: None,
                completed_at: None,
                failed_at: None,
                result: None,
                last_error: None,
            },
        );

        Ok(id)
    }

    async fn claim(
        &self,
        allowed_types: &[String],
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> JobResult<Option<Job>> {
        let mut state = self.state.lock();

        let selected = state
            .jobs
            .values()
            .filter(|job| job.is_eligible(now, max_attempts))
            .filter(|job| allowed_types.is_empty() || allowed_types.contains(&job.job_type))
            .max_by_key(|job| (job.priority, Reverse(job.created_at), Reverse(job.id)))
            .map(|job| job.id);

        let Some(id) = selected else {
            return Ok(None);
        };

        let claimed = state.jobs.get_mut(&id).map(|job| {
            job.status = JobStatus::Processing;
            job.attempts += 1;
            job.started_at.get_or_insert(now);
            job.clone()
        });

        Ok(claimed)
    }

    async fn get(&self, id: JobId) -> JobResult<Option<Job>> {
        Ok(self.state.lock().jobs.get(&id).cloned())
    }

    async fn mark_completed(
        &self,
        id: JobId,
        result: &Value,
        now: DateTime<Utc>,
    ) -> JobResult<bool> {
        Ok(self.transition(id, |job| {
            job.status = JobStatus::Completed;
            job.completed_at = Some(now);
            job.result = Some(result.clone());
        }))
    }

    async fn reschedule(
        &self,
        id: JobId,
        error: &str,
        available_at: DateTime<Utc>,
    ) -> JobResult<bool> {
        Ok(self.transition(id, |job| {
            job.status = JobStatus::Pending;
            job.last_error = Some(error.to_string());
            job.available_at = job.available_at.max(available_at);
        }))
    }

    async fn mark_failed(&self, id: JobId, error: &str, now: DateTime<Utc>) -> JobResult<bool> {
        Ok(self.transition(id, |job| {
            job.status = JobStatus::Failed;
            job.failed_at = Some(now);
            job.last_error = Some(error.to_string());
        }))
    }

    async fn stats(&self) -> JobResult<QueueStats> {
        let state = self.state.lock();
        Ok(QueueStats::from_jobs(state.jobs.values()))
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
        let mut state = self.state.lock();
        let before = state.jobs.len();

        state.jobs.retain(|_, job| {
            !(job.is_terminal() && job.finished_at().is_some_and(|at| at < cutoff))
        });

        Ok((before - state.jobs.len()) as u64)
    }

    async fn health_check(&self) -> JobResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::MAX_ATTEMPTS;
    use chrono::Duration;
    use serde_json::json;

    fn record(job_type: &str, priority: i32, at: DateTime<Utc>) -> NewJobRecord {
        NewJobRecord {
            job_type: job_type.to_string(),
            payload: json!({}),
            priority,
            available_at: at,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let a = store.insert(&record("email", 5, now)).await.unwrap();
        let b = store.insert(&record("email", 5, now)).await.unwrap();
        assert!(b > a);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_claim_filters_types() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        store.insert(&record("metrics", 10, now)).await.unwrap();
        let email = store.insert(&record("email", 1, now)).await.unwrap();

        let claimed = store
            .claim(&["email".to_string()], now, MAX_ATTEMPTS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, email);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.started_at, Some(now));
    }

    #[tokio::test]
    async fn test_claim_respects_available_at() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let mut delayed = record("email", 5, now);
        delayed.available_at = now + Duration::seconds(30);
        store.insert(&delayed).await.unwrap();

        assert!(store.claim(&[], now, MAX_ATTEMPTS).await.unwrap().is_none());
        assert!(store
            .claim(&[], now + Duration::seconds(30), MAX_ATTEMPTS)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_started_at_kept_on_reclaim() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let id = store.insert(&record("email", 5, now)).await.unwrap();

        store.claim(&[], now, MAX_ATTEMPTS).await.unwrap();
        store.reschedule(id, "smtp down", now).await.unwrap();

        let later = now + Duration::seconds(5);
        let again = store.claim(&[], later, MAX_ATTEMPTS).await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);
        assert_eq!(again.started_at, Some(now));
    }

    #[tokio::test]
    async fn test_reschedule_never_moves_backwards() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let mut future = record("email", 5, now);
        future.available_at = now + Duration::hours(1);
        let id = store.insert(&future).await.unwrap();

        store
            .claim(&[], now + Duration::hours(1), MAX_ATTEMPTS)
            .await
            .unwrap();
        store.reschedule(id, "boom", now).await.unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.available_at, now + Duration::hours(1));
        assert_eq!(job.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_transitions_require_processing() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let id = store.insert(&record("email", 5, now)).await.unwrap();

        assert!(!store.mark_completed(id, &json!({}), now).await.unwrap());
        assert!(!store.mark_failed(id, "x", now).await.unwrap());
        assert!(!store.reschedule(id, "x", now).await.unwrap());
        assert!(!store
            .mark_completed(JobId::from(999), &json!({}), now)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete_terminal_before() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let old = now - Duration::days(10);

        let done = store.insert(&record("email", 5, old)).await.unwrap();
        store.claim(&[], old, MAX_ATTEMPTS).await.unwrap();
        store.mark_completed(done, &json!({}), old).await.unwrap();

        let stuck = store.insert(&record("email", 5, old)).await.unwrap();
        store.claim(&[], old, MAX_ATTEMPTS).await.unwrap();
        let waiting = store.insert(&record("email", 5, old)).await.unwrap();

        let deleted = store.delete_terminal_before(now).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get(done).await.unwrap().is_none());
        assert!(store.get(stuck).await.unwrap().is_some());
        assert!(store.get(waiting).await.unwrap().is_some());
    }
}
