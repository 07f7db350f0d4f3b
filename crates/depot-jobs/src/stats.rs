//! Aggregate queue statistics.

use crate::job::{Job, JobStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-status aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusStats {
    /// Rows in this status.
    pub count: u64,

    /// Mean seconds from submission to completion, where that applies.
    pub avg_processing_secs: Option<f64>,
}

/// Per-type aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeStats {
    /// All rows of this type.
    pub total: u64,

    /// Completed rows.
    pub completed: u64,

    /// Failed rows.
    pub failed: u64,

    /// `completed / total` as a percentage, two decimals.
    pub success_rate: f64,
}

impl TypeStats {
    /// Builds a row and derives the success rate.
    pub fn new(total: u64, completed: u64, failed: u64) -> Self {
        let success_rate = if total > 0 {
            round2(completed as f64 / total as f64 * 100.0)
        } else {
            0.0
        };

        Self {
            total,
            completed,
            failed,
            success_rate,
        }
    }
}

/// Snapshot of the whole queue.
///
/// Read without locking, so it may lag behind concurrent claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Keyed by status text.
    pub by_status: BTreeMap<String, StatusStats>,

    /// Keyed by job type.
    pub by_type: BTreeMap<String, TypeStats>,

    /// Pending plus processing.
    pub queue_length: u64,
}

impl QueueStats {
    /// Rows currently in `status`.
    pub fn count(&self, status: JobStatus) -> u64 {
        self.by_status
            .get(status.as_str())
            .map_or(0, |s| s.count)
    }

    /// Aggregates a set of in-memory job records.
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut counts: BTreeMap<JobStatus, u64> = BTreeMap::new();
        let mut per_type: BTreeMap<String, (u64, u64, u64)> = BTreeMap::new();
        let mut completed_secs = 0.0_f64;
        let mut completed_timed = 0_u64;

        for job in jobs {
            *counts.entry(job.status).or_default() += 1;

            let entry = per_type.entry(job.job_type.clone()).or_default();
            entry.0 += 1;
            match job.status {
                JobStatus::Completed => entry.1 += 1,
                JobStatus::Failed => entry.2 += 1,
                _ => {}
            }

            if let Some(elapsed) = job.processing_time() {
                completed_secs += elapsed.num_milliseconds() as f64 / 1000.0;
                completed_timed += 1;
            }
        }

        let by_status = counts
            .into_iter()
            .map(|(status, count)| {
                let avg_processing_secs = (status == JobStatus::Completed && completed_timed > 0)
                    .then(|| round2(completed_secs / completed_timed as f64));
                (
                    status.as_str().to_string(),
                    StatusStats {
                        count,
                        avg_processing_secs,
                    },
                )
            })
            .collect();

        let by_type = per_type
            .into_iter()
            .map(|(job_type, (total, completed, failed))| {
                (job_type, TypeStats::new(total, completed, failed))
            })
            .collect();

        let mut stats = Self {
            by_status,
            by_type,
            queue_length: 0,
        };
        stats.queue_length = stats.count(JobStatus::Pending) + stats.count(JobStatus::Processing);
        stats
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let stats = TypeStats::new(3, 2, 1);
        assert_eq!(stats.success_rate, 66.67);
    }

    #[test]
    fn test_success_rate_empty() {
        assert_eq!(TypeStats::new(0, 0, 0).success_rate, 0.0);
    }

    #[test]
    fn test_count_missing_status() {
        let stats = QueueStats::default();
        assert_eq!(stats.count(JobStatus::Failed), 0);
        assert_eq!(stats.queue_length, 0);
    }

    #[test]
    fn test_serialized_shape() {
        let stats = QueueStats::from_jobs(std::iter::empty());
        let value = serde_json::to_value(&stats).unwrap();
        assert!(value["by_status"].is_object());
        assert!(value["by_type"].is_object());
        assert_eq!(value["queue_length"], 0);
    }
}
