//! Statistics and retention cleanup.

use crate::error::{JobError, JobResult};
use crate::metrics::JobMetrics;
use crate::queue::JobQueue;
use crate::stats::QueueStats;
use chrono::Duration;
use tracing::info;

impl JobQueue {
    /// Aggregates counts per status and per type.
    pub async fn stats(&self) -> JobResult<QueueStats> {
        let stats = self.store().stats().await?;
        JobMetrics::update_queue_sizes(&stats);
        Ok(stats)
    }

    /// Deletes `completed` and `failed` jobs that finished more than
    /// `retention_days` ago. `pending` and `processing` rows are never touched.
    pub async fn cleanup(&self, retention_days: u32) -> JobResult<u64> {
        let now = self.now();
        let cutoff = now
            .checked_sub_signed(Duration::days(i64::from(retention_days)))
            .ok_or_else(|| {
                JobError::InvalidJob(format!("retention out of range: {} days", retention_days))
            })?;

        let deleted = self.store().delete_terminal_before(cutoff).await?;

        JobMetrics::jobs_cleaned(deleted);
        info!(
            retention_days,
            cutoff = %cutoff,
            deleted,
            "Cleaned up terminal jobs"
        );

        Ok(deleted)
    }
}
