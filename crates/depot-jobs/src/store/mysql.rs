//! MySQL job store.
//!
//! Claims use a locking read that skips rows held by other in-flight claims
//! (`FOR UPDATE SKIP LOCKED`) and update the chosen row inside the same
//! transaction, so any number of worker processes can share one table
//! without further coordination. Requires MySQL 8.0 or later.

use super::{JobStore, NewJobRecord};
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId, JobStatus};
use crate::stats::{round2, QueueStats, StatusStats, TypeStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_config::DatabaseConfig;
use serde_json::Value;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::types::Json;
use sqlx::{Connection, FromRow, MySql, QueryBuilder};
use tracing::{debug, info, warn};

const JOB_COLUMNS: &str = "id, `type`, payload, priority, status, attempts, available_at, \
                           created_at, started_at, completed_at, failed_at, result, last_error";

/// MySQL-backed job store.
#[derive(Debug, Clone)]
pub struct MySqlJobStore {
    pool: MySqlPool,
}

impl MySqlJobStore {
    /// Connects a pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> JobResult<Self> {
        info!("Connecting to MySQL job store...");

        let pool = MySqlPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                JobError::QueueUnavailable(format!("Failed to connect: {}", e))
            })?;

        info!("MySQL connection pool established");
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn with_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Applies pending migrations from `migrations/`.
    pub async fn run_migrations(&self) -> JobResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Closes the pool.
    pub async fn close(&self) {
        info!("Closing database connection pool...");
        self.pool.close().await;
    }
}

/// Database row representation of a job.
#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    #[sqlx(rename = "type")]
    job_type: String,
    payload: Json<Value>,
    priority: i32,
    status: String,
    attempts: u32,
    available_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    result: Option<Json<Value>>,
    last_error: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: JobId::from(row.id),
            job_type: row.job_type,
            payload: row.payload.0,
            priority: row.priority,
            status: row.status.parse()?,
            attempts: row.attempts,
            available_at: row.available_at,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            result: row.result.map(|r| r.0),
            last_error: row.last_error,
        })
    }
}

#[derive(Debug, FromRow)]
struct StatusRow {
    status: String,
    count: i64,
    avg_processing_secs: Option<f64>,
}

#[derive(Debug, FromRow)]
struct TypeRow {
    job_type: String,
    total: i64,
    completed: i64,
    failed: i64,
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[async_trait]
impl JobStore for MySqlJobStore {
    async fn insert(&self, job: &NewJobRecord) -> JobResult<JobId> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_queue (`type`, payload, priority, status, attempts, available_at, created_at)
            VALUES (?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&job.job_type)
        .bind(Json(&job.payload))
        .bind(job.priority)
        .bind(JobStatus::Pending.as_str())
        .bind(job.available_at)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        let id = i64::try_from(result.last_insert_id())
            .map_err(|e| JobError::Internal(format!("Job id out of range: {}", e)))?;

        Ok(JobId::from(id))
    }

    async fn claim(
        &self,
        allowed_types: &[String],
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> JobResult<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        // Locks on rows the WHERE clause rejects are released immediately.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *conn)
            .await?;
        let mut tx = conn.begin().await?;

        let mut query =
            QueryBuilder::<MySql>::new(format!("SELECT {} FROM job_queue WHERE status = ", JOB_COLUMNS));
        query.push_bind(JobStatus::Pending.as_str());
        query.push(" AND available_at <= ").push_bind(now);
        query.push(" AND attempts < ").push_bind(max_attempts);

        if !allowed_types.is_empty() {
            query.push(" AND `type` IN (");
            let mut types = query.separated(", ");
            for job_type in allowed_types {
                types.push_bind(job_type);
            }
            types.push_unseparated(")");
        }

        query.push(
            " ORDER BY priority DESC, created_at ASC, id ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
        );

        let row = query
            .build_query_as::<JobRow>()
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = ?, attempts = attempts + 1, started_at = COALESCE(started_at, ?)
            WHERE id = ?
            "#,
        )
        .bind(JobStatus::Processing.as_str())
        .bind(now)
        .bind(row.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut job = Job::try_from(row)?;
        job.status = JobStatus::Processing;
        job.attempts += 1;
        job.started_at.get_or_insert(now);

        debug!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, "Claimed job row");
        Ok(Some(job))
    }

    async fn get(&self, id: JobId) -> JobResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM job_queue WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn mark_completed(
        &self,
        id: JobId,
        result: &Value,
        now: DateTime<Utc>,
    ) -> JobResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = ?, completed_at = ?, result = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::Completed.as_str())
        .bind(now)
        .bind(Json(result))
        .bind(id.get())
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }

    async fn reschedule(
        &self,
        id: JobId,
        error: &str,
        available_at: DateTime<Utc>,
    ) -> JobResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = ?, last_error = ?, available_at = GREATEST(available_at, ?)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::Pending.as_str())
        .bind(error)
        .bind(available_at)
        .bind(id.get())
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: JobId, error: &str, now: DateTime<Utc>) -> JobResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = ?, failed_at = ?, last_error = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::Failed.as_str())
        .bind(now)
        .bind(error)
        .bind(id.get())
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }

    async fn stats(&self) -> JobResult<QueueStats> {
        let status_rows = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT status,
                   COUNT(*) AS count,
                   CAST(AVG(TIMESTAMPDIFF(MICROSECOND, created_at, completed_at)) / 1000000 AS DOUBLE)
                       AS avg_processing_secs
            FROM job_queue
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let type_rows = sqlx::query_as::<_, TypeRow>(
            r#"
            SELECT `type` AS job_type,
                   COUNT(*) AS total,
                   CAST(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS SIGNED) AS completed,
                   CAST(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS SIGNED) AS failed
            FROM job_queue
            GROUP BY `type`
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let queue_length: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM job_queue WHERE status IN (?, ?)")
                .bind(JobStatus::Pending.as_str())
                .bind(JobStatus::Processing.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(QueueStats {
            by_status: status_rows
                .into_iter()
                .map(|row| {
                    (
                        row.status,
                        StatusStats {
                            count: count(row.count),
                            avg_processing_secs: row.avg_processing_secs.map(round2),
                        },
                    )
                })
                .collect(),
            by_type: type_rows
                .into_iter()
                .map(|row| {
                    (
                        row.job_type,
                        TypeStats::new(count(row.total), count(row.completed), count(row.failed)),
                    )
                })
                .collect(),
            queue_length: count(queue_length),
        })
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
        let done = sqlx::query(
            r#"
            DELETE FROM job_queue
            WHERE status IN (?, ?) AND COALESCE(completed_at, failed_at) < ?
            "#,
        )
        .bind(JobStatus::Completed.as_str())
        .bind(JobStatus::Failed.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected())
    }

    async fn health_check(&self) -> JobResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
