//! Depot Jobs - Persistent Job Queue
//!
//! A MySQL-backed job queue shared by any number of worker processes:
//! - Priority ordering with FIFO inside a tier
//! - Delayed jobs via `available_at`
//! - Exclusive claims through `FOR UPDATE SKIP LOCKED`
//! - Exponential backoff and bounded retries
//! - Notification jobs for permanent failures
//! - Statistics, retention cleanup and cron-scheduled jobs
//!
//! # Architecture
//!
//! ```text
//! producer ──submit──▶ ┌──────────────┐ ◀──claim──── worker pool
//!                      │  job_queue   │                  │
//!                      │  (JobStore)  │ ◀──complete──────┤
//!                      └──────────────┘ ◀──fail/retry────┘
//!                             ▲
//!          scheduler ─────────┘ (cleanup, recurring jobs)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use depot_jobs::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let store = MySqlJobStore::connect(&config.database).await?;
//! store.run_migrations().await?;
//! let queue = JobQueue::new(Arc::new(store));
//!
//! queue
//!     .submit_with(NewJob::new("email", json!({"to": "ops@example.com"})).priority(Priority::High))
//!     .await?;
//!
//! let registry = HandlerRegistry::builder()
//!     .register_fn("email", |payload| async move { Ok(payload) })
//!     .build();
//! let pool = WorkerPool::new(queue, registry, WorkerPoolConfig::default());
//! pool.start()?;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod job;
mod maintenance;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{JobsConfig, QueueConfig, SchedulerConfig, WorkerConfig};
pub use error::{JobError, JobResult};
pub use handlers::{
    register_builtin, CleanupHandler, FailureNotification, NotificationHandler, CLEANUP_JOB_TYPE,
    NOTIFICATION_JOB_TYPE,
};
pub use job::{Job, JobId, JobStatus, MAX_ATTEMPTS};
pub use metrics::{register_metrics, JobMetrics, SchedulerMetrics, WorkerMetrics};
pub use queue::{JobQueue, NewJob, Outcome, Priority, MAX_JOB_TYPE_LEN};
pub use registry::{handler_fn, FnHandler, HandlerRegistry, HandlerRegistryBuilder, JobHandler};
pub use retry::RetryPolicy;
pub use scheduler::{cron_expressions, ScheduledJob, Scheduler, SchedulerStats, CLEANUP_SCHEDULE};
pub use stats::{QueueStats, StatusStats, TypeStats};
pub use store::{JobStore, MemoryJobStore, MySqlJobStore, NewJobRecord};
pub use worker::{ProcessedJob, Worker, WorkerPool, WorkerPoolConfig, WorkerPoolStats};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::job::{Job, JobId, JobStatus};
    pub use crate::queue::{JobQueue, NewJob, Outcome, Priority};
    pub use crate::registry::{HandlerRegistry, JobHandler};
    pub use crate::store::{JobStore, MemoryJobStore, MySqlJobStore};
    pub use crate::worker::{Worker, WorkerPool, WorkerPoolConfig};
    pub use crate::{JobError, JobResult};
}
