//! End-to-end worker pool tests on the in-memory store.

use depot_jobs::{
    register_builtin, HandlerRegistry, JobError, JobQueue, JobStatus, MemoryJobStore, QueueConfig,
    RetryPolicy, WorkerPool, WorkerPoolConfig,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn pool_config(concurrency: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        concurrency,
        poll_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(5),
        allowed_types: Vec::new(),
    }
}

async fn wait_for<F>(store: &MemoryJobStore, mut done: F)
where
    F: FnMut(&MemoryJobStore) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done(store) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for jobs");
}

fn all_terminal(store: &MemoryJobStore) -> bool {
    store.snapshot().iter().all(|job| job.is_terminal())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_processes_every_job_once() {
    let store = Arc::new(MemoryJobStore::new());
    let queue = JobQueue::new(store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    let registry = HandlerRegistry::builder()
        .register_fn("count", {
            let calls = Arc::clone(&calls);
            move |payload: Value| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, JobError>(json!({ "echo": payload["n"] }))
                }
            }
        })
        .build();

    for n in 0..50 {
        queue.submit("count", json!({ "n": n })).await.unwrap();
    }

    let pool = WorkerPool::new(queue, registry, pool_config(4));
    pool.start().unwrap();
    wait_for(&store, all_terminal).await;
    pool.shutdown().await;

    assert_eq!(calls.load(Ordering::SeqCst), 50);
    assert_eq!(pool.jobs_processed(), 50);
    assert_eq!(pool.jobs_failed(), 0);
    assert!(store
        .snapshot()
        .iter()
        .all(|job| job.status == JobStatus::Completed && job.result.is_some()));
}

#[tokio::test]
async fn idle_pool_wakes_on_submit() {
    let store = Arc::new(MemoryJobStore::new());
    let queue = JobQueue::new(store.clone());
    let registry = HandlerRegistry::builder()
        .register_fn("noop", |_payload| async move { Ok::<_, JobError>(Value::Null) })
        .build();

    let mut config = pool_config(2);
    config.poll_interval = Duration::from_secs(3600);
    let pool = WorkerPool::new(queue.clone(), registry, config);
    pool.start().unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.submit("noop", json!({})).await.unwrap();

    wait_for(&store, |s| s.len() == 1 && all_terminal(s)).await;
    pool.shutdown().await;
    assert_eq!(pool.jobs_processed(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_failures_are_retried() {
    let store = Arc::new(MemoryJobStore::new());
    let queue = JobQueue::new(store.clone())
        .with_retry_policy(RetryPolicy::default().with_base_delay(Duration::ZERO));
    let attempts = Arc::new(AtomicU32::new(0));

    let registry = HandlerRegistry::builder()
        .register_fn("flaky", {
            let attempts = Arc::clone(&attempts);
            move |_payload: Value| {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(JobError::execution("connection reset"))
                    } else {
                        Ok(json!({"ok": true}))
                    }
                }
            }
        })
        .build();

    let id = queue.submit("flaky", json!({})).await.unwrap();
    let pool = WorkerPool::new(queue.clone(), registry, pool_config(1));
    pool.start().unwrap();
    wait_for(&store, all_terminal).await;
    pool.shutdown().await;

    let job = queue.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.last_error.as_deref(), Some("Job execution failed: connection reset"));
    assert_eq!(pool.jobs_failed(), 1);
    assert_eq!(pool.jobs_processed(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_waits_for_in_flight_handler() {
    let store = Arc::new(MemoryJobStore::new());
    let queue = JobQueue::new(store.clone());
    let registry = HandlerRegistry::builder()
        .register_fn("slow", |_payload| async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok::<_, JobError>(json!("done"))
        })
        .build();

    let id = queue.submit("slow", json!({})).await.unwrap();
    let pool = WorkerPool::new(queue.clone(), registry, pool_config(1));
    pool.start().unwrap();

    wait_for(&store, |s| {
        s.snapshot()
            .iter()
            .any(|job| job.status == JobStatus::Processing)
    })
    .await;
    pool.shutdown().await;

    assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Completed);
    assert!(!pool.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn builtin_handlers_cover_failure_path() {
    let store = Arc::new(MemoryJobStore::new());
    let queue = JobQueue::new(store.clone());
    let registry = register_builtin(
        HandlerRegistry::builder(),
        &queue,
        &QueueConfig::default(),
    )
    .build();

    queue.submit("unregistered", json!({})).await.unwrap();
    queue
        .submit("cleanup", json!({ "days": 30 }))
        .await
        .unwrap();

    let pool = WorkerPool::new(queue, registry, pool_config(2));
    pool.start().unwrap();
    wait_for(&store, |s| s.len() == 3 && all_terminal(s)).await;
    pool.shutdown().await;

    let jobs = store.snapshot();
    let by_type = |t: &str| jobs.iter().find(|job| job.job_type == t).unwrap().clone();

    assert_eq!(by_type("unregistered").status, JobStatus::Failed);
    assert_eq!(by_type("notification").status, JobStatus::Completed);
    let cleanup = by_type("cleanup");
    assert_eq!(cleanup.status, JobStatus::Completed);
    assert_eq!(cleanup.result, Some(json!({ "queue": 0 })));
}

#[tokio::test]
async fn allowed_types_restrict_the_pool() {
    let store = Arc::new(MemoryJobStore::new());
    let queue = JobQueue::new(store.clone());
    let registry = HandlerRegistry::builder()
        .register_fn("email", |_payload| async move { Ok::<_, JobError>(Value::Null) })
        .register_fn("export", |_payload| async move { Ok::<_, JobError>(Value::Null) })
        .build();

    let email = queue.submit("email", json!({})).await.unwrap();
    let export = queue.submit("export", json!({})).await.unwrap();

    let mut config = pool_config(1);
    config.allowed_types = vec!["email".to_string()];
    let pool = WorkerPool::new(queue.clone(), registry, config);
    pool.start().unwrap();

    wait_for(&store, |s| {
        s.snapshot()
            .iter()
            .any(|job| job.id == email && job.is_terminal())
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.shutdown().await;

    assert_eq!(queue.get(export).await.unwrap().status, JobStatus::Pending);
}
