//! Shared fixtures for integration tests.
#![allow(dead_code)]

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use task_queue::backoff::BackoffPolicy;
use task_queue::config::WorkerConfig;
use task_queue::models::Task;
use task_queue::queue::TaskQueue;

/// In-memory queue with one registered task type
pub async fn queue_with_type(name: &str, max_attempts: i32, backoff_seconds: i64) -> TaskQueue {
    let queue = TaskQueue::in_memory(BackoffPolicy::default());
    queue
        .task_types()
        .register(name, max_attempts, backoff_seconds)
        .await
        .expect("task type registration");
    queue
}

pub fn worker_config(batch_size: u32) -> WorkerConfig {
    WorkerConfig {
        worker_id: Some("test-worker".to_string()),
        batch_size,
        max_concurrency: 4,
        poll_interval_ms: 50,
        shutdown_timeout_seconds: 5,
        listen_for_notifications: false,
    }
}

/// Processor that succeeds and counts its invocations
pub fn counting_processor(
    calls: Arc<AtomicUsize>,
) -> impl Fn(Task) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static {
    move |_task| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }
}

/// Processor that always fails with `message`
pub fn failing_processor(
    message: &'static str,
) -> impl Fn(Task) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static {
    move |_task| async move { Err::<(), _>(anyhow::anyhow!(message)) }.boxed()
}
