//! # Worker Loop
//!
//! Claims batches of ready tasks, runs their processors with bounded
//! parallelism and records each outcome. Handler errors and panics never
//! escape the loop; they become `failed` transitions with the message stored
//! as `last_error`.
//!
//! The loop wakes on the poll interval, on an in-process enqueue signal or on
//! a PostgreSQL notification forwarded to the same [`Notify`], whichever comes
//! first.

use futures::future::{join_all, FutureExt};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::WorkerConfig;
use crate::error::{Result, TaskQueueError};
use crate::logging::log_task_operation;
use crate::models::Task;
use crate::registry::ProcessorRegistry;
use crate::store::TaskStore;

/// Counts for one `run_once` iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Tasks whose outcome could not be recorded (store error or a
    /// concurrent cancellation)
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    Failed,
    Skipped,
}

pub struct TaskWorker {
    worker_id: String,
    store: Arc<dyn TaskStore>,
    processors: ProcessorRegistry,
    config: WorkerConfig,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
    concurrency: Arc<Semaphore>,
}

impl TaskWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        processors: ProcessorRegistry,
        config: WorkerConfig,
        wake: Arc<Notify>,
    ) -> Self {
        let worker_id = config.resolved_worker_id();
        let concurrency = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            worker_id,
            store,
            processors,
            config,
            wake,
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            concurrency,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Claim one batch and drive every claimed task to an outcome.
    ///
    /// Returns once all tasks of the batch have finished.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn run_once(&self) -> Result<BatchOutcome> {
        let tasks = self
            .store
            .claim_batch(&self.worker_id, self.config.batch_size)
            .await?;

        let mut outcome = BatchOutcome {
            claimed: tasks.len(),
            ..BatchOutcome::default()
        };
        if tasks.is_empty() {
            return Ok(outcome);
        }

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let permit = self
                .concurrency
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| {
                    TaskQueueError::ConfigurationError(
                        "worker concurrency limiter closed".to_string(),
                    )
                })?;
            let store = self.store.clone();
            let processors = self.processors.clone();

            handles.push(tokio::spawn(async move {
                let outcome = execute_task(store.as_ref(), &processors, task).await;
                drop(permit);
                outcome
            }));
        }

        for result in join_all(handles).await {
            match result {
                Ok(TaskOutcome::Completed) => outcome.completed += 1,
                Ok(TaskOutcome::Failed) => outcome.failed += 1,
                Ok(TaskOutcome::Skipped) => outcome.skipped += 1,
                Err(e) => {
                    error!(error = %e, "Task execution join error");
                    outcome.skipped += 1;
                }
            }
        }

        debug!(
            claimed = outcome.claimed,
            completed = outcome.completed,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "Batch finished"
        );
        Ok(outcome)
    }

    /// Loop over `run_once` until [`request_stop`](Self::request_stop)
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(TaskQueueError::ValidationError(format!(
                "Worker {} is already running",
                self.worker_id
            )));
        }
        self.run_loop().await
    }

    /// Ask the loop to exit after the current batch
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        // notify_one keeps a permit when the loop is not waiting yet
        self.shutdown.notify_one();
    }

    /// Run the loop on its own tokio task
    pub fn start(self) -> WorkerHandle {
        let shutdown_timeout = self.config.shutdown_timeout();
        self.running.store(true, Ordering::Release);
        let worker = Arc::new(self);
        let loop_worker = worker.clone();
        let join = tokio::spawn(async move { loop_worker.run_loop().await });

        WorkerHandle {
            worker,
            join,
            listener: None,
            shutdown_timeout,
        }
    }

    async fn run_loop(&self) -> Result<()> {
        info!(
            worker_id = %self.worker_id,
            batch_size = self.config.batch_size,
            max_concurrency = self.config.max_concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            "Worker loop started"
        );

        while self.is_running() {
            let wait = match self.run_once().await {
                // A full batch suggests more work is waiting
                Ok(outcome) if outcome.claimed as u64 >= u64::from(self.config.batch_size) => {
                    Duration::ZERO
                }
                Ok(_) => self.config.poll_interval(),
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "Batch processing failed");
                    self.config.poll_interval()
                }
            };

            if !self.is_running() {
                break;
            }
            if wait.is_zero() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(wait) => {},
                _ = self.wake.notified() => {
                    debug!(worker_id = %self.worker_id, "Woken by enqueue notification");
                },
                _ = self.shutdown.notified() => {
                    debug!(worker_id = %self.worker_id, "Shutdown notification received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Release);
        info!(worker_id = %self.worker_id, "Worker loop stopped");
        Ok(())
    }
}

/// Handle to a worker loop started with [`TaskWorker::start`]
pub struct WorkerHandle {
    worker: Arc<TaskWorker>,
    join: JoinHandle<Result<()>>,
    /// Notification forwarder owned by this worker, aborted on stop
    listener: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl WorkerHandle {
    pub(crate) fn with_listener(mut self, listener: Option<JoinHandle<()>>) -> Self {
        self.listener = listener;
        self
    }

    pub fn worker_id(&self) -> &str {
        self.worker.worker_id()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the loop and wait for in-flight tasks, bounded by the shutdown timeout
    pub async fn stop(self) -> Result<()> {
        info!(worker_id = %self.worker.worker_id(), "Stopping worker");
        if let Some(listener) = &self.listener {
            listener.abort();
        }
        self.worker.request_stop();

        match tokio::time::timeout(self.shutdown_timeout, self.join).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(TaskQueueError::ValidationError(format!(
                "Worker task ended abnormally: {e}"
            ))),
            Err(_) => {
                warn!(
                    worker_id = %self.worker.worker_id(),
                    timeout_seconds = self.shutdown_timeout.as_secs(),
                    "Worker did not stop within timeout"
                );
                Err(TaskQueueError::Timeout(
                    "Worker stop timeout exceeded".to_string(),
                ))
            }
        }
    }
}

async fn execute_task(store: &dyn TaskStore, processors: &ProcessorRegistry, task: Task) -> TaskOutcome {
    let task_id = task.id;

    let task = match store.mark_processing(task_id).await {
        Ok(task) => task,
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Could not start claimed task");
            return TaskOutcome::Skipped;
        }
    };

    match run_processor(processors, &task).await {
        Ok(()) => match store.mark_completed(task_id).await {
            Ok(done) => {
                log_task_operation("complete", task_id, &done.task_type, done.status.as_str(), None);
                TaskOutcome::Completed
            }
            Err(e) => record_error(task_id, "complete", &e),
        },
        Err(failure) => {
            let message = last_error_text(&failure);
            match store.mark_failed(task_id, &message).await {
                Ok(failed) => {
                    if failed.retries_exhausted() {
                        warn!(
                            task_id = %task_id,
                            task_type = %failed.task_type,
                            attempts = failed.attempts,
                            last_error = %message,
                            "Task exhausted its retries and needs manual intervention"
                        );
                    } else {
                        log_task_operation(
                            "fail",
                            task_id,
                            &failed.task_type,
                            failed.status.as_str(),
                            Some(&message),
                        );
                    }
                    TaskOutcome::Failed
                }
                Err(e) => record_error(task_id, "fail", &e),
            }
        }
    }
}

/// Resolve and invoke the processor, turning errors and panics into typed failures
async fn run_processor(processors: &ProcessorRegistry, task: &Task) -> Result<()> {
    let processor = processors.resolve(&task.task_type)?;
    let failure = match AssertUnwindSafe(processor.process(task)).catch_unwind().await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => format!("{e:#}"),
        Err(panic) => panic_message(panic.as_ref()),
    };
    Err(TaskQueueError::HandlerError {
        task_type: task.task_type.clone(),
        message: failure,
    })
}

/// Text stored as `last_error`: the handler's own message, or the error itself
fn last_error_text(error: &TaskQueueError) -> String {
    match error {
        TaskQueueError::HandlerError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn record_error(task_id: uuid::Uuid, operation: &str, error: &TaskQueueError) -> TaskOutcome {
    if error.is_invalid_transition() {
        // Typically cancelled while the handler was running
        info!(task_id = %task_id, operation, error = %error, "Dropping outcome for task");
    } else {
        error!(task_id = %task_id, operation, error = %error, "Failed to record task outcome");
    }
    TaskOutcome::Skipped
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_processor_failures_are_typed() {
        let processors = ProcessorRegistry::new();
        let task = Task::from_new(NewTask::new("EMIT_DOC", json!({})), Utc::now());

        let missing = run_processor(&processors, &task).await.unwrap_err();
        assert_eq!(missing, TaskQueueError::ProcessorNotFound("EMIT_DOC".to_string()));
        assert_eq!(last_error_text(&missing), missing.to_string());

        processors.register_fn("EMIT_DOC", |_task| {
            async { Err(anyhow::anyhow!("boom").context("emitting document")) }.boxed()
        });
        let failed = run_processor(&processors, &task).await.unwrap_err();
        assert_eq!(
            failed,
            TaskQueueError::HandlerError {
                task_type: "EMIT_DOC".to_string(),
                message: "emitting document: boom".to_string(),
            }
        );
        assert_eq!(last_error_text(&failed), "emitting document: boom");
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked: boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("kaput"));
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked: kaput");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked");
    }
}
