//! # Task Store
//!
//! Durable task rows, the atomic claim, status transitions and retry
//! bookkeeping. [`TaskStore`] is the seam between the queue and its backend:
//!
//! - [`PgTaskStore`]: PostgreSQL through sqlx, safe across processes
//! - [`InMemoryTaskStore`]: a single mutex-guarded map, safe within one process
//!
//! Every implementation routes status changes through
//! [`TaskStateMachine`](crate::state_machine::TaskStateMachine) and appends
//! the significant ones to the [`TaskLog`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, TaskQueueError};
use crate::models::{
    LogLevel, NewTask, NewTaskType, Page, PageRequest, QueueMetrics, Task, TaskDependency,
    TaskFilter, TaskLogEntry, TaskType,
};
use crate::state_machine::{TaskEvent, TaskStateMachine};
use crate::task_log::TaskLog;

pub use memory::{InMemoryTaskLogSink, InMemoryTaskStore};
pub use postgres::{spawn_enqueue_listener, PgTaskLogSink, PgTaskStore, ENQUEUE_CHANNEL};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new `pending` task. Unknown types are rejected before any write.
    async fn enqueue(&self, new_task: NewTask) -> Result<Task>;

    /// Atomically move up to `limit` claimable tasks to `claimed` for `worker_id`.
    ///
    /// Concurrent callers receive disjoint sets; losing a race yields fewer rows.
    async fn claim_batch(&self, worker_id: &str, limit: u32) -> Result<Vec<Task>>;

    /// `claimed -> processing`, counting the attempt
    async fn mark_processing(&self, task_id: Uuid) -> Result<Task>;

    /// `processing -> completed`
    async fn mark_completed(&self, task_id: Uuid) -> Result<Task>;

    /// `processing -> failed`, scheduling a retry unless attempts are exhausted
    async fn mark_failed(&self, task_id: Uuid, error_message: &str) -> Result<Task>;

    /// Any non-terminal status `-> cancelled`
    async fn cancel(&self, task_id: Uuid) -> Result<Task>;

    async fn find(&self, task_id: Uuid) -> Result<Option<Task>>;

    /// Filtered listing, newest first
    async fn list(&self, filter: &TaskFilter, page: PageRequest) -> Result<Page<Task>>;

    /// Task counts per status across the whole queue
    async fn metrics(&self) -> Result<QueueMetrics>;

    async fn upsert_task_type(&self, task_type: NewTaskType) -> Result<TaskType>;

    async fn find_task_type(&self, name: &str) -> Result<Option<TaskType>>;

    async fn list_task_types(&self) -> Result<Vec<TaskType>>;

    /// Create `specs` so that each task depends on its predecessor; all or nothing
    async fn create_chain(&self, specs: Vec<NewTask>) -> Result<Vec<Task>>;

    /// Add the edge `task_id -> depends_on`, rejecting self-edges and cycles
    async fn add_dependency(&self, task_id: Uuid, depends_on: Uuid) -> Result<TaskDependency>;

    async fn dependencies_of(&self, task_id: Uuid) -> Result<Vec<TaskDependency>>;

    /// Whether every prerequisite of `task_id` has completed
    async fn is_satisfied(&self, task_id: Uuid) -> Result<bool>;

    fn task_log(&self) -> &TaskLog;

    async fn log_entries(&self, task_id: Uuid) -> Result<Vec<TaskLogEntry>> {
        self.task_log().entries(task_id).await
    }
}

/// Error for a conditional update that matched no row.
///
/// `current` is the row as re-read after the update; a missing row means the
/// task does not exist, otherwise the state machine explains the rejection.
pub(crate) fn rejected_transition(
    task_id: Uuid,
    current: Option<&Task>,
    event: &TaskEvent,
) -> TaskQueueError {
    match current {
        None => TaskQueueError::TaskNotFound(task_id),
        Some(task) => match TaskStateMachine::determine_target_state(task, event) {
            Err(err) => err,
            // The row moved between the update and the re-read
            Ok(_) => TaskQueueError::InvalidTransition {
                task_id,
                from: task.status,
                event: event.event_type(),
            },
        },
    }
}

/// Append the log entry for a transition that has just been persisted
pub(crate) async fn record_transition(log: &TaskLog, task: &Task, event: &TaskEvent) {
    let (level, message) = match event {
        TaskEvent::Claim => (
            LogLevel::Info,
            format!(
                "Claimed by {} for attempt {}",
                task.claimed_by.as_deref().unwrap_or("unknown worker"),
                task.attempts + 1
            ),
        ),
        // Entering processing is implied by the claim entry
        TaskEvent::Start => return,
        TaskEvent::Complete => (
            LogLevel::Info,
            format!("Task completed after {} attempt(s)", task.attempts),
        ),
        TaskEvent::Fail(error) => (LogLevel::Error, failure_message(task, error)),
        TaskEvent::Cancel => (LogLevel::Info, "Task cancelled".to_string()),
    };

    log.append(task.id, level, message).await;
}

fn failure_message(task: &Task, error: &str) -> String {
    match task.next_attempt_at {
        Some(retry_at) => format!(
            "Attempt {} failed: {error}. Retry scheduled for {}",
            task.attempts,
            retry_at.to_rfc3339()
        ),
        None => format!(
            "Attempt {} failed: {error}. Retries exhausted, manual intervention required",
            task.attempts
        ),
    }
}

/// Failure bookkeeping shared by both stores: returns `(next_attempt_at, completed_at)`
pub(crate) fn failure_schedule(
    attempts: i32,
    task_type: &TaskType,
    backoff: &crate::backoff::BackoffPolicy,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    if attempts >= task_type.max_attempts {
        (None, Some(now))
    } else {
        let retry_at = now
            .checked_add_signed(backoff.delay_for(task_type, attempts))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (Some(retry_at), None)
    }
}
