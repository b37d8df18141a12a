//! PostgreSQL task store.
//!
//! Claims use `FOR UPDATE ... SKIP LOCKED` so that concurrent workers, in this
//! process or others, never receive the same row. Status changes are
//! conditional updates guarded by the source statuses the state machine
//! accepts; an update that matches nothing is explained by re-reading the row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgListener;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{failure_schedule, record_transition, rejected_transition, TaskStore};
use crate::backoff::BackoffPolicy;
use crate::error::{Result, TaskQueueError};
use crate::models::{
    NewTask, NewTaskLogEntry, NewTaskType, Page, PageRequest, QueueMetrics, Task, TaskDependency,
    TaskFilter, TaskLogEntry, TaskType,
};
use crate::state_machine::{TaskEvent, TaskStateMachine, TaskStatus};
use crate::task_log::{TaskLog, TaskLogSink};

/// Channel notified in the enqueue transaction; the payload is the task type
pub const ENQUEUE_CHANNEL: &str = "task_queue_enqueued";

/// Serializes dependency edge insertion so concurrent cycle checks see each other
const DEPENDENCY_LOCK_KEY: i64 = 0x7461_736b_5f64_6570;

const TASK_COLUMNS: &str = "id, task_type, payload, resource_id, priority, status, attempts, scheduled_for, \
     next_attempt_at, last_error, claimed_by, created_at, updated_at, completed_at";

#[derive(Debug, FromRow)]
struct TaskRow {
    id: Uuid,
    task_type: String,
    payload: serde_json::Value,
    resource_id: Option<String>,
    priority: i32,
    status: String,
    attempts: i32,
    scheduled_for: DateTime<Utc>,
    next_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    claimed_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = TaskQueueError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let status: TaskStatus = row.status.parse().map_err(TaskQueueError::DatabaseError)?;
        Ok(Task {
            id: row.id,
            task_type: row.task_type,
            payload: row.payload,
            resource_id: row.resource_id,
            priority: row.priority,
            status,
            attempts: row.attempts,
            scheduled_for: row.scheduled_for,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
            claimed_by: row.claimed_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

fn into_tasks(rows: Vec<TaskRow>) -> Result<Vec<Task>> {
    rows.into_iter().map(Task::try_from).collect()
}

fn status_list(statuses: &[TaskStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
    backoff: BackoffPolicy,
    log: TaskLog,
}

impl PgTaskStore {
    pub fn new(pool: PgPool, backoff: BackoffPolicy) -> Self {
        let log = TaskLog::new(Arc::new(PgTaskLogSink::new(pool.clone())));
        Self { pool, backoff, log }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_task(tx: &mut Transaction<'_, Postgres>, new_task: NewTask) -> Result<Task> {
        let new_task = new_task.validate()?;

        let known: Option<String> =
            sqlx::query_scalar("SELECT name FROM task_types WHERE name = $1")
                .bind(&new_task.task_type)
                .fetch_optional(&mut **tx)
                .await?;
        if known.is_none() {
            return Err(TaskQueueError::InvalidTaskType(new_task.task_type));
        }

        let task = Task::from_new(new_task, Utc::now());
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "INSERT INTO tasks (id, task_type, payload, resource_id, priority, status, attempts, scheduled_for, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, $8) \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task.id)
        .bind(&task.task_type)
        .bind(&task.payload)
        .bind(&task.resource_id)
        .bind(task.priority)
        .bind(task.status.as_str())
        .bind(task.scheduled_for)
        .bind(task.created_at)
        .fetch_one(&mut **tx)
        .await?;

        Task::try_from(row)
    }

    async fn notify_enqueued(tx: &mut Transaction<'_, Postgres>, task_type: &str) -> Result<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(ENQUEUE_CHANNEL)
            .bind(task_type)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run a guarded single-row update, resolving a miss into the proper error
    async fn guarded_update(&self, task_id: Uuid, event: &TaskEvent, set_clause: &str) -> Result<Task> {
        let sources = status_list(TaskStateMachine::source_states(event));
        let sql = format!(
            "UPDATE tasks SET {set_clause}, updated_at = NOW() \
             WHERE id = $1 AND status = ANY($2) \
             RETURNING {TASK_COLUMNS}"
        );

        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(task_id)
            .bind(&sources)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(task_id = %task_id, event = event.event_type(), error = %e, "Task transition query failed");
                TaskQueueError::DatabaseError(format!("Failed to apply {}: {e}", event.event_type()))
            })?;

        match row {
            Some(row) => Task::try_from(row),
            None => {
                let current = self.find(task_id).await?;
                Err(rejected_transition(task_id, current.as_ref(), event))
            }
        }
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &TaskFilter) {
        builder.push(" WHERE TRUE");
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(task_type) = &filter.task_type {
            builder.push(" AND task_type = ").push_bind(task_type.clone());
        }
        if let Some(from) = filter.created_from {
            builder.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(until) = filter.created_until {
            builder.push(" AND created_at < ").push_bind(until);
        }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    #[instrument(skip(self, new_task), fields(task_type = %new_task.task_type))]
    async fn enqueue(&self, new_task: NewTask) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        let task = Self::insert_task(&mut tx, new_task).await?;
        Self::notify_enqueued(&mut tx, &task.task_type).await?;
        tx.commit().await?;

        debug!(task_id = %task.id, "Task enqueued");
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn claim_batch(&self, worker_id: &str, limit: u32) -> Result<Vec<Task>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Rows come back in claim order: priority, then readiness, then age
        let sql = format!(
            r#"
            WITH claimable AS (
                SELECT c.id,
                       c.priority,
                       COALESCE(c.next_attempt_at, c.scheduled_for) AS ready_at,
                       c.created_at
                FROM tasks c
                JOIN task_types tt ON tt.name = c.task_type
                WHERE (
                    (c.status = 'pending' AND c.scheduled_for <= NOW())
                    OR (
                        c.status = 'failed'
                        AND c.completed_at IS NULL
                        AND c.next_attempt_at <= NOW()
                        AND c.attempts < tt.max_attempts
                    )
                )
                AND NOT EXISTS (
                    SELECT 1
                    FROM task_dependencies d
                    JOIN tasks p ON p.id = d.depends_on_task_id
                    WHERE d.task_id = c.id AND p.status <> 'completed'
                )
                ORDER BY c.priority DESC, ready_at, c.created_at
                LIMIT $2
                FOR UPDATE OF c SKIP LOCKED
            ),
            claimed AS (
                UPDATE tasks AS t
                SET status = 'claimed',
                    claimed_by = $1,
                    next_attempt_at = NULL,
                    updated_at = NOW()
                FROM claimable
                WHERE t.id = claimable.id
                RETURNING {}
            )
            SELECT claimed.*
            FROM claimed
            JOIN claimable ON claimable.id = claimed.id
            ORDER BY claimable.priority DESC, claimable.ready_at, claimable.created_at
            "#,
            TASK_COLUMNS
                .split(", ")
                .map(|column| format!("t.{column}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(worker_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(worker_id = %worker_id, limit = limit, error = %e, "Failed to claim tasks");
                TaskQueueError::DatabaseError(format!("Failed to claim tasks: {e}"))
            })?;

        let tasks = into_tasks(rows)?;

        for task in &tasks {
            record_transition(&self.log, task, &TaskEvent::Claim).await;
        }
        if !tasks.is_empty() {
            debug!(claimed = tasks.len(), "Claimed tasks");
        }
        Ok(tasks)
    }

    async fn mark_processing(&self, task_id: Uuid) -> Result<Task> {
        let event = TaskEvent::Start;
        let task = self
            .guarded_update(task_id, &event, "status = 'processing', attempts = attempts + 1")
            .await?;
        record_transition(&self.log, &task, &event).await;
        Ok(task)
    }

    async fn mark_completed(&self, task_id: Uuid) -> Result<Task> {
        let event = TaskEvent::Complete;
        let task = self
            .guarded_update(task_id, &event, "status = 'completed', completed_at = NOW()")
            .await?;
        record_transition(&self.log, &task, &event).await;
        Ok(task)
    }

    #[instrument(skip(self, error_message))]
    async fn mark_failed(&self, task_id: Uuid, error_message: &str) -> Result<Task> {
        let event = TaskEvent::fail_with_error(error_message);
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE"
        ))
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?;
        let current = row.map(Task::try_from).transpose()?;
        let Some(current) = current else {
            return Err(TaskQueueError::TaskNotFound(task_id));
        };
        TaskStateMachine::determine_target_state(&current, &event)?;

        let task_type = sqlx::query_as::<_, TaskType>(
            "SELECT name, max_attempts, retry_backoff_seconds, description, created_at \
             FROM task_types WHERE name = $1",
        )
        .bind(&current.task_type)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| TaskQueueError::InvalidTaskType(current.task_type.clone()))?;

        let now = Utc::now();
        let (next_attempt_at, completed_at) =
            failure_schedule(current.attempts, &task_type, &self.backoff, now);

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE tasks \
             SET status = 'failed', last_error = $2, next_attempt_at = $3, completed_at = $4, updated_at = $5 \
             WHERE id = $1 \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id)
        .bind(error_message)
        .bind(next_attempt_at)
        .bind(completed_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let task = Task::try_from(row)?;
        record_transition(&self.log, &task, &event).await;
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn cancel(&self, task_id: Uuid) -> Result<Task> {
        let event = TaskEvent::Cancel;
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE tasks \
             SET status = 'cancelled', next_attempt_at = NULL, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 \
               AND (status IN ('pending', 'claimed', 'processing') \
                    OR (status = 'failed' AND completed_at IS NULL)) \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        let task = match row {
            Some(row) => Task::try_from(row)?,
            None => {
                let current = self.find(task_id).await?;
                return Err(rejected_transition(task_id, current.as_ref(), &event));
            }
        };

        info!(task_id = %task_id, task_type = %task.task_type, "Task cancelled");
        record_transition(&self.log, &task, &event).await;
        Ok(task)
    }

    async fn find(&self, task_id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Task::try_from).transpose()
    }

    async fn list(&self, filter: &TaskFilter, page: PageRequest) -> Result<Page<Task>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tasks");
        Self::push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {TASK_COLUMNS} FROM tasks"));
        Self::push_filters(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(page.limit() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);
        let rows: Vec<TaskRow> = query.build_query_as::<TaskRow>().fetch_all(&self.pool).await?;

        Ok(Page::new(into_tasks(rows)?, total.max(0) as u64, page))
    }

    async fn metrics(&self) -> Result<QueueMetrics> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let counts = rows
            .into_iter()
            .map(|(status, count)| -> Result<(TaskStatus, i64)> {
                let status: TaskStatus = status.parse().map_err(TaskQueueError::DatabaseError)?;
                Ok((status, count))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(QueueMetrics::from_counts(counts))
    }

    #[instrument(skip(self, task_type), fields(name = %task_type.name))]
    async fn upsert_task_type(&self, task_type: NewTaskType) -> Result<TaskType> {
        task_type.validate()?;
        let stored = sqlx::query_as::<_, TaskType>(
            r#"
            INSERT INTO task_types (name, max_attempts, retry_backoff_seconds, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET max_attempts = EXCLUDED.max_attempts,
                retry_backoff_seconds = EXCLUDED.retry_backoff_seconds,
                description = EXCLUDED.description
            RETURNING name, max_attempts, retry_backoff_seconds, description, created_at
            "#,
        )
        .bind(&task_type.name)
        .bind(task_type.max_attempts)
        .bind(task_type.retry_backoff_seconds)
        .bind(&task_type.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn find_task_type(&self, name: &str) -> Result<Option<TaskType>> {
        let task_type = sqlx::query_as::<_, TaskType>(
            "SELECT name, max_attempts, retry_backoff_seconds, description, created_at \
             FROM task_types WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task_type)
    }

    async fn list_task_types(&self) -> Result<Vec<TaskType>> {
        let task_types = sqlx::query_as::<_, TaskType>(
            "SELECT name, max_attempts, retry_backoff_seconds, description, created_at \
             FROM task_types ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(task_types)
    }

    #[instrument(skip(self, specs), fields(chain_length = specs.len()))]
    async fn create_chain(&self, specs: Vec<NewTask>) -> Result<Vec<Task>> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }

        // Dropping the transaction on any error rolls back every insert
        let mut tx = self.pool.begin().await?;
        let mut tasks: Vec<Task> = Vec::with_capacity(specs.len());

        for spec in specs {
            let task = Self::insert_task(&mut tx, spec).await?;
            if let Some(previous) = tasks.last() {
                sqlx::query(
                    "INSERT INTO task_dependencies (task_id, depends_on_task_id, created_at) \
                     VALUES ($1, $2, $3)",
                )
                .bind(task.id)
                .bind(previous.id)
                .bind(task.created_at)
                .execute(&mut *tx)
                .await?;
            }
            tasks.push(task);
        }

        if let Some(head) = tasks.first() {
            Self::notify_enqueued(&mut tx, &head.task_type).await?;
        }
        tx.commit().await?;
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn add_dependency(&self, task_id: Uuid, depends_on: Uuid) -> Result<TaskDependency> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(DEPENDENCY_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM tasks WHERE id = $1 FOR UPDATE")
                .bind(task_id)
                .fetch_optional(&mut *tx)
                .await?;
        let status: TaskStatus = status
            .ok_or(TaskQueueError::TaskNotFound(task_id))?
            .parse()
            .map_err(TaskQueueError::DatabaseError)?;

        let prerequisite_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tasks WHERE id = $1)")
                .bind(depends_on)
                .fetch_one(&mut *tx)
                .await?;
        if !prerequisite_exists {
            return Err(TaskQueueError::TaskNotFound(depends_on));
        }
        if status != TaskStatus::Pending {
            return Err(TaskQueueError::InvalidDependency(format!(
                "task {task_id} is {status} and can no longer gain prerequisites"
            )));
        }

        if task_id == depends_on {
            return Err(TaskQueueError::CycleDetected {
                task_id,
                depends_on,
            });
        }

        // Walk prerequisites of `depends_on`; reaching `task_id` closes a cycle
        let closes_cycle: bool = sqlx::query_scalar(
            r#"
            WITH RECURSIVE reachable(id) AS (
                SELECT depends_on_task_id FROM task_dependencies WHERE task_id = $1
                UNION
                SELECT d.depends_on_task_id
                FROM task_dependencies d
                JOIN reachable r ON d.task_id = r.id
            )
            SELECT EXISTS (SELECT 1 FROM reachable WHERE id = $2)
            "#,
        )
        .bind(depends_on)
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await?;
        if closes_cycle {
            warn!(task_id = %task_id, depends_on = %depends_on, "Rejected dependency cycle");
            return Err(TaskQueueError::CycleDetected {
                task_id,
                depends_on,
            });
        }

        let edge = sqlx::query_as::<_, TaskDependency>(
            r#"
            INSERT INTO task_dependencies (task_id, depends_on_task_id)
            VALUES ($1, $2)
            ON CONFLICT (task_id, depends_on_task_id)
            DO UPDATE SET task_id = EXCLUDED.task_id
            RETURNING task_id, depends_on_task_id, created_at
            "#,
        )
        .bind(task_id)
        .bind(depends_on)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(edge)
    }

    async fn dependencies_of(&self, task_id: Uuid) -> Result<Vec<TaskDependency>> {
        if self.find(task_id).await?.is_none() {
            return Err(TaskQueueError::TaskNotFound(task_id));
        }
        let edges = sqlx::query_as::<_, TaskDependency>(
            "SELECT task_id, depends_on_task_id, created_at FROM task_dependencies \
             WHERE task_id = $1 ORDER BY created_at, depends_on_task_id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(edges)
    }

    async fn is_satisfied(&self, task_id: Uuid) -> Result<bool> {
        let satisfied: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT NOT EXISTS (
                SELECT 1
                FROM task_dependencies d
                JOIN tasks p ON p.id = d.depends_on_task_id
                WHERE d.task_id = t.id AND p.status <> 'completed'
            )
            FROM tasks t
            WHERE t.id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        satisfied.ok_or(TaskQueueError::TaskNotFound(task_id))
    }

    fn task_log(&self) -> &TaskLog {
        &self.log
    }
}

#[derive(Debug, FromRow)]
struct TaskLogRow {
    id: i64,
    task_id: Uuid,
    level: String,
    message: String,
    recorded_at: DateTime<Utc>,
}

/// Log sink writing to the `task_logs` table
#[derive(Clone)]
pub struct PgTaskLogSink {
    pool: PgPool,
}

impl PgTaskLogSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskLogSink for PgTaskLogSink {
    async fn write(&self, entry: NewTaskLogEntry) -> Result<()> {
        sqlx::query("INSERT INTO task_logs (task_id, level, message) VALUES ($1, $2, $3)")
            .bind(entry.task_id)
            .bind(entry.level.as_str())
            .bind(&entry.message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn entries_for(&self, task_id: Uuid) -> Result<Vec<TaskLogEntry>> {
        let rows = sqlx::query_as::<_, TaskLogRow>(
            "SELECT id, task_id, level, message, recorded_at FROM task_logs \
             WHERE task_id = $1 ORDER BY id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TaskLogEntry {
                    id: row.id,
                    task_id: row.task_id,
                    level: row.level.parse().map_err(TaskQueueError::DatabaseError)?,
                    message: row.message,
                    recorded_at: row.recorded_at,
                })
            })
            .collect()
    }
}

/// Forward `task_queue_enqueued` notifications from other processes to `wake`.
///
/// The listener reconnects on its own after connection loss; receive errors
/// are logged and retried after a short pause.
pub async fn spawn_enqueue_listener(pool: &PgPool, wake: Arc<Notify>) -> Result<JoinHandle<()>> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(ENQUEUE_CHANNEL).await?;
    info!(channel = ENQUEUE_CHANNEL, "Listening for enqueue notifications");

    Ok(tokio::spawn(async move {
        loop {
            match listener.recv().await {
                Ok(notification) => {
                    debug!(task_type = notification.payload(), "Enqueue notification received");
                    wake.notify_one();
                }
                Err(e) => {
                    warn!(error = %e, "Enqueue listener error, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }))
}
