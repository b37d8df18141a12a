//! In-process task store.
//!
//! All state sits behind one mutex, so the claim, every transition and chain
//! creation are atomic with respect to each other within the process. The
//! lock is never held across an await; log entries are appended after it is
//! released.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{failure_schedule, record_transition, rejected_transition, TaskStore};
use crate::backoff::BackoffPolicy;
use crate::dependency::would_create_cycle;
use crate::error::{Result, TaskQueueError};
use crate::models::{
    NewTask, NewTaskLogEntry, NewTaskType, Page, PageRequest, QueueMetrics, Task, TaskDependency,
    TaskFilter, TaskLogEntry, TaskType,
};
use crate::state_machine::{TaskEvent, TaskStateMachine, TaskStatus};
use crate::task_log::{TaskLog, TaskLogSink};

#[derive(Default)]
struct State {
    tasks: HashMap<Uuid, Task>,
    task_types: HashMap<String, TaskType>,
    dependencies: Vec<TaskDependency>,
}

impl State {
    fn task_type(&self, name: &str) -> Result<&TaskType> {
        self.task_types
            .get(name)
            .ok_or_else(|| TaskQueueError::InvalidTaskType(name.to_string()))
    }

    fn prerequisites_completed(&self, task_id: Uuid) -> bool {
        self.dependencies
            .iter()
            .filter(|edge| edge.task_id == task_id)
            .all(|edge| {
                self.tasks
                    .get(&edge.depends_on_task_id)
                    .is_some_and(|t| t.status.satisfies_dependencies())
            })
    }

    fn is_claimable(&self, task: &Task, now: DateTime<Utc>) -> bool {
        let Some(task_type) = self.task_types.get(&task.task_type) else {
            return false;
        };
        task.is_due(now, task_type.max_attempts)
            && !task.retries_exhausted()
            && self.prerequisites_completed(task.id)
    }

    /// Validate `new_task` against the registered types and build the row
    fn prepare(&self, new_task: NewTask, now: DateTime<Utc>) -> Result<Task> {
        let new_task = new_task.validate()?;
        self.task_type(&new_task.task_type)?;
        Ok(Task::from_new(new_task, now))
    }
}

pub struct InMemoryTaskStore {
    state: Mutex<State>,
    backoff: BackoffPolicy,
    log: TaskLog,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl InMemoryTaskStore {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self::with_log_sink(backoff, Arc::new(InMemoryTaskLogSink::default()))
    }

    pub fn with_log_sink(backoff: BackoffPolicy, sink: Arc<dyn TaskLogSink>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            backoff,
            log: TaskLog::new(sink),
        }
    }

    /// Apply `event` to a task under the lock, letting `update` fill in the
    /// fields specific to the transition.
    fn transition<F>(&self, task_id: Uuid, event: &TaskEvent, update: F) -> Result<Task>
    where
        F: FnOnce(&mut Task, &State, DateTime<Utc>) -> Result<()>,
    {
        let now = Utc::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let current = state.tasks.get(&task_id);
        let target = match current {
            Some(task) if TaskStateMachine::source_states(event).contains(&task.status) => {
                TaskStateMachine::determine_target_state(task, event)?
            }
            other => return Err(rejected_transition(task_id, other, event)),
        };

        let mut updated = state.tasks[&task_id].clone();
        updated.status = target;
        updated.updated_at = now;
        update(&mut updated, state, now)?;

        state.tasks.insert(task_id, updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    #[instrument(skip(self, new_task), fields(task_type = %new_task.task_type))]
    async fn enqueue(&self, new_task: NewTask) -> Result<Task> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let task = state.prepare(new_task, now)?;
        state.tasks.insert(task.id, task.clone());
        debug!(task_id = %task.id, "Task enqueued");
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn claim_batch(&self, worker_id: &str, limit: u32) -> Result<Vec<Task>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let claimed = {
            let mut state = self.state.lock();

            let mut candidates: Vec<&Task> = state
                .tasks
                .values()
                .filter(|task| state.is_claimable(task, now))
                .collect();
            candidates.sort_by_key(|task| task.claim_key());
            let ids: Vec<Uuid> = candidates
                .into_iter()
                .take(limit as usize)
                .map(|task| task.id)
                .collect();

            let mut claimed = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(task) = state.tasks.get_mut(&id) {
                    task.status = TaskStatus::Claimed;
                    task.claimed_by = Some(worker_id.to_string());
                    task.next_attempt_at = None;
                    task.updated_at = now;
                    claimed.push(task.clone());
                }
            }
            claimed
        };

        for task in &claimed {
            record_transition(&self.log, task, &TaskEvent::Claim).await;
        }
        Ok(claimed)
    }

    async fn mark_processing(&self, task_id: Uuid) -> Result<Task> {
        let event = TaskEvent::Start;
        let task = self.transition(task_id, &event, |task, _, _| {
            task.attempts += 1;
            Ok(())
        })?;
        record_transition(&self.log, &task, &event).await;
        Ok(task)
    }

    async fn mark_completed(&self, task_id: Uuid) -> Result<Task> {
        let event = TaskEvent::Complete;
        let task = self.transition(task_id, &event, |task, _, now| {
            task.completed_at = Some(now);
            Ok(())
        })?;
        record_transition(&self.log, &task, &event).await;
        Ok(task)
    }

    async fn mark_failed(&self, task_id: Uuid, error_message: &str) -> Result<Task> {
        let event = TaskEvent::fail_with_error(error_message);
        let backoff = self.backoff;
        let task = self.transition(task_id, &event, |task, state, now| {
            let task_type = state.task_type(&task.task_type)?;
            let (next_attempt_at, completed_at) =
                failure_schedule(task.attempts, task_type, &backoff, now);
            task.last_error = Some(error_message.to_string());
            task.next_attempt_at = next_attempt_at;
            task.completed_at = completed_at;
            Ok(())
        })?;
        record_transition(&self.log, &task, &event).await;
        Ok(task)
    }

    async fn cancel(&self, task_id: Uuid) -> Result<Task> {
        let event = TaskEvent::Cancel;
        let task = self.transition(task_id, &event, |task, _, now| {
            task.next_attempt_at = None;
            task.completed_at = Some(now);
            Ok(())
        })?;
        record_transition(&self.log, &task, &event).await;
        Ok(task)
    }

    async fn find(&self, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self.state.lock().tasks.get(&task_id).cloned())
    }

    async fn list(&self, filter: &TaskFilter, page: PageRequest) -> Result<Page<Task>> {
        let state = self.state.lock();
        let mut matching: Vec<&Task> = state
            .tasks
            .values()
            .filter(|task| filter.matches(task))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = matching.len() as u64;
        let data = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();
        Ok(Page::new(data, total, page))
    }

    async fn metrics(&self) -> Result<QueueMetrics> {
        let state = self.state.lock();
        Ok(QueueMetrics::from_counts(
            state.tasks.values().map(|task| (task.status, 1)),
        ))
    }

    async fn upsert_task_type(&self, task_type: NewTaskType) -> Result<TaskType> {
        task_type.validate()?;
        let mut state = self.state.lock();
        let created_at = state
            .task_types
            .get(&task_type.name)
            .map_or_else(Utc::now, |existing| existing.created_at);
        let task_type = task_type.into_task_type(created_at);
        state
            .task_types
            .insert(task_type.name.clone(), task_type.clone());
        Ok(task_type)
    }

    async fn find_task_type(&self, name: &str) -> Result<Option<TaskType>> {
        Ok(self.state.lock().task_types.get(name).cloned())
    }

    async fn list_task_types(&self) -> Result<Vec<TaskType>> {
        let mut types: Vec<TaskType> = self.state.lock().task_types.values().cloned().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    #[instrument(skip(self, specs), fields(chain_length = specs.len()))]
    async fn create_chain(&self, specs: Vec<NewTask>) -> Result<Vec<Task>> {
        let now = Utc::now();
        let mut state = self.state.lock();

        // Validate every request before touching shared state
        let tasks = specs
            .into_iter()
            .map(|spec| state.prepare(spec, now))
            .collect::<Result<Vec<Task>>>()?;

        for pair in tasks.windows(2) {
            state.dependencies.push(TaskDependency {
                task_id: pair[1].id,
                depends_on_task_id: pair[0].id,
                created_at: now,
            });
        }
        for task in &tasks {
            state.tasks.insert(task.id, task.clone());
        }

        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn add_dependency(&self, task_id: Uuid, depends_on: Uuid) -> Result<TaskDependency> {
        let mut state = self.state.lock();

        let task = state
            .tasks
            .get(&task_id)
            .ok_or(TaskQueueError::TaskNotFound(task_id))?;
        if !state.tasks.contains_key(&depends_on) {
            return Err(TaskQueueError::TaskNotFound(depends_on));
        }
        if task.status != TaskStatus::Pending {
            return Err(TaskQueueError::InvalidDependency(format!(
                "task {task_id} is {} and can no longer gain prerequisites",
                task.status
            )));
        }

        if let Some(existing) = state
            .dependencies
            .iter()
            .find(|edge| edge.task_id == task_id && edge.depends_on_task_id == depends_on)
        {
            return Ok(existing.clone());
        }

        if would_create_cycle(&state.dependencies, task_id, depends_on) {
            return Err(TaskQueueError::CycleDetected {
                task_id,
                depends_on,
            });
        }

        let edge = TaskDependency {
            task_id,
            depends_on_task_id: depends_on,
            created_at: Utc::now(),
        };
        state.dependencies.push(edge.clone());
        Ok(edge)
    }

    async fn dependencies_of(&self, task_id: Uuid) -> Result<Vec<TaskDependency>> {
        let state = self.state.lock();
        if !state.tasks.contains_key(&task_id) {
            return Err(TaskQueueError::TaskNotFound(task_id));
        }
        Ok(state
            .dependencies
            .iter()
            .filter(|edge| edge.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn is_satisfied(&self, task_id: Uuid) -> Result<bool> {
        let state = self.state.lock();
        if !state.tasks.contains_key(&task_id) {
            return Err(TaskQueueError::TaskNotFound(task_id));
        }
        Ok(state.prerequisites_completed(task_id))
    }

    fn task_log(&self) -> &TaskLog {
        &self.log
    }
}

/// Log sink keeping entries in memory, in insertion order
#[derive(Default)]
pub struct InMemoryTaskLogSink {
    entries: Mutex<Vec<TaskLogEntry>>,
    next_id: AtomicI64,
}

#[async_trait]
impl TaskLogSink for InMemoryTaskLogSink {
    async fn write(&self, entry: NewTaskLogEntry) -> Result<()> {
        let mut entries = self.entries.lock();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        entries.push(TaskLogEntry {
            id,
            task_id: entry.task_id,
            level: entry.level,
            message: entry.message,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn entries_for(&self, task_id: Uuid) -> Result<Vec<TaskLogEntry>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|entry| entry.task_id == task_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogLevel;
    use serde_json::json;

    async fn store_with_type(max_attempts: i32, backoff_seconds: i64) -> InMemoryTaskStore {
        let store = InMemoryTaskStore::default();
        store
            .upsert_task_type(NewTaskType::new("EMIT_DOC", max_attempts, backoff_seconds))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_enqueue_rejects_unknown_type() {
        let store = store_with_type(3, 0).await;
        let err = store
            .enqueue(NewTask::new("UNKNOWN", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, TaskQueueError::InvalidTaskType("UNKNOWN".to_string()));
        assert_eq!(
            store
                .list(&TaskFilter::default(), PageRequest::default())
                .await
                .unwrap()
                .meta
                .total,
            0
        );
    }

    #[tokio::test]
    async fn test_claim_respects_schedule() {
        let store = store_with_type(3, 0).await;
        let future = Utc::now() + chrono::Duration::hours(1);
        store
            .enqueue(NewTask::new("EMIT_DOC", json!({})).scheduled_for(future))
            .await
            .unwrap();
        let due = store.enqueue(NewTask::new("EMIT_DOC", json!({}))).await.unwrap();

        let claimed = store.claim_batch("worker-a", 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due.id);
        assert_eq!(claimed[0].claimed_by.as_deref(), Some("worker-a"));
        assert!(store.claim_batch("worker-a", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_and_log() {
        let store = store_with_type(3, 0).await;
        let task = store.enqueue(NewTask::new("EMIT_DOC", json!({"id": 1}))).await.unwrap();

        store.claim_batch("worker-a", 1).await.unwrap();
        let processing = store.mark_processing(task.id).await.unwrap();
        assert_eq!(processing.attempts, 1);
        let done = store.mark_completed(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());

        let entries = store.log_entries(task.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.level == LogLevel::Info));
    }

    struct FailingSink;

    #[async_trait]
    impl TaskLogSink for FailingSink {
        async fn write(&self, _entry: NewTaskLogEntry) -> Result<()> {
            Err(TaskQueueError::DatabaseError("task_logs unavailable".to_string()))
        }

        async fn entries_for(&self, _task_id: Uuid) -> Result<Vec<TaskLogEntry>> {
            Err(TaskQueueError::DatabaseError("task_logs unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_log_failure_keeps_transitions() {
        let store = InMemoryTaskStore::with_log_sink(BackoffPolicy::default(), Arc::new(FailingSink));
        store
            .upsert_task_type(NewTaskType::new("EMIT_DOC", 3, 0))
            .await
            .unwrap();
        let task = store.enqueue(NewTask::new("EMIT_DOC", json!({"id": 42}))).await.unwrap();

        assert_eq!(store.claim_batch("worker-a", 1).await.unwrap().len(), 1);
        store.mark_processing(task.id).await.unwrap();
        let done = store.mark_completed(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);

        let stored = store.find(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.attempts, 1);
        assert!(store.log_entries(task.id).await.is_err());
    }

    #[tokio::test]
    async fn test_exhausted_failure_is_terminal() {
        let store = store_with_type(1, 0).await;
        let task = store.enqueue(NewTask::new("EMIT_DOC", json!({}))).await.unwrap();

        store.claim_batch("worker-a", 1).await.unwrap();
        store.mark_processing(task.id).await.unwrap();
        let failed = store.mark_failed(task.id, "boom").await.unwrap();

        assert!(failed.retries_exhausted());
        assert!(failed.next_attempt_at.is_none());
        assert_eq!(failed.last_error.as_deref(), Some("boom"));
        assert!(store.claim_batch("worker-a", 10).await.unwrap().is_empty());
        assert!(store.cancel(task.id).await.unwrap_err().is_invalid_transition());
    }

    #[tokio::test]
    async fn test_out_of_order_transition_is_rejected() {
        let store = store_with_type(3, 0).await;
        let task = store.enqueue(NewTask::new("EMIT_DOC", json!({}))).await.unwrap();

        let err = store.mark_completed(task.id).await.unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(store.find(task.id).await.unwrap().unwrap().status, TaskStatus::Pending);

        let missing = Uuid::new_v4();
        assert_eq!(
            store.mark_processing(missing).await.unwrap_err(),
            TaskQueueError::TaskNotFound(missing)
        );
    }
}
