//! # Task Model
//!
//! A unit of deferred work: a task type, an opaque JSON payload handed verbatim
//! to the processor, and the lifecycle bookkeeping the worker loop maintains.
//!
//! ## Database Schema
//!
//! Maps to the `tasks` table:
//! - `id`: UUID primary key assigned at creation
//! - `task_type`: references `task_types.name`
//! - `payload`: JSONB object
//! - `status`: text, one of the [`TaskStatus`] values
//! - `priority`: 0 (default) to 10; higher priorities are claimed first
//! - `attempts`, `scheduled_for`, `next_attempt_at`, `last_error`
//! - `claimed_by`, `created_at`, `updated_at`, `completed_at`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use uuid::Uuid;

use crate::error::{Result, TaskQueueError};
use crate::state_machine::TaskStatus;

pub const MIN_PRIORITY: i32 = 0;
pub const MAX_PRIORITY: i32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub resource_id: Option<String>,
    pub priority: i32,
    pub status: TaskStatus,
    pub attempts: i32,
    pub scheduled_for: DateTime<Utc>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// New Task for creation (without generated fields)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: String,
    pub payload: serde_json::Value,
    pub resource_id: Option<String>,
    #[serde(default)]
    pub priority: i32,
    /// Defaults to the enqueue time when absent
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            resource_id: None,
            priority: MIN_PRIORITY,
            scheduled_for: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    /// Normalize and check the payload shape.
    ///
    /// `null` becomes an empty object; anything other than an object is rejected.
    pub fn validate(mut self) -> Result<Self> {
        if self.task_type.trim().is_empty() {
            return Err(TaskQueueError::InvalidTaskType(
                "task type cannot be empty".to_string(),
            ));
        }

        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(TaskQueueError::ValidationError(format!(
                "priority for {} must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {}",
                self.task_type, self.priority
            )));
        }

        match self.payload {
            serde_json::Value::Null => {
                self.payload = serde_json::Value::Object(serde_json::Map::new());
            }
            serde_json::Value::Object(_) => {}
            _ => {
                return Err(TaskQueueError::ValidationError(format!(
                    "payload for {} must be a JSON object",
                    self.task_type
                )))
            }
        }

        Ok(self)
    }
}

impl Task {
    /// Build a pending task from its creation request
    pub fn from_new(new_task: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: new_task.task_type,
            payload: new_task.payload,
            resource_id: new_task.resource_id,
            priority: new_task.priority,
            status: TaskStatus::Pending,
            attempts: 0,
            scheduled_for: new_task.scheduled_for.unwrap_or(now),
            next_attempt_at: None,
            last_error: None,
            claimed_by: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// A failed task stamped with `completed_at` has used all of its attempts
    pub fn retries_exhausted(&self) -> bool {
        self.status == TaskStatus::Failed && self.completed_at.is_some()
    }

    /// No further transition is possible
    pub fn is_terminal(&self) -> bool {
        self.status.is_always_terminal() || self.retries_exhausted()
    }

    /// Whether the row is ready to be claimed at `now`, ignoring dependencies
    pub fn is_due(&self, now: DateTime<Utc>, max_attempts: i32) -> bool {
        match self.status {
            TaskStatus::Pending => self.scheduled_for <= now,
            TaskStatus::Failed => {
                self.attempts < max_attempts
                    && self.next_attempt_at.is_some_and(|at| at <= now)
            }
            _ => false,
        }
    }

    /// Time from which the task is claimable, used for claim ordering
    pub fn ready_at(&self) -> DateTime<Utc> {
        self.next_attempt_at.unwrap_or(self.scheduled_for)
    }

    /// Claim ordering: higher priority first, then earliest ready, then oldest
    pub fn claim_key(&self) -> (Reverse<i32>, DateTime<Utc>, DateTime<Utc>) {
        (Reverse(self.priority), self.ready_at(), self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_new_task_defaults() {
        let now = Utc::now();
        let task = Task::from_new(NewTask::new("EMIT_DOC", json!({"id": 42})), now);

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.scheduled_for, now);
        assert!(task.next_attempt_at.is_none());
        assert!(task.completed_at.is_none());
        assert!(!task.is_terminal());
    }

    #[test]
    fn test_payload_validation() {
        let normalized = NewTask::new("EMIT_DOC", serde_json::Value::Null)
            .validate()
            .unwrap();
        assert_eq!(normalized.payload, json!({}));

        assert!(NewTask::new("EMIT_DOC", json!([1, 2])).validate().is_err());
        assert!(NewTask::new("  ", json!({})).validate().is_err());
    }

    #[test]
    fn test_priority_bounds() {
        assert_eq!(NewTask::new("EMIT_DOC", json!({})).priority, MIN_PRIORITY);
        assert!(NewTask::new("EMIT_DOC", json!({})).with_priority(MAX_PRIORITY).validate().is_ok());
        assert!(NewTask::new("EMIT_DOC", json!({})).with_priority(11).validate().is_err());
        assert!(NewTask::new("EMIT_DOC", json!({})).with_priority(-1).validate().is_err());

        let parsed: NewTask =
            serde_json::from_value(json!({"task_type": "EMIT_DOC", "payload": {}})).unwrap();
        assert_eq!(parsed.priority, MIN_PRIORITY);
    }

    #[test]
    fn test_claim_key_prefers_priority() {
        let now = Utc::now();
        let urgent = Task::from_new(
            NewTask::new("EMIT_DOC", json!({}))
                .with_priority(5)
                .scheduled_for(now),
            now,
        );
        let older = Task::from_new(
            NewTask::new("EMIT_DOC", json!({})).scheduled_for(now - Duration::hours(1)),
            now,
        );
        assert!(urgent.claim_key() < older.claim_key());
    }

    #[test]
    fn test_due_rules() {
        let now = Utc::now();
        let later = now + Duration::seconds(30);

        let scheduled =
            Task::from_new(NewTask::new("EMIT_DOC", json!({})).scheduled_for(later), now);
        assert!(!scheduled.is_due(now, 3));
        assert!(scheduled.is_due(later, 3));

        let mut failed = Task::from_new(NewTask::new("EMIT_DOC", json!({})), now);
        failed.status = TaskStatus::Failed;
        failed.attempts = 1;
        failed.next_attempt_at = Some(now);
        assert!(failed.is_due(now, 3));
        assert!(!failed.is_due(now, 1));

        failed.next_attempt_at = None;
        assert!(!failed.is_due(now, 3));
    }
}
