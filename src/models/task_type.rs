use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{Result, TaskQueueError};

/// Retry policy for one kind of task, keyed by name.
///
/// Maps to the `task_types` table. Rows are administered out of band (seeded
/// from configuration at startup) and read-only to the worker path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TaskType {
    pub name: String,
    pub max_attempts: i32,
    pub retry_backoff_seconds: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New TaskType for registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTaskType {
    pub name: String,
    pub max_attempts: i32,
    pub retry_backoff_seconds: i64,
    pub description: Option<String>,
}

impl NewTaskType {
    pub fn new(name: impl Into<String>, max_attempts: i32, retry_backoff_seconds: i64) -> Self {
        Self {
            name: name.into(),
            max_attempts,
            retry_backoff_seconds,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TaskQueueError::ValidationError(
                "Task type name cannot be empty".to_string(),
            ));
        }
        if self.max_attempts < 1 {
            return Err(TaskQueueError::ValidationError(format!(
                "Task type {} must allow at least one attempt (got {})",
                self.name, self.max_attempts
            )));
        }
        if self.retry_backoff_seconds < 0 {
            return Err(TaskQueueError::ValidationError(format!(
                "Task type {} has a negative retry backoff",
                self.name
            )));
        }
        Ok(())
    }

    pub fn into_task_type(self, created_at: DateTime<Utc>) -> TaskType {
        TaskType {
            name: self.name,
            max_attempts: self.max_attempts,
            retry_backoff_seconds: self.retry_backoff_seconds,
            description: self.description,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_validation() {
        assert!(NewTaskType::new("EMIT_BOLETO", 3, 60).validate().is_ok());
        assert!(NewTaskType::new("EMIT_BOLETO", 0, 60).validate().is_err());
        assert!(NewTaskType::new("EMIT_BOLETO", 3, -1).validate().is_err());
        assert!(NewTaskType::new("", 3, 60).validate().is_err());
    }
}
