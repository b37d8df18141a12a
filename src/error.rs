//! Error types for the task queue.

use crate::config::ConfigurationError;
use crate::state_machine::TaskStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskQueueError {
    #[error("Invalid task type: {0}")]
    InvalidTaskType(String),
    #[error("Invalid transition for task {task_id}: cannot apply '{event}' from state {from}")]
    InvalidTransition {
        task_id: Uuid,
        from: TaskStatus,
        event: &'static str,
    },
    #[error("Dependency {task_id} -> {depends_on} would create a cycle")]
    CycleDetected { task_id: Uuid, depends_on: Uuid },
    #[error("Invalid dependency: {0}")]
    InvalidDependency(String),
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("No processor registered for task type {0}")]
    ProcessorNotFound(String),
    #[error("Handler for {task_type} failed: {message}")]
    HandlerError { task_type: String, message: String },
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Timeout error: {0}")]
    Timeout(String),
}

impl TaskQueueError {
    /// Whether the error is a rejected state change rather than an infrastructure failure
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

impl From<sqlx::Error> for TaskQueueError {
    fn from(err: sqlx::Error) -> Self {
        TaskQueueError::DatabaseError(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for TaskQueueError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        TaskQueueError::DatabaseError(format!("Migration failed: {err}"))
    }
}

impl From<serde_json::Error> for TaskQueueError {
    fn from(err: serde_json::Error) -> Self {
        TaskQueueError::SerializationError(err.to_string())
    }
}

impl From<ConfigurationError> for TaskQueueError {
    fn from(err: ConfigurationError) -> Self {
        TaskQueueError::ConfigurationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TaskQueueError>;
