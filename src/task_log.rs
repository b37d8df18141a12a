//! # Task Log
//!
//! Append-only execution history per task. Writes are best effort: a sink
//! failure is reported through tracing and never rolls back the transition
//! that produced the entry.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{LogLevel, NewTaskLogEntry, TaskLogEntry};

/// Persistence backend for log entries
#[async_trait]
pub trait TaskLogSink: Send + Sync {
    async fn write(&self, entry: NewTaskLogEntry) -> Result<()>;

    /// Entries for a task, oldest first
    async fn entries_for(&self, task_id: Uuid) -> Result<Vec<TaskLogEntry>>;
}

#[derive(Clone)]
pub struct TaskLog {
    sink: Arc<dyn TaskLogSink>,
}

impl std::fmt::Debug for TaskLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLog").finish_non_exhaustive()
    }
}

impl TaskLog {
    pub fn new(sink: Arc<dyn TaskLogSink>) -> Self {
        Self { sink }
    }

    /// Record an entry; failures are logged and swallowed
    pub async fn append(&self, task_id: Uuid, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let entry = NewTaskLogEntry {
            task_id,
            level,
            message: message.clone(),
        };

        if let Err(e) = self.sink.write(entry).await {
            error!(
                task_id = %task_id,
                level = %level,
                log_message = %message,
                error = %e,
                "Failed to append task log entry"
            );
        }
    }

    pub async fn info(&self, task_id: Uuid, message: impl Into<String>) {
        self.append(task_id, LogLevel::Info, message).await;
    }

    pub async fn error(&self, task_id: Uuid, message: impl Into<String>) {
        self.append(task_id, LogLevel::Error, message).await;
    }

    pub async fn entries(&self, task_id: Uuid) -> Result<Vec<TaskLogEntry>> {
        self.sink.entries_for(task_id).await
    }
}
