use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its schedule time and dependencies
    Pending,
    /// Taken by a worker, not yet started
    Claimed,
    /// Handler is running
    Processing,
    /// Handler finished successfully
    Completed,
    /// Handler failed; retryable until the type's attempt ceiling is reached
    Failed,
    /// Cancelled by an operator or producer
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        Self::Pending,
        Self::Claimed,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Terminal regardless of attempt bookkeeping.
    ///
    /// `Failed` is only terminal once retries are exhausted, which depends on the
    /// task row; see [`crate::models::Task::is_terminal`].
    pub fn is_always_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Held by a worker
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Claimed | Self::Processing)
    }

    /// Only a completed task releases the tasks that depend on it
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_check() {
        assert!(TaskStatus::Completed.is_always_terminal());
        assert!(TaskStatus::Cancelled.is_always_terminal());
        assert!(!TaskStatus::Failed.is_always_terminal());
        assert!(!TaskStatus::Pending.is_always_terminal());
        assert!(!TaskStatus::Claimed.is_always_terminal());
        assert!(!TaskStatus::Processing.is_always_terminal());
    }

    #[test]
    fn test_dependency_satisfaction() {
        assert!(TaskStatus::Completed.satisfies_dependencies());
        for status in [
            TaskStatus::Pending,
            TaskStatus::Claimed,
            TaskStatus::Processing,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert!(!status.satisfies_dependencies(), "{status} should not satisfy");
        }
    }

    #[test]
    fn test_status_string_conversion() {
        for status in TaskStatus::ALL {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("complete".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let parsed: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TaskStatus::Processing);
    }
}
