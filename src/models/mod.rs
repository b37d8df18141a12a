//! Data model for queued work: tasks, task types, dependency edges, log
//! entries and queue metrics.

pub mod pagination;
pub mod queue_metrics;
pub mod task;
pub mod task_dependency;
pub mod task_log_entry;
pub mod task_type;

pub use pagination::{Page, PageMeta, PageRequest, TaskFilter};
pub use queue_metrics::QueueMetrics;
pub use task::{NewTask, Task};
pub use task_dependency::TaskDependency;
pub use task_log_entry::{LogLevel, NewTaskLogEntry, TaskLogEntry};
pub use task_type::{NewTaskType, TaskType};
