use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Edge in the task dependency DAG: `task_id` waits for `depends_on_task_id`.
///
/// Maps to the `task_dependencies` table, unique on the pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub task_id: Uuid,
    pub depends_on_task_id: Uuid,
    pub created_at: DateTime<Utc>,
}
