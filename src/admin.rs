//! Administrative read side: filtered listings, task detail with history,
//! cancellation and queue metrics.

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, TaskQueueError};
use crate::models::{
    Page, PageRequest, QueueMetrics, Task, TaskDependency, TaskFilter, TaskLogEntry, TaskType,
};
use crate::queue::TaskQueue;

/// A task with its prerequisites and its execution history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDetail {
    pub task: Task,
    pub dependencies: Vec<TaskDependency>,
    pub log: Vec<TaskLogEntry>,
}

#[derive(Clone)]
pub struct TaskAdmin {
    queue: TaskQueue,
}

impl TaskAdmin {
    pub fn new(queue: TaskQueue) -> Self {
        Self { queue }
    }

    pub async fn list_tasks(&self, filter: &TaskFilter, page: PageRequest) -> Result<Page<Task>> {
        self.queue.store().list(filter, page).await
    }

    pub async fn task_detail(&self, task_id: Uuid) -> Result<TaskDetail> {
        let store = self.queue.store();
        let task = store
            .find(task_id)
            .await?
            .ok_or(TaskQueueError::TaskNotFound(task_id))?;
        let dependencies = store.dependencies_of(task_id).await?;
        let log = store.log_entries(task_id).await?;

        Ok(TaskDetail {
            task,
            dependencies,
            log,
        })
    }

    pub async fn cancel(&self, task_id: Uuid) -> Result<Task> {
        self.queue.cancel(task_id).await
    }

    pub async fn list_task_types(&self) -> Result<Vec<TaskType>> {
        self.queue.task_types().list().await
    }

    pub async fn metrics(&self) -> Result<QueueMetrics> {
        self.queue.store().metrics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::models::NewTask;
    use crate::state_machine::TaskStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_detail_and_listing() {
        let queue = TaskQueue::in_memory(BackoffPolicy::default());
        queue.task_types().register("EMIT_DOC", 3, 60).await.unwrap();
        let chain = queue
            .create_chain(vec![
                NewTask::new("EMIT_DOC", json!({"id": 1})),
                NewTask::new("EMIT_DOC", json!({"id": 2})),
                NewTask::new("EMIT_DOC", json!({"id": 3})),
            ])
            .await
            .unwrap();

        let admin = queue.admin();
        let detail = admin.task_detail(chain[1].id).await.unwrap();
        assert_eq!(detail.dependencies.len(), 1);
        assert_eq!(detail.dependencies[0].depends_on_task_id, chain[0].id);
        assert!(detail.log.is_empty());

        admin.cancel(chain[2].id).await.unwrap();
        let cancelled = admin
            .list_tasks(
                &TaskFilter::default().with_status(TaskStatus::Cancelled),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(cancelled.meta.total, 1);
        assert_eq!(cancelled.data[0].id, chain[2].id);

        let page = admin
            .list_tasks(&TaskFilter::default(), PageRequest::new(2, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.meta.last_page, 2);
        assert_eq!((page.meta.from, page.meta.to), (3, 3));

        assert_eq!(admin.list_task_types().await.unwrap().len(), 1);

        let metrics = admin.metrics().await.unwrap();
        assert_eq!(metrics.pending_tasks, 2);
        assert_eq!(metrics.cancelled_tasks, 1);
        assert_eq!(metrics.total_tasks, 3);
        assert_eq!(metrics.failure_rate, 0.0);
    }

    #[tokio::test]
    async fn test_detail_for_missing_task() {
        let admin = TaskQueue::in_memory(BackoffPolicy::default()).admin();
        let id = Uuid::new_v4();
        assert_eq!(
            admin.task_detail(id).await.unwrap_err(),
            TaskQueueError::TaskNotFound(id)
        );
    }
}
