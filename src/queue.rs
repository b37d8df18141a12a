//! # Task Queue
//!
//! Entry point wiring the store, the registries and the dependency graph
//! together. Producers enqueue through it, workers are built from it, and the
//! admin surface reads through it. Everything is passed explicitly; there is
//! no process-wide singleton.
//!
//! ```rust,no_run
//! use futures::FutureExt;
//! use serde_json::json;
//! use task_queue::config::WorkerConfig;
//! use task_queue::models::NewTask;
//! use task_queue::queue::TaskQueue;
//!
//! # async fn example() -> task_queue::error::Result<()> {
//! let queue = TaskQueue::in_memory(Default::default());
//! queue.task_types().register("EMIT_DOC", 3, 60).await?;
//! queue.processors().register_fn("EMIT_DOC", |task| {
//!     async move {
//!         println!("emitting document {}", task.payload["id"]);
//!         Ok(())
//!     }
//!     .boxed()
//! });
//!
//! queue.enqueue(NewTask::new("EMIT_DOC", json!({ "id": 42 }))).await?;
//! let outcome = queue.worker(WorkerConfig::default()).run_once().await?;
//! assert_eq!(outcome.completed, 1);
//! # Ok(())
//! # }
//! ```

use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::admin::TaskAdmin;
use crate::backoff::BackoffPolicy;
use crate::config::{MonitorConfig, TaskQueueConfig, WorkerConfig};
use crate::database::DatabaseConnection;
use crate::dependency::DependencyGraph;
use crate::error::Result;
use crate::logging::log_task_operation;
use crate::models::{NewTask, Task};
use crate::monitor::QueueMonitor;
use crate::registry::{ProcessorRegistry, TaskTypeRegistry};
use crate::store::{spawn_enqueue_listener, InMemoryTaskStore, PgTaskStore, TaskStore};
use crate::worker::{TaskWorker, WorkerHandle};

#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    task_types: TaskTypeRegistry,
    processors: ProcessorRegistry,
    dependencies: DependencyGraph,
    wake: Arc<Notify>,
    pool: Option<PgPool>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            task_types: TaskTypeRegistry::new(store.clone()),
            processors: ProcessorRegistry::new(),
            dependencies: DependencyGraph::new(store.clone()),
            wake: Arc::new(Notify::new()),
            pool: None,
            store,
        }
    }

    /// Queue backed by [`InMemoryTaskStore`]
    pub fn in_memory(backoff: BackoffPolicy) -> Self {
        Self::new(Arc::new(InMemoryTaskStore::new(backoff)))
    }

    /// Queue backed by an existing PostgreSQL pool
    pub fn postgres(pool: PgPool, backoff: BackoffPolicy) -> Self {
        let mut queue = Self::new(Arc::new(PgTaskStore::new(pool.clone(), backoff)));
        queue.pool = Some(pool);
        queue
    }

    /// Connect to PostgreSQL, apply migrations when enabled and seed the
    /// configured task types
    #[instrument(skip(config))]
    pub async fn connect(config: &TaskQueueConfig) -> Result<Self> {
        config.validate()?;
        let connection = DatabaseConnection::connect(&config.database).await?;
        let queue = Self::postgres(connection.pool().clone(), config.backoff.policy());

        if !config.task_types.is_empty() {
            queue.task_types.seed(&config.task_types).await?;
        }
        queue.task_types.load().await?;

        info!(
            task_types = queue.task_types.cached_names().len(),
            "Task queue connected"
        );
        Ok(queue)
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn task_types(&self) -> &TaskTypeRegistry {
        &self.task_types
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        &self.dependencies
    }

    pub fn pool(&self) -> Option<&PgPool> {
        self.pool.as_ref()
    }

    /// Enqueue a task for asynchronous processing.
    ///
    /// Returns as soon as the task is persisted; processing outcomes are
    /// observed by polling the task status.
    pub async fn enqueue(&self, new_task: NewTask) -> Result<Task> {
        let task = self.store.enqueue(new_task).await?;
        log_task_operation("enqueue", task.id, &task.task_type, task.status.as_str(), None);
        self.wake.notify_one();
        Ok(task)
    }

    /// Create a dependency chain, each task waiting for the previous one
    pub async fn create_chain(&self, specs: Vec<NewTask>) -> Result<Vec<Task>> {
        let tasks = self.dependencies.create_chain(specs).await?;
        if !tasks.is_empty() {
            self.wake.notify_one();
        }
        Ok(tasks)
    }

    pub async fn cancel(&self, task_id: Uuid) -> Result<Task> {
        let task = self.store.cancel(task_id).await?;
        log_task_operation("cancel", task.id, &task.task_type, task.status.as_str(), None);
        Ok(task)
    }

    pub async fn find(&self, task_id: Uuid) -> Result<Option<Task>> {
        self.store.find(task_id).await
    }

    pub fn worker(&self, config: WorkerConfig) -> TaskWorker {
        TaskWorker::new(
            self.store.clone(),
            self.processors.clone(),
            config,
            self.wake.clone(),
        )
    }

    /// Start a worker loop on its own tokio task.
    ///
    /// With `listen_for_notifications` set and a database behind the queue,
    /// enqueues from other processes wake the loop as well.
    pub async fn start_worker(&self, config: WorkerConfig) -> Result<WorkerHandle> {
        let listener = if config.listen_for_notifications {
            self.listen_for_enqueues().await?
        } else {
            None
        };
        Ok(self.worker(config).start().with_listener(listener))
    }

    pub fn admin(&self) -> TaskAdmin {
        TaskAdmin::new(self.clone())
    }

    pub fn monitor(&self, config: MonitorConfig) -> QueueMonitor {
        QueueMonitor::new(self.store.clone(), config)
    }

    /// Forward cross-process enqueue notifications to local workers.
    ///
    /// Returns `None` for stores without a database connection.
    pub async fn listen_for_enqueues(&self) -> Result<Option<JoinHandle<()>>> {
        match &self.pool {
            Some(pool) => Ok(Some(spawn_enqueue_listener(pool, self.wake.clone()).await?)),
            None => Ok(None),
        }
    }
}
