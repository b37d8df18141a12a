#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Task Queue
//!
//! Durable, database-backed task queue with a worker pool.
//!
//! ## Overview
//!
//! Producers (payment slips, invoices, document emission, ...) enqueue typed
//! tasks with a JSON payload. Workers atomically claim ready tasks, dispatch
//! them to the processor registered for their type, and record the outcome.
//! Failed tasks are retried with a per-type backoff up to a per-type attempt
//! ceiling. Tasks can be chained so that each one only becomes claimable once
//! its predecessor has completed.
//!
//! ## Module Organization
//!
//! - [`store`] - task persistence, atomic claim, status transitions
//! - [`registry`] - task type policies and processor dispatch
//! - [`dependency`] - dependency chains and cycle detection
//! - [`worker`] - the claim / execute / record loop
//! - [`task_log`] - append-only execution history
//! - [`state_machine`] - task statuses and allowed transitions
//! - [`queue`] - wiring for producers, workers and the admin surface
//! - [`admin`] - listings, task detail, cancellation, queue metrics
//! - [`monitor`] - periodic threshold alerts over queue metrics
//! - [`config`] - layered YAML and environment configuration
//! - [`database`] - connection pool and migrations
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use task_queue::config::ConfigManager;
//! use task_queue::queue::TaskQueue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! task_queue::logging::init_structured_logging();
//! let manager = ConfigManager::load()?;
//! let queue = TaskQueue::connect(manager.config()).await?;
//! let handle = queue.start_worker(manager.config().worker.clone()).await?;
//! // ...
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit tests live next to the code. Integration tests in `tests/` run against
//! the in-memory store; PostgreSQL tests use `#[sqlx::test]` and are ignored
//! unless run with `--ignored` and a `DATABASE_URL`.

pub mod admin;
pub mod backoff;
pub mod config;
pub mod database;
pub mod dependency;
pub mod error;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod queue;
pub mod registry;
pub mod state_machine;
pub mod store;
pub mod task_log;
pub mod worker;

pub use admin::{TaskAdmin, TaskDetail};
pub use backoff::{BackoffPolicy, BackoffStrategy};
pub use config::{ConfigManager, TaskQueueConfig};
pub use error::{Result, TaskQueueError};
pub use models::{
    NewTask, NewTaskType, Page, PageRequest, QueueMetrics, Task, TaskFilter, TaskType,
};
pub use monitor::{QueueAlert, QueueMonitor};
pub use queue::TaskQueue;
pub use registry::{ProcessorRegistry, TaskProcessor, TaskTypeRegistry};
pub use state_machine::{TaskEvent, TaskStatus};
pub use store::{InMemoryTaskStore, PgTaskStore, TaskStore};
pub use worker::{BatchOutcome, TaskWorker, WorkerHandle};
