//! # Task Queue Configuration
//!
//! Configuration is layered by [`ConfigManager`]:
//!
//! 1. `config/task-queue.yaml` (base)
//! 2. `config/task-queue.<environment>.yaml` (optional overlay)
//! 3. `TASK_QUEUE_<SECTION>__<KEY>` environment variables
//! 4. `DATABASE_URL` for the connection string
//!
//! Every section has defaults so partial files are valid.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use task_queue::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let batch_size = manager.config().worker.batch_size;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::backoff::{BackoffPolicy, BackoffStrategy, MAX_BACKOFF_SECONDS};
use crate::models::NewTaskType;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring task-queue.yaml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskQueueConfig {
    /// Database connection and pooling configuration
    pub database: DatabaseConfig,

    /// Worker loop settings
    pub worker: WorkerConfig,

    /// Retry delay policy
    pub backoff: BackoffConfig,

    /// Queue depth and failure alert thresholds
    pub monitor: MonitorConfig,

    /// Task types seeded into the registry at startup
    pub task_types: Vec<TaskTypeConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Apply embedded migrations when connecting
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/task_queue_development".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 10,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Identifier stamped on claimed rows; generated when absent
    pub worker_id: Option<String>,
    /// Maximum tasks claimed per iteration
    pub batch_size: u32,
    /// Maximum handlers running at once
    pub max_concurrency: usize,
    pub poll_interval_ms: u64,
    pub shutdown_timeout_seconds: u64,
    /// Wake up on PostgreSQL NOTIFY in addition to polling
    pub listen_for_notifications: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            batch_size: 10,
            max_concurrency: 4,
            poll_interval_ms: 5000,
            shutdown_timeout_seconds: 30,
            listen_for_notifications: true,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn resolved_worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}-{}", std::process::id(), uuid::Uuid::new_v4()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub strategy: BackoffStrategy,
    pub max_delay_seconds: i64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            strategy: policy.strategy,
            max_delay_seconds: policy.max_delay_seconds,
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.strategy, self.max_delay_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_seconds: u64,
    /// Alert when more tasks than this are pending
    pub pending_tasks: i64,
    /// Alert when more tasks than this have failed
    pub failed_tasks: i64,
    /// Alert when the failed share of all tasks exceeds this (0.0-1.0)
    pub failure_rate: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 60,
            pending_tasks: 100,
            failed_tasks: 50,
            failure_rate: 0.1,
        }
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaskTypeConfig {
    pub name: String,
    pub max_attempts: i32,
    pub retry_backoff_seconds: i64,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<&TaskTypeConfig> for NewTaskType {
    fn from(config: &TaskTypeConfig) -> Self {
        NewTaskType {
            name: config.name.clone(),
            max_attempts: config.max_attempts,
            retry_backoff_seconds: config.retry_backoff_seconds,
            description: config.description.clone(),
        }
    }
}

impl TaskQueueConfig {
    /// Reject values the worker loop or the store cannot operate with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "database.url",
                "",
                "database URL cannot be empty",
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                self.database.max_connections,
                "must be at least 1",
            ));
        }
        if self.worker.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.batch_size",
                self.worker.batch_size,
                "must be at least 1",
            ));
        }
        if self.worker.max_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.max_concurrency",
                self.worker.max_concurrency,
                "must be at least 1",
            ));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.poll_interval_ms",
                self.worker.poll_interval_ms,
                "must be greater than zero",
            ));
        }
        if !(0..=MAX_BACKOFF_SECONDS).contains(&self.backoff.max_delay_seconds) {
            return Err(ConfigurationError::invalid_value(
                "backoff.max_delay_seconds",
                self.backoff.max_delay_seconds,
                format!("must be between 0 and {MAX_BACKOFF_SECONDS}"),
            ));
        }

        if self.monitor.check_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "monitor.check_interval_seconds",
                self.monitor.check_interval_seconds,
                "must be greater than zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.monitor.failure_rate) {
            return Err(ConfigurationError::invalid_value(
                "monitor.failure_rate",
                self.monitor.failure_rate,
                "must be between 0.0 and 1.0",
            ));
        }

        let mut seen = HashSet::new();
        for task_type in &self.task_types {
            NewTaskType::from(task_type).validate().map_err(|e| {
                ConfigurationError::invalid_value("task_types", &task_type.name, e.to_string())
            })?;
            if !seen.insert(task_type.name.as_str()) {
                return Err(ConfigurationError::invalid_value(
                    "task_types",
                    &task_type.name,
                    "task type declared more than once",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TaskQueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.batch_size, 10);
        assert_eq!(config.worker.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.backoff.strategy, BackoffStrategy::Linear);
    }

    #[test]
    fn test_validation_rejects_zero_batch() {
        let mut config = TaskQueueConfig::default();
        config.worker.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bounds_backoff_ceiling() {
        let mut config = TaskQueueConfig::default();
        config.backoff.max_delay_seconds = i64::MAX;
        assert!(config.validate().is_err());

        config.backoff.max_delay_seconds = -1;
        assert!(config.validate().is_err());

        config.backoff.max_delay_seconds = MAX_BACKOFF_SECONDS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_monitor_defaults_and_bounds() {
        let mut config = TaskQueueConfig::default();
        assert_eq!(config.monitor.check_interval(), Duration::from_secs(60));
        assert_eq!(config.monitor.pending_tasks, 100);
        assert_eq!(config.monitor.failed_tasks, 50);

        config.monitor.failure_rate = 1.5;
        assert!(config.validate().is_err());

        config.monitor.failure_rate = 0.1;
        config.monitor.check_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_duplicate_task_types() {
        let mut config = TaskQueueConfig::default();
        let emit = TaskTypeConfig {
            name: "EMIT_BOLETO".to_string(),
            max_attempts: 3,
            retry_backoff_seconds: 60,
            description: None,
        };
        config.task_types = vec![emit.clone(), emit];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_invalid_task_type() {
        let mut config = TaskQueueConfig::default();
        config.task_types = vec![TaskTypeConfig {
            name: "EMIT_BOLETO".to_string(),
            max_attempts: 0,
            retry_backoff_seconds: 60,
            description: None,
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolved_worker_id() {
        let mut worker = WorkerConfig::default();
        assert!(worker.resolved_worker_id().starts_with("worker-"));
        worker.worker_id = Some("billing-1".to_string());
        assert_eq!(worker.resolved_worker_id(), "billing-1");
    }
}
