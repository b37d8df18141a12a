//! # Task Type Registry
//!
//! Per-type retry policy (`max_attempts`, `retry_backoff_seconds`) backed by
//! the store and cached in memory. Types are registered by administrators or
//! seeded from configuration at startup; the worker path only reads them.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::TaskTypeConfig;
use crate::error::{Result, TaskQueueError};
use crate::models::{NewTaskType, TaskType};
use crate::store::TaskStore;

#[derive(Clone)]
pub struct TaskTypeRegistry {
    store: Arc<dyn TaskStore>,
    cache: Arc<DashMap<String, TaskType>>,
}

impl TaskTypeRegistry {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Register or update a task type
    pub async fn register(
        &self,
        name: &str,
        max_attempts: i32,
        retry_backoff_seconds: i64,
    ) -> Result<TaskType> {
        self.register_type(NewTaskType::new(name, max_attempts, retry_backoff_seconds))
            .await
    }

    pub async fn register_type(&self, task_type: NewTaskType) -> Result<TaskType> {
        task_type.validate()?;
        let stored = self.store.upsert_task_type(task_type).await?;
        info!(
            task_type = %stored.name,
            max_attempts = stored.max_attempts,
            retry_backoff_seconds = stored.retry_backoff_seconds,
            "Task type registered"
        );
        self.cache.insert(stored.name.clone(), stored.clone());
        Ok(stored)
    }

    /// Look up a type, falling back to the store on a cache miss
    pub async fn get(&self, name: &str) -> Result<TaskType> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(cached.clone());
        }

        let task_type = self
            .store
            .find_task_type(name)
            .await?
            .ok_or_else(|| TaskQueueError::InvalidTaskType(name.to_string()))?;
        self.cache.insert(task_type.name.clone(), task_type.clone());
        Ok(task_type)
    }

    pub async fn list(&self) -> Result<Vec<TaskType>> {
        self.store.list_task_types().await
    }

    /// Replace the cache with the store's current contents
    pub async fn load(&self) -> Result<usize> {
        let task_types = self.store.list_task_types().await?;
        self.cache.clear();
        for task_type in task_types {
            self.cache.insert(task_type.name.clone(), task_type);
        }
        debug!(count = self.cache.len(), "Task type cache refreshed");
        Ok(self.cache.len())
    }

    /// Upsert every configured type
    pub async fn seed(&self, task_types: &[TaskTypeConfig]) -> Result<Vec<TaskType>> {
        let mut seeded = Vec::with_capacity(task_types.len());
        for config in task_types {
            seeded.push(self.register_type(NewTaskType::from(config)).await?);
        }
        info!(
            count = seeded.len(),
            seeded_at = %Utc::now().to_rfc3339(),
            "Task types seeded from configuration"
        );
        Ok(seeded)
    }

    pub fn cached_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
