//! # Processor Registry
//!
//! Maps a task type to the handler that performs its side effect. Dispatch is
//! a lookup by type name, so adding a task type means registering one more
//! processor.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, TaskQueueError};
use crate::models::Task;

/// Handler for one task type.
///
/// Receives the task with its payload verbatim. Returning an error (or
/// panicking) marks the attempt as failed; the message becomes `last_error`.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, task: &Task) -> anyhow::Result<()>;
}

/// Adapter turning a closure into a [`TaskProcessor`]
pub struct FnProcessor<F> {
    func: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(Task) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> TaskProcessor for FnProcessor<F>
where
    F: Fn(Task) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    async fn process(&self, task: &Task) -> anyhow::Result<()> {
        (self.func)(task.clone()).await
    }
}

#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: Arc<DashMap<String, Arc<dyn TaskProcessor>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `processor` for `task_type`, replacing any previous handler
    pub fn register(&self, task_type: impl Into<String>, processor: Arc<dyn TaskProcessor>) {
        let task_type = task_type.into();
        if self
            .processors
            .insert(task_type.clone(), processor)
            .is_some()
        {
            warn!(task_type = %task_type, "Replaced existing processor registration");
        } else {
            info!(task_type = %task_type, "Processor registered");
        }
    }

    /// Register a closure returning a boxed future
    pub fn register_fn<F>(&self, task_type: impl Into<String>, func: F)
    where
        F: Fn(Task) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.register(task_type, Arc::new(FnProcessor::new(func)));
    }

    pub fn resolve(&self, task_type: &str) -> Result<Arc<dyn TaskProcessor>> {
        self.processors
            .get(task_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TaskQueueError::ProcessorNotFound(task_type.to_string()))
    }

    pub fn unregister(&self, task_type: &str) -> bool {
        self.processors.remove(task_type).is_some()
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .processors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use chrono::Utc;
    use futures::FutureExt;
    use serde_json::json;

    struct Rejecting;

    #[async_trait]
    impl TaskProcessor for Rejecting {
        async fn process(&self, task: &Task) -> anyhow::Result<()> {
            anyhow::bail!("rejected {}", task.task_type)
        }
    }

    fn task(task_type: &str) -> Task {
        Task::from_new(NewTask::new(task_type, json!({"id": 42})), Utc::now())
    }

    #[tokio::test]
    async fn test_resolve_dispatches_by_type() {
        let registry = ProcessorRegistry::new();
        registry.register_fn("EMIT_DOC", |task: Task| {
            async move {
                anyhow::ensure!(task.payload["id"] == 42, "unexpected payload");
                Ok(())
            }
            .boxed()
        });
        registry.register("CANCEL_DOC", Arc::new(Rejecting));

        assert!(registry
            .resolve("EMIT_DOC")
            .unwrap()
            .process(&task("EMIT_DOC"))
            .await
            .is_ok());

        let err = registry
            .resolve("CANCEL_DOC")
            .unwrap()
            .process(&task("CANCEL_DOC"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "rejected CANCEL_DOC");
        assert_eq!(registry.registered_types(), vec!["CANCEL_DOC", "EMIT_DOC"]);
    }

    #[test]
    fn test_missing_processor() {
        let registry = ProcessorRegistry::new();
        let err = registry.resolve("EMIT_DOC").err().unwrap();
        assert_eq!(err, TaskQueueError::ProcessorNotFound("EMIT_DOC".to_string()));
    }

    #[test]
    fn test_replace_and_unregister() {
        let registry = ProcessorRegistry::new();
        registry.register("EMIT_DOC", Arc::new(Rejecting));
        registry.register("EMIT_DOC", Arc::new(Rejecting));
        assert_eq!(registry.registered_types().len(), 1);
        assert!(registry.unregister("EMIT_DOC"));
        assert!(!registry.unregister("EMIT_DOC"));
    }
}
