//! # Registries
//!
//! - [`TaskTypeRegistry`]: retry policy per task type, persisted and cached
//! - [`ProcessorRegistry`]: handler dispatch by task type, in process
//!
//! ```text
//! Registry Infrastructure
//! ├── TaskTypeRegistry   (max_attempts, retry_backoff_seconds)
//! └── ProcessorRegistry  (task_type -> Arc<dyn TaskProcessor>)
//! ```

pub mod processor_registry;
pub mod task_type_registry;

pub use processor_registry::{FnProcessor, ProcessorRegistry, TaskProcessor};
pub use task_type_registry::TaskTypeRegistry;
