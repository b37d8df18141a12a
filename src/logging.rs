//! # Logging
//!
//! Installs the process-wide tracing subscriber used by the worker loop, the
//! stores and the admin binary. The filter comes from `RUST_LOG` when set and
//! otherwise from the deployment environment. Output is human readable unless
//! `TASK_QUEUE_LOG_FORMAT=json`.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::config::ConfigManager;

static SUBSCRIBER_INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("TASK_QUEUE_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Default filter directive when `RUST_LOG` is absent
fn default_directive(environment: &str) -> &'static str {
    match environment {
        "production" | "staging" => "info",
        _ => "debug",
    }
}

/// Install the global subscriber once per process.
///
/// Later calls are no-ops, and a subscriber already installed by a host
/// application or test harness is left in place.
pub fn init_structured_logging() {
    SUBSCRIBER_INSTALLED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let format = LogFormat::from_env();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(&environment)));

        let layer = match format {
            LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
            LogFormat::Pretty => fmt::layer().with_target(true).with_thread_ids(true).boxed(),
        };

        let installed = tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init()
            .is_ok();

        tracing::info!(
            environment = %environment,
            format = ?format,
            installed,
            "Logging ready"
        );
    });
}

/// Uniform event for producer and worker side task operations
pub fn log_task_operation(
    operation: &str,
    task_id: Uuid,
    task_type: &str,
    status: &str,
    error: Option<&str>,
) {
    tracing::info!(
        operation,
        task_id = %task_id,
        task_type,
        status,
        error,
        "task operation"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive("production"), "info");
        assert_eq!(default_directive("staging"), "info");
        assert_eq!(default_directive("test"), "debug");
        assert_eq!(default_directive("development"), "debug");
    }

    #[test]
    fn test_repeated_init() {
        init_structured_logging();
        init_structured_logging();
    }
}
