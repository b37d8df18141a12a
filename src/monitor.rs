//! # Queue Monitor
//!
//! Periodically samples [`QueueMetrics`] and raises alerts when the backlog,
//! the failed count or the failure rate cross the thresholds in
//! [`MonitorConfig`]. Alerts are emitted as `warn!` events and returned to the
//! caller of [`QueueMonitor::check`].

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::models::QueueMetrics;
use crate::store::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighPendingTasks,
    HighFailedTasks,
    HighFailureRate,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighPendingTasks => "high_pending_tasks",
            Self::HighFailedTasks => "high_failed_tasks",
            Self::HighFailureRate => "high_failure_rate",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A threshold exceeded by the current metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueAlert {
    pub kind: AlertKind,
    pub current: f64,
    pub threshold: f64,
}

/// Compare `metrics` against the configured thresholds.
///
/// Every threshold is exclusive: a value equal to its threshold does not alert.
pub fn evaluate(metrics: &QueueMetrics, thresholds: &MonitorConfig) -> Vec<QueueAlert> {
    let checks = [
        (
            AlertKind::HighPendingTasks,
            metrics.pending_tasks as f64,
            thresholds.pending_tasks as f64,
        ),
        (
            AlertKind::HighFailedTasks,
            metrics.failed_tasks as f64,
            thresholds.failed_tasks as f64,
        ),
        (
            AlertKind::HighFailureRate,
            metrics.failure_rate,
            thresholds.failure_rate,
        ),
    ];

    checks
        .into_iter()
        .filter(|(_, current, threshold)| current > threshold)
        .map(|(kind, current, threshold)| QueueAlert {
            kind,
            current,
            threshold,
        })
        .collect()
}

/// Result of one monitoring pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    pub metrics: QueueMetrics,
    pub alerts: Vec<QueueAlert>,
}

#[derive(Clone)]
pub struct QueueMonitor {
    store: Arc<dyn TaskStore>,
    config: MonitorConfig,
}

impl QueueMonitor {
    pub fn new(store: Arc<dyn TaskStore>, config: MonitorConfig) -> Self {
        Self { store, config }
    }

    /// Sample metrics once and log any alert at warn level
    pub async fn check(&self) -> Result<MonitorReport> {
        let metrics = self.store.metrics().await?;
        let alerts = evaluate(&metrics, &self.config);

        for alert in &alerts {
            warn!(
                alert = %alert.kind,
                current = alert.current,
                threshold = alert.threshold,
                "Task queue alert"
            );
        }
        debug!(
            pending = metrics.pending_tasks,
            failed = metrics.failed_tasks,
            total = metrics.total_tasks,
            failure_rate = metrics.failure_rate,
            "Queue metrics checked"
        );

        Ok(MonitorReport { metrics, alerts })
    }

    /// Run [`check`](Self::check) every `check_interval` on its own tokio task.
    ///
    /// A failed check is logged and retried on the next tick.
    pub fn start(self) -> MonitorHandle {
        let shutdown = Arc::new(Notify::new());
        let stop = shutdown.clone();
        let interval = self.config.check_interval();

        info!(
            check_interval_seconds = self.config.check_interval_seconds,
            pending_tasks = self.config.pending_tasks,
            failed_tasks = self.config.failed_tasks,
            failure_rate = self.config.failure_rate,
            "Queue monitor started"
        );

        let join = tokio::spawn(async move {
            loop {
                if let Err(e) = self.check().await {
                    error!(error = %e, "Queue metrics check failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {},
                    _ = stop.notified() => break,
                }
            }
            info!("Queue monitor stopped");
        });

        MonitorHandle { shutdown, join }
    }
}

/// Handle to a monitor loop started with [`QueueMonitor::start`]
pub struct MonitorHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            error!(error = %e, "Queue monitor task failed");
        }
    }
}
