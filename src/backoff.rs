//! # Retry Backoff
//!
//! Delay imposed before a failed task becomes claimable again. The base delay
//! comes from the task type (`retry_backoff_seconds`); the strategy and the
//! ceiling come from configuration.
//!
//! - `linear`: `base * attempts`
//! - `exponential`: `base * 2^(attempts - 1)`

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::models::TaskType;

/// Upper bound for any retry delay, whatever the configured ceiling (one year)
pub const MAX_BACKOFF_SECONDS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Linear,
    Exponential,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Linear
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    pub max_delay_seconds: i64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Linear,
            max_delay_seconds: 3600,
        }
    }
}

impl BackoffPolicy {
    pub fn new(strategy: BackoffStrategy, max_delay_seconds: i64) -> Self {
        Self {
            strategy,
            max_delay_seconds,
        }
    }

    /// Delay in whole seconds after the `attempts`-th failed attempt
    pub fn delay_seconds(&self, base_seconds: i64, attempts: i32) -> i64 {
        let base = base_seconds.max(0);
        let attempts = i64::from(attempts.max(1));

        let raw = match self.strategy {
            BackoffStrategy::Linear => base.saturating_mul(attempts),
            BackoffStrategy::Exponential => {
                let exponent = u32::try_from(attempts - 1).unwrap_or(u32::MAX).min(62);
                base.saturating_mul(1_i64 << exponent)
            }
        };

        raw.min(self.max_delay_seconds.clamp(0, MAX_BACKOFF_SECONDS))
    }

    pub fn delay_for(&self, task_type: &TaskType, attempts: i32) -> Duration {
        let seconds = self.delay_seconds(task_type.retry_backoff_seconds, attempts);
        Duration::try_seconds(seconds).unwrap_or_else(|| Duration::seconds(MAX_BACKOFF_SECONDS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_seconds(1, 1), 1);
        assert_eq!(policy.delay_seconds(30, 2), 60);
        assert_eq!(policy.delay_seconds(30, 3), 90);
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = BackoffPolicy::new(BackoffStrategy::Exponential, 3600);
        assert_eq!(policy.delay_seconds(10, 1), 10);
        assert_eq!(policy.delay_seconds(10, 2), 20);
        assert_eq!(policy.delay_seconds(10, 4), 80);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = BackoffPolicy::new(BackoffStrategy::Exponential, 120);
        assert_eq!(policy.delay_seconds(60, 10), 120);
        assert_eq!(policy.delay_seconds(60, i32::MAX), 120);

        let linear = BackoffPolicy::new(BackoffStrategy::Linear, 100);
        assert_eq!(linear.delay_seconds(i64::MAX, 3), 100);
    }

    #[test]
    fn test_unbounded_ceiling_is_clamped() {
        let policy = BackoffPolicy::new(BackoffStrategy::Linear, i64::MAX);
        assert_eq!(policy.delay_seconds(10_000_000_000_000_000, 1), MAX_BACKOFF_SECONDS);

        let task_type = crate::models::NewTaskType::new("EMIT_DOC", 3, i64::MAX)
            .into_task_type(chrono::Utc::now());
        assert_eq!(
            policy.delay_for(&task_type, 2),
            Duration::seconds(MAX_BACKOFF_SECONDS)
        );
    }

    #[test]
    fn test_zero_base_means_immediate_retry() {
        assert_eq!(BackoffPolicy::default().delay_seconds(0, 5), 0);
    }
}
