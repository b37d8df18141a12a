//! Point-in-time task counts per status.

use serde::Serialize;

use crate::state_machine::TaskStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QueueMetrics {
    pub pending_tasks: i64,
    pub claimed_tasks: i64,
    pub processing_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub cancelled_tasks: i64,
    pub total_tasks: i64,
    /// `failed_tasks / total_tasks`, zero for an empty queue
    pub failure_rate: f64,
}

impl QueueMetrics {
    /// Build from `(status, count)` pairs; repeated statuses accumulate
    pub fn from_counts(counts: impl IntoIterator<Item = (TaskStatus, i64)>) -> Self {
        let mut metrics = Self::default();
        for (status, count) in counts {
            let slot = match status {
                TaskStatus::Pending => &mut metrics.pending_tasks,
                TaskStatus::Claimed => &mut metrics.claimed_tasks,
                TaskStatus::Processing => &mut metrics.processing_tasks,
                TaskStatus::Completed => &mut metrics.completed_tasks,
                TaskStatus::Failed => &mut metrics.failed_tasks,
                TaskStatus::Cancelled => &mut metrics.cancelled_tasks,
            };
            *slot += count;
            metrics.total_tasks += count;
        }
        metrics.failure_rate = if metrics.total_tasks > 0 {
            metrics.failed_tasks as f64 / metrics.total_tasks as f64
        } else {
            0.0
        };
        metrics
    }

    pub fn count(&self, status: TaskStatus) -> i64 {
        match status {
            TaskStatus::Pending => self.pending_tasks,
            TaskStatus::Claimed => self.claimed_tasks,
            TaskStatus::Processing => self.processing_tasks,
            TaskStatus::Completed => self.completed_tasks,
            TaskStatus::Failed => self.failed_tasks,
            TaskStatus::Cancelled => self.cancelled_tasks,
        }
    }

    /// Tasks currently held by a worker
    pub fn in_flight_tasks(&self) -> i64 {
        TaskStatus::ALL
            .iter()
            .filter(|status| status.is_active())
            .map(|status| self.count(*status))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_queue_has_zero_failure_rate() {
        let metrics = QueueMetrics::from_counts([]);
        assert_eq!(metrics.total_tasks, 0);
        assert_eq!(metrics.failure_rate, 0.0);
    }

    #[test]
    fn test_counts_and_rate() {
        let metrics = QueueMetrics::from_counts([
            (TaskStatus::Pending, 5),
            (TaskStatus::Claimed, 1),
            (TaskStatus::Processing, 2),
            (TaskStatus::Failed, 2),
        ]);
        assert_eq!(metrics.total_tasks, 10);
        assert_eq!(metrics.count(TaskStatus::Pending), 5);
        assert_eq!(metrics.in_flight_tasks(), 3);
        assert!((metrics.failure_rate - 0.2).abs() < f64::EPSILON);
    }
}
