use super::events::TaskEvent;
use super::states::TaskStatus;
use crate::error::{Result, TaskQueueError};
use crate::models::Task;

/// Transition table for queued tasks.
///
/// ```text
/// pending ──claim──▶ claimed ──start──▶ processing ──complete──▶ completed
///    ▲                                      │
///    └──────(retry via claim)── failed ◀────┘ fail
///
/// any non-terminal ──cancel──▶ cancelled
/// ```
///
/// A `failed` task whose attempts reached the type ceiling carries a
/// `completed_at` stamp and accepts no further events.
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Determine the target status for `event`, or reject the transition
    pub fn determine_target_state(task: &Task, event: &TaskEvent) -> Result<TaskStatus> {
        let target = match (task.status, event) {
            (TaskStatus::Pending, TaskEvent::Claim) => TaskStatus::Claimed,
            (TaskStatus::Failed, TaskEvent::Claim) if !task.retries_exhausted() => {
                TaskStatus::Claimed
            }

            (TaskStatus::Claimed, TaskEvent::Start) => TaskStatus::Processing,

            (TaskStatus::Processing, TaskEvent::Complete) => TaskStatus::Completed,
            (TaskStatus::Processing, TaskEvent::Fail(_)) => TaskStatus::Failed,

            (
                TaskStatus::Pending | TaskStatus::Claimed | TaskStatus::Processing,
                TaskEvent::Cancel,
            ) => TaskStatus::Cancelled,
            (TaskStatus::Failed, TaskEvent::Cancel) if !task.retries_exhausted() => {
                TaskStatus::Cancelled
            }

            (from, _) => {
                return Err(TaskQueueError::InvalidTransition {
                    task_id: task.id,
                    from,
                    event: event.event_type(),
                })
            }
        };

        Ok(target)
    }

    /// Statuses from which `event` may be applied (before the exhaustion check).
    ///
    /// Stores use this to build their conditional updates.
    pub fn source_states(event: &TaskEvent) -> &'static [TaskStatus] {
        match event {
            TaskEvent::Claim => &[TaskStatus::Pending, TaskStatus::Failed],
            TaskEvent::Start => &[TaskStatus::Claimed],
            TaskEvent::Complete | TaskEvent::Fail(_) => &[TaskStatus::Processing],
            TaskEvent::Cancel => &[
                TaskStatus::Pending,
                TaskStatus::Claimed,
                TaskStatus::Processing,
                TaskStatus::Failed,
            ],
        }
    }
}
