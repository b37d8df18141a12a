// State machine for queued tasks
//
// Statuses are a named enum persisted as text; the transition table lives in
// `TaskStateMachine` and is shared by every store implementation.

pub mod events;
pub mod states;
pub mod task_state_machine;

pub use events::TaskEvent;
pub use states::TaskStatus;
pub use task_state_machine::TaskStateMachine;
