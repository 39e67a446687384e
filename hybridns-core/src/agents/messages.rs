//! Message types exchanged with the `BackgroundWorker` agent.

use super::background_worker::TaskStatus;

/// Request cancellation of a specific named task.
#[derive(Clone, Debug)]
pub struct CancelTask {
    pub task_id: String,
}

/// Ask for the status of a single named task.
#[derive(Clone, Debug)]
pub struct GetTaskStatus {
    pub task_id: String,
}

/// Ask for the status of every tracked task.
#[derive(Clone, Debug)]
pub struct GetAllTaskStatuses;

/// Reply carrying a task's current status.
#[derive(Clone, Debug)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
}
