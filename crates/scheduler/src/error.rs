//! Scheduler error types.

use thiserror::Error;

use keygate_core::TaskId;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {task_id} (target {target}) failed: {reason}")]
    TaskExecutionFailed {
        task_id: TaskId,
        target: String,
        reason: String,
    },

    #[error("task {task_id} (target {target}) panicked: {reason}")]
    TaskPanicked {
        task_id: TaskId,
        target: String,
        reason: String,
    },

    #[error("target {0} is closed, the run is stopping")]
    TargetClosed(String),

    #[error("{} of {total} tasks failed: {}", .failures.len(), join_failures(.failures))]
    TasksFailed {
        total: usize,
        failures: Vec<SchedulerError>,
    },

    #[error("run cancelled after {completed} tasks completed ({cancelled} cancelled)")]
    Cancelled { completed: usize, cancelled: usize },
}

fn join_failures(failures: &[SchedulerError]) -> String {
    failures
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
