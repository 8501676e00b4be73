//! What a run produced: per-task outcomes plus run-level totals.

use serde::Serialize;

use keygate_core::TaskId;

use crate::error::SchedulerError;
use crate::metrics::MetricsSnapshot;

/// How a single task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed { reason: String },
    Panicked { reason: String },
    /// Aborted by cancellation or fail-fast before it finished.
    Cancelled,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failed { .. } | TaskOutcome::Panicked { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    /// Position of the task in the source, starting at 0.
    pub seq: u64,
    pub task_id: TaskId,
    pub target: String,
    pub outcome: TaskOutcome,
    /// Whether the task had to queue behind another task on its target.
    pub waited_for_target: bool,
    /// Executor time; `None` if the task never finished executing.
    pub duration_ms: Option<u64>,
}

impl TaskRecord {
    fn to_error(&self) -> Option<SchedulerError> {
        match &self.outcome {
            TaskOutcome::Failed { reason } => Some(SchedulerError::TaskExecutionFailed {
                task_id: self.task_id,
                target: self.target.clone(),
                reason: reason.clone(),
            }),
            TaskOutcome::Panicked { reason } => Some(SchedulerError::TaskPanicked {
                task_id: self.task_id,
                target: self.target.clone(),
                reason: reason.clone(),
            }),
            TaskOutcome::Succeeded | TaskOutcome::Cancelled => None,
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Source exhausted and every task drained.
    Completed,
    /// A task failed under [`FailurePolicy::FailFast`](keygate_core::FailurePolicy).
    FailedFast,
    /// The shutdown signal fired.
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    /// Records in completion order.
    pub tasks: Vec<TaskRecord>,
    pub elapsed_ms: u64,
    pub metrics: MetricsSnapshot,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.tasks.len()
    }

    pub fn succeeded(&self) -> usize {
        self.tasks.iter().filter(|t| t.outcome.is_success()).count()
    }

    pub fn cancelled(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.outcome == TaskOutcome::Cancelled)
            .count()
    }

    /// Tasks that failed or panicked.
    pub fn failures(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter().filter(|t| t.outcome.is_failure())
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    /// True when the run completed and every task succeeded.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed && self.tasks.iter().all(|t| t.outcome.is_success())
    }

    /// Look up the record for a task id.
    pub fn task(&self, task_id: TaskId) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// Turn the report into an error if anything went wrong.
    ///
    /// Failures take precedence over cancellation, so a fail-fast run
    /// reports the task that tripped it.
    pub fn into_result(self) -> Result<RunReport, SchedulerError> {
        let failures: Vec<SchedulerError> =
            self.tasks.iter().filter_map(TaskRecord::to_error).collect();
        if !failures.is_empty() {
            return Err(SchedulerError::TasksFailed {
                total: self.total(),
                failures,
            });
        }
        if self.is_cancelled() {
            return Err(SchedulerError::Cancelled {
                completed: self.succeeded(),
                cancelled: self.cancelled(),
            });
        }
        Ok(self)
    }
}
