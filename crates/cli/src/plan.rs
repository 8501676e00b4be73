//! Task plans and the simulated executor that runs them.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use keygate_scheduler::{BoxError, Executor, Task, TaskId};

/// One entry of a plan file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: TaskId,
    pub target: String,
    /// How long the simulated work takes.
    #[serde(default)]
    pub duration_ms: u64,
    /// Whether the simulated work reports a failure.
    #[serde(default)]
    pub fail: bool,
}

/// What the simulated executor does for a task.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedWork {
    pub duration: Duration,
    pub fail: bool,
}

pub type PlanTask = Task<SimulatedWork, String>;

impl From<PlannedTask> for PlanTask {
    fn from(planned: PlannedTask) -> Self {
        Task::new(
            planned.id,
            planned.target,
            SimulatedWork {
                duration: Duration::from_millis(planned.duration_ms),
                fail: planned.fail,
            },
        )
    }
}

/// Parse a plan from JSON text.
pub fn parse_plan(json: &str) -> Result<Vec<PlanTask>> {
    let planned: Vec<PlannedTask> =
        serde_json::from_str(json).context("plan must be a JSON array of tasks")?;
    if let Some(empty) = planned.iter().find(|t| t.target.trim().is_empty()) {
        bail!("task {} has an empty target", empty.id);
    }
    Ok(planned.into_iter().map(PlanTask::from).collect())
}

/// Load a plan file.
pub fn load_plan(path: &Path) -> Result<Vec<PlanTask>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    parse_plan(&json).with_context(|| format!("invalid plan {}", path.display()))
}

/// Sleeps for each task's duration, then succeeds or fails as planned.
pub struct SimulatedExecutor;

#[async_trait]
impl Executor<PlanTask> for SimulatedExecutor {
    async fn execute(&self, task: &PlanTask) -> Result<(), BoxError> {
        debug!(task_id = task.id, target_id = %task.target, "simulating work");
        tokio::time::sleep(task.payload.duration).await;
        if task.payload.fail {
            return Err(format!("simulated failure on target {}", task.target).into());
        }
        Ok(())
    }
}
