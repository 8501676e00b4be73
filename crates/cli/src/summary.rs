use std::fmt::Write;

use keygate_scheduler::{RunReport, RunStatus, TaskOutcome};

/// Render a human-readable summary of a run.
pub fn render(report: &RunReport) -> String {
    let mut out = String::new();
    let status = match report.status {
        RunStatus::Completed => "completed",
        RunStatus::FailedFast => "stopped after failure",
        RunStatus::Cancelled => "cancelled",
    };
    let failed = report.failures().count();

    let _ = writeln!(
        out,
        "run {status} in {}ms: {} tasks, {} succeeded, {failed} failed, {} cancelled",
        report.elapsed_ms,
        report.total(),
        report.succeeded(),
        report.cancelled(),
    );
    let _ = writeln!(
        out,
        "peak running {}, peak in flight {}, {} waited for their target",
        report.metrics.peak_running, report.metrics.peak_in_flight, report.metrics.contended,
    );

    let mut tasks: Vec<_> = report.tasks.iter().collect();
    tasks.sort_by_key(|t| t.seq);
    for task in tasks {
        let outcome = match &task.outcome {
            TaskOutcome::Succeeded => "ok".to_string(),
            TaskOutcome::Failed { reason } => format!("FAILED: {reason}"),
            TaskOutcome::Panicked { reason } => format!("PANICKED: {reason}"),
            TaskOutcome::Cancelled => "cancelled".to_string(),
        };
        let duration = task
            .duration_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "  #{:<4} task {:<6} target {:<12} {:>8}  {outcome}",
            task.seq, task.task_id, task.target, duration,
        );
    }
    out
}
