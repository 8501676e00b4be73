//! The admission loop.
//!
//! A single control flow pulls tasks from the source one at a time:
//!
//! 1. **Capacity gate**: with a ceiling of `K > 0`, no task is pulled
//!    while `K` tasks are in flight.
//! 2. **Exclusivity gate**: the task's target is reserved in
//!    [`ActiveTargets`]. A held target queues the task behind the holder.
//! 3. **Dispatch**: the task is spawned; once it owns its target it runs
//!    the executor, then drops the guard, which hands the target to the
//!    next queued task or frees it.
//! 4. **Bookkeeping**: each completion is matched to its in-flight entry
//!    by tokio task id and recorded.
//!
//! When the source is exhausted the loop drains whatever is in flight.

use std::any::Any;
use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use tokio::sync::Notify;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, info, warn};

use keygate_core::{FailurePolicy, SchedulerConfig, Targeted, TaskId};

use crate::executor::Executor;
use crate::metrics::SchedulerMetrics;
use crate::report::{RunReport, RunStatus, TaskOutcome, TaskRecord};
use crate::targets::{ActiveTargets, Reservation};

// ── Scheduler ────────────────────────────────────────────────────────

/// Dispatches tasks to an executor under per-target exclusivity and a
/// global concurrency ceiling.
///
/// All run state lives inside a single [`run`](Self::run) call, so one
/// scheduler can drive several independent runs, sequentially or at once.
pub struct Scheduler<E: ?Sized> {
    executor: Arc<E>,
    config: SchedulerConfig,
}

impl<E> Scheduler<E> {
    pub fn new(executor: E, config: SchedulerConfig) -> Self {
        Self::from_arc(Arc::new(executor), config)
    }
}

impl<E: ?Sized> Scheduler<E> {
    /// Build a scheduler around a shared (possibly `dyn`) executor.
    pub fn from_arc(executor: Arc<E>, config: SchedulerConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn at_capacity(&self, in_flight: usize) -> bool {
        self.config
            .concurrency_limit()
            .is_some_and(|limit| in_flight >= limit)
    }

    fn fail_fast(&self) -> bool {
        self.config.failure_policy == FailurePolicy::FailFast
    }

    /// Run every task from `source` to completion.
    pub async fn run<T, S>(&self, source: S) -> RunReport
    where
        T: Targeted,
        E: Executor<T>,
        S: Stream<Item = T>,
    {
        self.run_until(source, Arc::new(Notify::new())).await
    }

    /// Like [`run`](Self::run), but stops early when `shutdown` is notified.
    ///
    /// On shutdown no further tasks are pulled, tasks still queued behind a
    /// target never start, running tasks are aborted (releasing their
    /// targets) and the report's status is
    /// [`RunStatus::Cancelled`]. Either `notify_one` or `notify_waiters`
    /// works, including a `notify_one` issued before the run starts.
    pub async fn run_until<T, S>(&self, source: S, shutdown: Arc<Notify>) -> RunReport
    where
        T: Targeted,
        E: Executor<T>,
        S: Stream<Item = T>,
    {
        let started = Instant::now();
        let mut state: RunState<T, E> = RunState::new(self.executor.clone());
        info!(
            max_concurrency = self.config.max_concurrency,
            failure_policy = %self.config.failure_policy,
            "scheduler run starting"
        );

        let mut source = pin!(source);
        let mut shutdown_signal = pin!(shutdown.notified());
        let mut status = RunStatus::Completed;
        let mut seq: u64 = 0;

        'admit: loop {
            while self.at_capacity(state.in_flight.len()) {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_signal => {
                        status = RunStatus::Cancelled;
                        break 'admit;
                    }
                    Some(joined) = state.in_flight.join_next_with_id() => {
                        if state.settle(joined) && self.fail_fast() {
                            status = RunStatus::FailedFast;
                            break 'admit;
                        }
                    }
                }
            }

            tokio::select! {
                biased;
                _ = &mut shutdown_signal => {
                    status = RunStatus::Cancelled;
                    break;
                }
                Some(joined) = state.in_flight.join_next_with_id(), if !state.in_flight.is_empty() => {
                    if state.settle(joined) && self.fail_fast() {
                        status = RunStatus::FailedFast;
                        break;
                    }
                }
                next = source.next() => match next {
                    Some(task) => {
                        state.admit(seq, task);
                        seq += 1;
                    }
                    None => break,
                },
            }
        }

        if status == RunStatus::Completed {
            debug!(in_flight = state.in_flight.len(), "source exhausted, draining");
            while !state.in_flight.is_empty() {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_signal => {
                        status = RunStatus::Cancelled;
                        break;
                    }
                    Some(joined) = state.in_flight.join_next_with_id() => {
                        if state.settle(joined) && self.fail_fast() {
                            status = RunStatus::FailedFast;
                            break;
                        }
                    }
                }
            }
        }

        if status != RunStatus::Completed {
            self.cancel_in_flight(&mut state, status).await;
        }

        let report = RunReport {
            status,
            elapsed_ms: started.elapsed().as_millis() as u64,
            metrics: state.metrics.snapshot(),
            tasks: state.records,
        };
        info!(
            status = ?report.status,
            total = report.total(),
            succeeded = report.succeeded(),
            failed = report.failures().count(),
            cancelled = report.cancelled(),
            elapsed_ms = report.elapsed_ms,
            "scheduler run finished"
        );
        report
    }

    async fn cancel_in_flight<T>(&self, state: &mut RunState<T, E>, status: RunStatus)
    where
        T: Targeted,
        E: Executor<T>,
    {
        // Queued tasks must not pick up a target freed by an abort.
        state.targets.close();
        if state.in_flight.is_empty() {
            return;
        }
        warn!(
            ?status,
            in_flight = state.in_flight.len(),
            "stopping early, aborting in-flight tasks"
        );
        state.in_flight.abort_all();

        let drain = async {
            while let Some(joined) = state.in_flight.join_next_with_id().await {
                state.settle(joined);
            }
        };
        match self.config.drain_timeout_secs {
            Some(secs) => {
                if tokio::time::timeout(Duration::from_secs(secs), drain)
                    .await
                    .is_err()
                {
                    warn!(
                        drain_timeout_secs = secs,
                        remaining = state.in_flight.len(),
                        "aborted tasks did not unwind in time"
                    );
                    state.abandon_pending();
                }
            }
            None => drain.await,
        }
    }
}

/// Run every task from `source` through `executor`, at most
/// `max_concurrency` at a time (`0` = unbounded), never two with the same
/// target at once.
pub async fn run<T, E, S>(executor: E, source: S, max_concurrency: usize) -> RunReport
where
    T: Targeted,
    E: Executor<T>,
    S: Stream<Item = T>,
{
    Scheduler::new(executor, SchedulerConfig::with_max_concurrency(max_concurrency))
        .run(source)
        .await
}

// ── Per-run state ────────────────────────────────────────────────────

/// Bookkeeping for a task that has been spawned but not yet joined.
struct PendingTask {
    seq: u64,
    task_id: TaskId,
    target: String,
    waited: bool,
}

impl PendingTask {
    fn into_record(self, outcome: TaskOutcome) -> TaskRecord {
        TaskRecord {
            seq: self.seq,
            task_id: self.task_id,
            target: self.target,
            outcome,
            waited_for_target: self.waited,
            duration_ms: None,
        }
    }
}

struct RunState<T: Targeted, E: ?Sized> {
    executor: Arc<E>,
    targets: ActiveTargets<T::Target>,
    in_flight: JoinSet<TaskRecord>,
    pending: HashMap<Id, PendingTask>,
    records: Vec<TaskRecord>,
    metrics: Arc<SchedulerMetrics>,
}

impl<T, E> RunState<T, E>
where
    T: Targeted,
    E: Executor<T> + ?Sized,
{
    fn new(executor: Arc<E>) -> Self {
        Self {
            executor,
            targets: ActiveTargets::new(),
            in_flight: JoinSet::new(),
            pending: HashMap::new(),
            records: Vec::new(),
            metrics: SchedulerMetrics::new(),
        }
    }

    /// Reserve the task's target and spawn it.
    fn admit(&mut self, seq: u64, task: T) {
        self.metrics.record_pulled();
        let task_id = task.id();
        let target = task.target().clone();
        let reservation = self.targets.reserve(target.clone());
        let waited = reservation.is_queued();
        if waited {
            self.metrics.record_contended();
            debug!(
                task_id,
                target_id = %target,
                queued_behind = self.targets.waiting_on(&target),
                "target busy, task queued"
            );
        } else {
            debug!(task_id, target_id = %target, "task admitted");
        }

        let handle = self.in_flight.spawn(execute(
            seq,
            task,
            reservation,
            self.executor.clone(),
            self.metrics.clone(),
        ));
        self.pending.insert(
            handle.id(),
            PendingTask {
                seq,
                task_id,
                target: target.to_string(),
                waited,
            },
        );
        self.metrics.set_in_flight(self.in_flight.len());
    }

    /// Record a joined task. Returns `true` if it failed or panicked.
    fn settle(&mut self, joined: Result<(Id, TaskRecord), JoinError>) -> bool {
        let record = match joined {
            Ok((id, record)) => {
                self.pending.remove(&id);
                record
            }
            Err(err) => {
                let Some(pending) = self.pending.remove(&err.id()) else {
                    warn!(error = %err, "joined a task with no pending entry");
                    return false;
                };
                let outcome = if err.is_panic() {
                    TaskOutcome::Panicked {
                        reason: panic_message(err.into_panic()),
                    }
                } else {
                    TaskOutcome::Cancelled
                };
                pending.into_record(outcome)
            }
        };
        self.metrics.set_in_flight(self.in_flight.len());

        match &record.outcome {
            TaskOutcome::Succeeded => {
                self.metrics.record_succeeded();
                debug!(task_id = record.task_id, duration_ms = ?record.duration_ms, "task succeeded");
            }
            TaskOutcome::Failed { reason } | TaskOutcome::Panicked { reason } => {
                self.metrics.record_failed();
                warn!(
                    task_id = record.task_id,
                    target_id = %record.target,
                    error = %reason,
                    "task failed"
                );
            }
            TaskOutcome::Cancelled => {
                self.metrics.record_cancelled();
                debug!(task_id = record.task_id, "task cancelled");
            }
        }

        let failed = record.outcome.is_failure();
        self.records.push(record);
        failed
    }

    /// Give up on tasks that did not unwind after being aborted.
    fn abandon_pending(&mut self) {
        self.in_flight.detach_all();
        for (_, pending) in self.pending.drain() {
            self.metrics.record_cancelled();
            self.records.push(pending.into_record(TaskOutcome::Cancelled));
        }
        self.metrics.set_in_flight(0);
    }
}

// ── Task body ────────────────────────────────────────────────────────

/// Wait for the target, run the executor, release the target.
async fn execute<T, E>(
    seq: u64,
    task: T,
    reservation: Reservation<T::Target>,
    executor: Arc<E>,
    metrics: Arc<SchedulerMetrics>,
) -> TaskRecord
where
    T: Targeted,
    E: Executor<T> + ?Sized,
{
    let task_id = task.id();
    let target = task.target().to_string();
    let waited = reservation.is_queued();

    let guard = match reservation {
        Reservation::Acquired(guard) => guard,
        Reservation::Queued(waiter) => match waiter.acquired().await {
            Ok(guard) => guard,
            Err(err) => {
                debug!(task_id, target_id = %target, reason = %err, "queued task dropped");
                return TaskRecord {
                    seq,
                    task_id,
                    target,
                    outcome: TaskOutcome::Cancelled,
                    waited_for_target: waited,
                    duration_ms: None,
                };
            }
        },
    };

    debug!(task_id, target_id = %target, "task running");
    let running = metrics.enter_running();
    let started = Instant::now();
    let result = executor.execute(&task).await;
    let duration_ms = started.elapsed().as_millis() as u64;
    drop(running);
    drop(guard);

    let outcome = match result {
        Ok(()) => TaskOutcome::Succeeded,
        Err(err) => TaskOutcome::Failed {
            reason: err.to_string(),
        },
    };
    TaskRecord {
        seq,
        task_id,
        target,
        outcome,
        waited_for_target: waited,
        duration_ms: Some(duration_ms),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
