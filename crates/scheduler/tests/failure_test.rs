//! Failure policies, panics and cancellation. A failed, panicked or
//! aborted task must never leave its target locked.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use keygate_scheduler::source::{from_channel, from_iter};
use keygate_scheduler::{
    run, BoxError, Executor, FailurePolicy, RunStatus, Scheduler, SchedulerConfig,
    SchedulerError, Task, TaskOutcome,
};

use common::{task, Event, Recorder};

const A: u64 = 1;
const B: u64 = 2;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_task_releases_its_target() {
    let recorder = Arc::new(Recorder::new().failing(&[1]));
    let tasks = vec![task(1, A, 10), task(2, A, 10)];

    let report = run(recorder.clone(), from_iter(tasks), 0).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.total(), 2);
    assert!(matches!(
        report.task(1).unwrap().outcome,
        TaskOutcome::Failed { .. }
    ));
    assert_eq!(report.task(2).unwrap().outcome, TaskOutcome::Succeeded);
    assert!(recorder.position(Event::End(1)) < recorder.position(Event::Start(2)));
    assert!(!report.is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failures_are_reported_by_identity() {
    let recorder = Arc::new(Recorder::new().failing(&[2, 4]));
    let tasks: Vec<_> = (1..=5).map(|i| task(i, i, 5)).collect();

    let report = run(recorder, from_iter(tasks), 2).await;
    let mut failed: Vec<_> = report.failures().map(|t| t.task_id).collect();
    failed.sort_unstable();
    assert_eq!(failed, vec![2, 4]);

    match report.into_result() {
        Err(SchedulerError::TasksFailed { total, failures }) => {
            assert_eq!(total, 5);
            assert_eq!(failures.len(), 2);
            let msg = failures
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("\n");
            assert!(msg.contains("task 2 rejected"));
            assert!(msg.contains("task 4 rejected"));
        }
        other => panic!("expected TasksFailed, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_task_is_contained_and_releases_its_target() {
    let recorder = Arc::new(Recorder::new().panicking(&[1]));
    let tasks = vec![task(1, A, 5), task(2, A, 5), task(3, B, 5)];

    let report = run(recorder.clone(), from_iter(tasks), 0).await;

    assert_eq!(report.status, RunStatus::Completed);
    match &report.task(1).unwrap().outcome {
        TaskOutcome::Panicked { reason } => assert!(reason.contains("task 1 blew up")),
        other => panic!("expected panic outcome, got {other:?}"),
    }
    assert_eq!(report.task(2).unwrap().outcome, TaskOutcome::Succeeded);
    assert_eq!(report.task(3).unwrap().outcome, TaskOutcome::Succeeded);
    assert_eq!(report.metrics.running, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fail_fast_cancels_in_flight_work() {
    let recorder = Arc::new(Recorder::new().failing(&[1]));
    let config = SchedulerConfig::default().failure_policy(FailurePolicy::FailFast);
    let scheduler = Scheduler::from_arc(recorder, config);
    let tasks = vec![task(1, A, 5), task(2, B, 5_000), task(3, A, 5)];

    let started = Instant::now();
    let report = scheduler.run(from_iter(tasks)).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.status, RunStatus::FailedFast);
    assert!(matches!(
        report.task(1).unwrap().outcome,
        TaskOutcome::Failed { .. }
    ));
    assert_eq!(report.task(2).unwrap().outcome, TaskOutcome::Cancelled);
    assert!(matches!(
        report.into_result(),
        Err(SchedulerError::TasksFailed { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fail_fast_stops_pulling_from_the_source() {
    let recorder = Arc::new(Recorder::new().failing(&[1]));
    let config = SchedulerConfig::with_max_concurrency(1).failure_policy(FailurePolicy::FailFast);
    let scheduler = Scheduler::from_arc(recorder.clone(), config);
    let tasks: Vec<_> = (1..=10).map(|i| task(i, i, 5)).collect();

    let report = scheduler.run(from_iter(tasks)).await;

    assert_eq!(report.status, RunStatus::FailedFast);
    assert_eq!(report.metrics.pulled, 1);
    assert_eq!(recorder.starts(), vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_cancels_a_stalled_run() {
    let recorder = Arc::new(Recorder::new());
    let scheduler = Scheduler::from_arc(recorder.clone(), SchedulerConfig::default());
    let (tx, rx) = mpsc::channel(8);
    tx.send(task(1, A, 10)).await.unwrap();
    tx.send(task(2, B, 10_000)).await.unwrap();
    tx.send(task(3, B, 10)).await.unwrap();

    let shutdown = Arc::new(Notify::new());
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.notify_one();
    });

    // `tx` stays alive, so only the shutdown can end this run.
    let report = scheduler.run_until(from_channel(rx), shutdown).await;
    drop(tx);

    assert!(report.is_cancelled());
    assert_eq!(report.task(1).unwrap().outcome, TaskOutcome::Succeeded);
    assert_eq!(report.task(2).unwrap().outcome, TaskOutcome::Cancelled);
    // Task 3 was queued behind task 2 and never ran.
    assert_eq!(report.task(3).unwrap().outcome, TaskOutcome::Cancelled);
    assert!(report.task(3).unwrap().waited_for_target);
    let mut started = recorder.starts();
    started.sort_unstable();
    assert_eq!(started, vec![1, 2]);
    assert!(matches!(
        report.into_result(),
        Err(SchedulerError::Cancelled { completed: 1, cancelled: 2 })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_tasks_never_start_after_shutdown() {
    for round in 0..100 {
        let recorder = Arc::new(Recorder::new());
        let scheduler = Scheduler::from_arc(recorder.clone(), SchedulerConfig::default());
        let tasks: Vec<_> = (0..8)
            .map(|i| task(i, A, if i == 0 { 10_000 } else { 1 }))
            .collect();

        let shutdown = Arc::new(Notify::new());
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.notify_one();
        });

        let report = scheduler.run_until(from_iter(tasks), shutdown).await;

        assert!(report.is_cancelled(), "round {round}");
        let started = recorder.starts();
        assert!(
            started.iter().all(|&id| id == 0),
            "round {round}: queued tasks started after shutdown: {started:?}"
        );
        for id in 1..8 {
            assert_eq!(
                report.task(id).unwrap().outcome,
                TaskOutcome::Cancelled,
                "round {round}, task {id}"
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_tasks_never_start_after_fail_fast() {
    for round in 0..100 {
        let recorder = Arc::new(Recorder::new().failing(&[9]));
        let config = SchedulerConfig::default().failure_policy(FailurePolicy::FailFast);
        let scheduler = Scheduler::from_arc(recorder.clone(), config);
        let mut tasks: Vec<_> = (0..6)
            .map(|i| task(i, A, if i == 0 { 10_000 } else { 1 }))
            .collect();
        tasks.push(task(9, B, 2));

        let report = scheduler.run(from_iter(tasks)).await;

        assert_eq!(report.status, RunStatus::FailedFast, "round {round}");
        let started = recorder.starts();
        assert!(
            started.iter().all(|&id| id == 0 || id == 9),
            "round {round}: queued tasks started after fail-fast: {started:?}"
        );
        for id in 1..6 {
            assert_eq!(
                report.task(id).unwrap().outcome,
                TaskOutcome::Cancelled,
                "round {round}, task {id}"
            );
        }
    }
}

#[tokio::test]
async fn shutdown_before_start_pulls_nothing() {
    let recorder = Arc::new(Recorder::new());
    let scheduler = Scheduler::from_arc(recorder.clone(), SchedulerConfig::default());
    let shutdown = Arc::new(Notify::new());
    shutdown.notify_one();

    let report = scheduler
        .run_until(from_iter(vec![task(1, A, 5)]), shutdown)
        .await;

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.total(), 0);
    assert!(recorder.starts().is_empty());
}

/// Blocks its worker thread, so abort cannot interrupt it.
struct Stubborn;

#[async_trait]
impl Executor<Task<()>> for Stubborn {
    async fn execute(&self, _task: &Task<()>) -> Result<(), BoxError> {
        std::thread::sleep(Duration::from_millis(2_500));
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drain_timeout_bounds_cancellation() {
    let config = SchedulerConfig::default().drain_timeout_secs(1);
    let scheduler = Scheduler::new(Stubborn, config);
    let shutdown = Arc::new(Notify::new());
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.notify_one();
    });

    let started = Instant::now();
    let report = scheduler
        .run_until(from_iter(vec![Task::new(1, A, ())]), shutdown)
        .await;

    assert!(started.elapsed() < Duration::from_millis(2_000));
    assert!(report.is_cancelled());
    assert_eq!(report.task(1).unwrap().outcome, TaskOutcome::Cancelled);
}
