//! Bounded-concurrency task scheduling with per-target mutual exclusion.
//!
//! Tasks are pulled from a [`futures::Stream`] in order and handed to an
//! [`Executor`]. Two tasks with the same target never run at the same time,
//! and the number of tasks in flight never exceeds the configured ceiling.

pub mod error;
pub mod executor;
pub mod metrics;
pub mod report;
pub mod scheduler;
pub mod source;
pub mod targets;

pub use error::SchedulerError;
pub use executor::{executor_fn, BoxError, Executor, FnExecutor};
pub use keygate_core::{FailurePolicy, SchedulerConfig, Targeted, Task, TaskId};
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use report::{RunReport, RunStatus, TaskOutcome, TaskRecord};
pub use scheduler::{run, Scheduler};
pub use targets::{ActiveTargets, Reservation, TargetGuard, TargetKey, TargetWaiter};
