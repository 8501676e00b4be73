//! Run counters and gauges.
//!
//! One [`SchedulerMetrics`] lives for one run. Spawned tasks update it
//! through an `Arc`; the final [`MetricsSnapshot`] is attached to the
//! [`RunReport`](crate::report::RunReport).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pulled: AtomicU64,
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    /// Tasks that found their target held and had to queue.
    contended: AtomicU64,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Serializable point-in-time view of [`SchedulerMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub pulled: u64,
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub contended: u64,
    pub running: usize,
    pub peak_running: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

impl SchedulerMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_pulled(&self) {
        self.pulled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_contended(&self) {
        self.contended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Track the size of the in-flight set after it changes.
    pub fn set_in_flight(&self, count: usize) {
        self.in_flight.store(count, Ordering::Relaxed);
        self.peak_in_flight.fetch_max(count, Ordering::Relaxed);
    }

    /// Mark a task as running until the returned guard drops.
    ///
    /// The guard also drops on panic or abort, so the gauge never leaks.
    pub fn enter_running(self: &Arc<Self>) -> RunningGuard {
        self.started.fetch_add(1, Ordering::Relaxed);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
        RunningGuard {
            metrics: self.clone(),
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pulled: self.pulled.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            running: self.running.load(Ordering::SeqCst),
            peak_running: self.peak_running.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the running gauge on drop.
pub struct RunningGuard {
    metrics: Arc<SchedulerMetrics>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.metrics.running.fetch_sub(1, Ordering::SeqCst);
    }
}
