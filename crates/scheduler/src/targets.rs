//! Per-target exclusive locks with FIFO handoff.
//!
//! [`ActiveTargets`] is the set of targets currently held. Reserving a free
//! target inserts it and returns a [`TargetGuard`]; reserving a held target
//! enqueues a [`TargetWaiter`] behind the current holder. When a guard drops,
//! the lock passes straight to the oldest live waiter, or the target leaves
//! the set if nobody is waiting.
//!
//! Waiters are queued at reservation time, so same-target tasks acquire the
//! lock in the order they were reserved.
//!
//! Once [`ActiveTargets::close`] is called no lock is handed off again:
//! queued waiters resolve with [`SchedulerError::TargetClosed`] and released
//! targets simply leave the set.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::error::SchedulerError;

/// Bounds a target key needs to be tracked in [`ActiveTargets`].
pub trait TargetKey: Clone + Eq + Hash + Send + 'static {}

impl<K: Clone + Eq + Hash + Send + 'static> TargetKey for K {}

type WaitQueue<K> = VecDeque<oneshot::Sender<TargetGuard<K>>>;

struct Held<K: TargetKey> {
    queues: HashMap<K, WaitQueue<K>>,
    closed: bool,
}

/// Set of targets held by running (or about-to-run) tasks.
pub struct ActiveTargets<K: TargetKey> {
    inner: Arc<Mutex<Held<K>>>,
}

impl<K: TargetKey> Clone for ActiveTargets<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: TargetKey> Default for ActiveTargets<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Held {
                queues: HashMap::new(),
                closed: false,
            })),
        }
    }
}

/// Outcome of [`ActiveTargets::reserve`].
pub enum Reservation<K: TargetKey> {
    /// The target was free and is now held.
    Acquired(TargetGuard<K>),
    /// The target is held; the waiter resolves once it is handed over.
    Queued(TargetWaiter<K>),
}

impl<K: TargetKey> Reservation<K> {
    pub fn is_queued(&self) -> bool {
        matches!(self, Reservation::Queued(_))
    }
}

impl<K: TargetKey> ActiveTargets<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Held<K>> {
        // No code panics while holding the lock; a poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check-and-reserve `target` in one step.
    ///
    /// After [`close`](Self::close) every reservation comes back as a
    /// waiter that is already refused.
    pub fn reserve(&self, target: K) -> Reservation<K> {
        let mut held = self.lock();
        if held.closed {
            let (_, rx) = oneshot::channel();
            return Reservation::Queued(TargetWaiter { target, rx });
        }
        match held.queues.get_mut(&target) {
            Some(queue) => {
                let (tx, rx) = oneshot::channel();
                queue.push_back(tx);
                Reservation::Queued(TargetWaiter { target, rx })
            }
            None => {
                held.queues.insert(target.clone(), VecDeque::new());
                Reservation::Acquired(TargetGuard {
                    target,
                    targets: self.clone(),
                    armed: true,
                })
            }
        }
    }

    /// Stop handing off locks. Every queued waiter is refused; current
    /// holders keep their targets until their guards drop.
    pub fn close(&self) {
        let refused: Vec<WaitQueue<K>> = {
            let mut held = self.lock();
            held.closed = true;
            held.queues.values_mut().map(std::mem::take).collect()
        };
        drop(refused);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn contains(&self, target: &K) -> bool {
        self.lock().queues.contains_key(target)
    }

    /// Number of targets currently held.
    pub fn len(&self) -> usize {
        self.lock().queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queues.is_empty()
    }

    /// Number of tasks queued behind the holder of `target`.
    pub fn waiting_on(&self, target: &K) -> usize {
        self.lock().queues.get(target).map_or(0, VecDeque::len)
    }

    fn release(&self, target: &K) {
        loop {
            let next = {
                let mut held = self.lock();
                if held.closed {
                    held.queues.remove(target);
                    return;
                }
                let Some(queue) = held.queues.get_mut(target) else {
                    return;
                };
                match queue.pop_front() {
                    Some(tx) => tx,
                    None => {
                        held.queues.remove(target);
                        return;
                    }
                }
            };

            let guard = TargetGuard {
                target: target.clone(),
                targets: self.clone(),
                armed: true,
            };
            match next.send(guard) {
                Ok(()) => return,
                // Waiter is gone (its task was aborted); try the next one.
                Err(mut unclaimed) => unclaimed.armed = false,
            }
        }
    }
}

/// Exclusive hold on a target. Dropping it releases the target.
pub struct TargetGuard<K: TargetKey> {
    target: K,
    targets: ActiveTargets<K>,
    armed: bool,
}

impl<K: TargetKey> TargetGuard<K> {
    pub fn target(&self) -> &K {
        &self.target
    }
}

impl<K: TargetKey> Drop for TargetGuard<K> {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            self.targets.release(&self.target);
        }
    }
}

impl<K: TargetKey + fmt::Debug> fmt::Debug for TargetGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetGuard")
            .field("target", &self.target)
            .finish()
    }
}

/// A queued claim on a held target.
pub struct TargetWaiter<K: TargetKey> {
    target: K,
    rx: oneshot::Receiver<TargetGuard<K>>,
}

impl<K: TargetKey + fmt::Display> TargetWaiter<K> {
    /// Wait until the lock is handed over.
    ///
    /// Dropping the waiter before it resolves gives up its place; a lock
    /// handed to a dropped waiter moves on to the next one. Fails with
    /// [`SchedulerError::TargetClosed`] once the set is closed, even if a
    /// handoff raced the close.
    pub async fn acquired(self) -> Result<TargetGuard<K>, SchedulerError> {
        let Self { target, rx } = self;
        match rx.await {
            Ok(guard) if !guard.targets.is_closed() => Ok(guard),
            _ => Err(SchedulerError::TargetClosed(target.to_string())),
        }
    }
}
