use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Identifies a task in run reports and logs.
pub type TaskId = u64;

/// Something the scheduler can dispatch.
///
/// The scheduler only looks at the target (for mutual exclusion) and the id
/// (for reporting). Everything else about a task belongs to the executor.
pub trait Targeted: Send + Sync + 'static {
    /// Key grouping tasks that must never run concurrently.
    type Target: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    fn target(&self) -> &Self::Target;

    fn id(&self) -> TaskId;
}

/// A plain task: an id, a target and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task<P, K = u64> {
    pub id: TaskId,
    pub target: K,
    pub payload: P,
}

impl<P, K> Task<P, K> {
    pub fn new(id: TaskId, target: K, payload: P) -> Self {
        Self { id, target, payload }
    }
}

impl<P, K> Targeted for Task<P, K>
where
    P: Send + Sync + 'static,
    K: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    type Target = K;

    fn target(&self) -> &K {
        &self.target
    }

    fn id(&self) -> TaskId {
        self.id
    }
}

impl<P, K: fmt::Display> fmt::Display for Task<P, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} (target {})", self.id, self.target)
    }
}
