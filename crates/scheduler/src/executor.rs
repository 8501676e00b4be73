//! The executor seam: whatever actually performs a task.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use keygate_core::Targeted;

/// Error type executors report failures with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Performs the work for a task.
///
/// Both `Ok` and `Err` count as completion: the scheduler releases the
/// task's target either way. A panic inside `execute` is contained to the
/// task and reported as a panic.
#[async_trait]
pub trait Executor<T: Targeted>: Send + Sync + 'static {
    async fn execute(&self, task: &T) -> Result<(), BoxError>;
}

/// Blanket implementation so `Arc<dyn Executor<T>>` can be used directly.
#[async_trait]
impl<T, E> Executor<T> for Arc<E>
where
    T: Targeted,
    E: Executor<T> + ?Sized,
{
    async fn execute(&self, task: &T) -> Result<(), BoxError> {
        (**self).execute(task).await
    }
}

/// Executor backed by a closure.
///
/// The closure receives the task by reference and must return a future
/// that owns whatever it needs from it.
pub struct FnExecutor<F> {
    f: F,
}

/// Wrap a closure as an [`Executor`].
///
/// # Example
/// ```ignore
/// let executor = executor_fn(|task: &Task<String>| {
///     let url = task.payload.clone();
///     async move { fetch(&url).await.map_err(Into::into) }
/// });
/// ```
pub fn executor_fn<F>(f: F) -> FnExecutor<F> {
    FnExecutor { f }
}

#[async_trait]
impl<T, F, Fut> Executor<T> for FnExecutor<F>
where
    T: Targeted,
    F: Fn(&T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn execute(&self, task: &T) -> Result<(), BoxError> {
        (self.f)(task).await
    }
}
