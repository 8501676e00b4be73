//! Adapters turning common producers into task streams.
//!
//! The scheduler accepts any [`Stream`]; these cover the usual cases.

use futures::stream::{self, Stream};
use tokio::sync::mpsc;

/// A finite source over an iterator.
pub fn from_iter<I>(tasks: I) -> impl Stream<Item = I::Item>
where
    I: IntoIterator,
{
    stream::iter(tasks)
}

/// A source fed by a bounded channel. Ends when every sender is dropped.
pub fn from_channel<T>(rx: mpsc::Receiver<T>) -> impl Stream<Item = T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|task| (task, rx)) })
}

/// A source fed by an unbounded channel. Ends when every sender is dropped.
pub fn from_unbounded_channel<T>(rx: mpsc::UnboundedReceiver<T>) -> impl Stream<Item = T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|task| (task, rx)) })
}
