//! Messenger trait and scoped subscriptions
//!
//! A [`Messenger`] owns the broker connection and is shared by every
//! router. Routers only subscribe and publish through it.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use hearthmq_core::{Message, Node, TopicFilter, TopicScheme};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::Result;

/// Shared MQTT transport
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Topic layout used for every node on this connection
    fn topics(&self) -> &TopicScheme;

    /// Open a subscription to every command of `node` under `component`.
    ///
    /// The broker subscription is released when the returned
    /// [`Subscription`] is dropped.
    async fn filtered_messages(&self, component: &str, node: &Node) -> Result<Subscription>;

    /// Publish a raw payload
    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<()>;
}

type Release = Box<dyn FnOnce() + Send>;

/// A scoped sequence of inbound messages.
///
/// Dropping it runs the release hook exactly once, whether the consumer
/// finished normally, returned early, or was aborted.
pub struct Subscription {
    filter: TopicFilter,
    rx: mpsc::Receiver<Message>,
    release: Option<Release>,
}

impl Subscription {
    pub fn new<F>(filter: TopicFilter, rx: mpsc::Receiver<Message>, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            filter,
            rx,
            release: Some(Box::new(release)),
        }
    }

    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    /// Receive the next message; `None` once the messenger closed the route
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_release_runs_once_on_drop() {
        let released = Arc::new(AtomicU32::new(0));
        let (tx, rx) = mpsc::channel(4);

        let counter = released.clone();
        let mut sub = Subscription::new(TopicFilter::parse("a/+").unwrap(), rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tx.send(Message::new("a/set", "{}")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().command(), "set");
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(sub);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_ends_when_sender_dropped() {
        use futures::StreamExt;

        let (tx, rx) = mpsc::channel(4);
        let mut sub = Subscription::new(TopicFilter::parse("a/+").unwrap(), rx, || {});

        tx.send(Message::new("a/get", "{}")).await.unwrap();
        drop(tx);

        assert!(StreamExt::next(&mut sub).await.is_some());
        assert!(StreamExt::next(&mut sub).await.is_none());
    }
}
