//! # Event Feeds
//!
//! Multi-consumer fan-out for connection and data events.
//!
//! Every subscriber owns an unbounded queue, so a slow consumer never causes
//! events to be dropped for itself or for anyone else. Closing a feed ends
//! every subscription after its queued events have been drained.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::debug;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The feed was closed (epoch ended).
    #[error("event feed closed")]
    Closed,
}

struct FeedInner<T> {
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    published: u64,
    closed: bool,
}

/// Publishing side of an event feed. Cloning shares the same feed.
pub struct EventFeed<T> {
    name: &'static str,
    inner: Arc<Mutex<FeedInner<T>>>,
}

impl<T> Clone for EventFeed<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> EventFeed<T> {
    /// Create an open feed. `name` is only used for logging.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(FeedInner {
                subscribers: Vec::new(),
                published: 0,
                closed: false,
            })),
        }
    }

    /// Subscribe to events published from now on.
    ///
    /// Subscribing to a closed feed yields a subscription that ends at once.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        debug!(feed = self.name, subscribers = inner.subscribers.len(), "New subscription created");
        Subscription { receiver: rx }
    }

    /// Deliver `event` to every live subscriber; returns how many received it.
    pub fn publish(&self, event: T) -> usize {
        let mut inner = self.inner.lock();
        if inner.closed {
            return 0;
        }
        inner.published += 1;
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());

        let receivers = inner.subscribers.len();
        if receivers == 0 {
            debug!(feed = self.name, "Event dropped (no subscribers)");
        }
        receivers
    }

    /// End every subscription. Further publishes are ignored.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
        debug!(feed = self.name, published = inner.published, "Feed closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Subscribers that have not been dropped yet (as of the last publish).
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }

    pub fn events_published(&self) -> u64 {
        self.inner.lock().published
    }
}

/// Receiving side of an event feed.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Receive the next event.
    ///
    /// # Returns
    ///
    /// - `Some(event)` - The next event
    /// - `None` - The feed was closed and every queued event was consumed
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Try to receive the next event without waiting.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(event))` - An event was queued
    /// - `Ok(None)` - Nothing queued right now
    /// - `Err(SubscriptionError::Closed)` - The feed was closed
    pub fn try_recv(&mut self) -> Result<Option<T>, SubscriptionError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SubscriptionError::Closed),
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_publish_no_subscribers() {
        let feed: EventFeed<u32> = EventFeed::new("test");
        assert_eq!(feed.publish(1), 0);
        assert_eq!(feed.events_published(), 1);
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_every_event_in_order() {
        let feed = EventFeed::new("test");
        let mut a = feed.subscribe();
        let mut b = feed.subscribe();

        for i in 0..100u32 {
            assert_eq!(feed.publish(i), 2);
        }

        for i in 0..100u32 {
            assert_eq!(a.recv().await, Some(i));
        }
        for i in 0..100u32 {
            assert_eq!(b.try_recv(), Ok(Some(i)));
        }
        assert_eq!(b.try_recv(), Ok(None));
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions_after_drain() {
        let feed = EventFeed::new("test");
        let mut sub = feed.subscribe();
        feed.publish("last");
        feed.close();

        assert_eq!(sub.recv().await, Some("last"));
        assert_eq!(sub.recv().await, None);
        assert_eq!(sub.try_recv(), Err(SubscriptionError::Closed));
        assert_eq!(feed.publish("ignored"), 0);
        assert!(feed.is_closed());
    }

    #[tokio::test]
    async fn test_subscribe_after_close_ends_immediately() {
        let feed: EventFeed<u8> = EventFeed::new("test");
        feed.close();
        let mut sub = feed.subscribe();
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let feed: EventFeed<u8> = EventFeed::new("test");
        {
            let _a = feed.subscribe();
            let _b = feed.subscribe();
            assert_eq!(feed.subscriber_count(), 2);
        }
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_as_stream() {
        let feed = EventFeed::new("test");
        let sub = feed.subscribe();
        feed.publish(1u8);
        feed.publish(2u8);
        feed.close();

        let collected: Vec<u8> = timeout(Duration::from_secs(1), sub.collect())
            .await
            .expect("timeout");
        assert_eq!(collected, vec![1, 2]);
    }
}
