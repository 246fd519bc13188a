//! Lifecycle events
//!
//! Each [`WorkerPool`](crate::WorkerPool) owns one [`EventBus`]. Observers
//! register through it and receive a [`QueueEvent`] for every transition of
//! every item. Delivery is best effort: publishing never blocks a worker, and
//! a subscriber that falls behind loses the oldest events instead of slowing
//! the pool down.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::task::{ItemId, ItemSnapshot, QueuedItem};

/// What happened to an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Accepted into the backlog
    Enqueued,
    /// A worker holds a permit and is about to run it
    Started,
    /// An attempt failed and another one is scheduled after `delay`
    Retrying {
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// Ran to success
    Completed,
    /// Retries exhausted
    Failed { error: String },
    /// Cancellation fired before the item could finish
    Cancelled,
}

impl EventKind {
    /// Stable lowercase name, suitable for logs and metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Started => "started",
            Self::Retrying { .. } => "retrying",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further events will follow for the item
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Cancelled)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A lifecycle notification
pub struct QueueEvent<T> {
    pub kind: EventKind,
    pub item: ItemSnapshot<T>,
    pub at: DateTime<Utc>,
}

impl<T> QueueEvent<T> {
    pub fn new(kind: EventKind, item: ItemSnapshot<T>) -> Self {
        Self {
            kind,
            item,
            at: Utc::now(),
        }
    }

    pub fn item_id(&self) -> ItemId {
        self.item.id
    }
}

impl<T> Clone for QueueEvent<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            item: self.item.clone(),
            at: self.at,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for QueueEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEvent")
            .field("kind", &self.kind)
            .field("item", &self.item)
            .field("at", &self.at)
            .finish()
    }
}

/// Observer registration for one pool
pub struct EventBus<T> {
    sender: broadcast::Sender<QueueEvent<T>>,
}

impl<T> EventBus<T>
where
    T: Send + Sync + 'static,
{
    /// Create a bus buffering up to `capacity` events per lagging subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a receiver for every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent<T>> {
        self.sender.subscribe()
    }

    /// Events as a stream; lagged events are skipped
    pub fn stream(&self) -> BoxStream<'static, QueueEvent<T>> {
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(|result| result.ok());
        Box::pin(stream)
    }

    /// Run `f` for every event on a separate task
    ///
    /// The task ends when the bus is dropped or the handle is aborted. A
    /// panic inside `f` only ends the listener.
    pub fn listen<F>(&self, mut f: F) -> JoinHandle<()>
    where
        F: FnMut(QueueEvent<T>) + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => f(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Publish an event to current subscribers; never blocks
    pub fn publish(&self, event: QueueEvent<T>) {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }

    pub(crate) fn emit(&self, kind: EventKind, item: &QueuedItem<T>) {
        if self.sender.receiver_count() == 0 {
            return;
        }
        self.publish(QueueEvent::new(kind, item.snapshot()));
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::task::{from_fn, TaskError};

    fn item(payload: &str) -> QueuedItem<String> {
        QueuedItem::new(
            from_fn(|_: Arc<String>, _| async { Ok::<(), TaskError>(()) }),
            payload.to_string(),
        )
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(EventKind::Enqueued.to_string(), "enqueued");
        let failed = EventKind::Failed { error: "x".into() };
        assert_eq!(failed.name(), "failed");
        assert!(EventKind::Cancelled.is_terminal());
        assert!(!EventKind::Started.is_terminal());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus: EventBus<String> = EventBus::new(4);
        bus.emit(EventKind::Enqueued, &item("a"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_events_in_order() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let queued = item("a");
        bus.emit(EventKind::Enqueued, &queued);
        bus.emit(EventKind::Started, &queued);

        for receiver in [&mut first, &mut second] {
            assert_eq!(receiver.recv().await.unwrap().kind, EventKind::Enqueued);
            let started = receiver.recv().await.unwrap();
            assert_eq!(started.kind, EventKind::Started);
            assert_eq!(started.item_id(), queued.id());
            assert_eq!(started.item.payload.as_str(), "a");
        }
    }

    #[tokio::test]
    async fn test_stream_skips_lagged_events() {
        let bus = EventBus::new(2);
        let stream = bus.stream();

        let queued = item("a");
        for _ in 0..5 {
            bus.emit(EventKind::Started, &queued);
        }
        bus.emit(EventKind::Completed, &queued);
        drop(bus);

        let kinds: Vec<_> = stream.map(|e| e.kind).collect().await;
        assert_eq!(kinds.last(), Some(&EventKind::Completed));
        assert!(kinds.len() <= 2);
    }

    #[tokio::test]
    async fn test_listen_runs_callback() {
        let bus = EventBus::new(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = bus.listen(move |event: QueueEvent<String>| {
            let _ = tx.send(event.kind.name());
        });

        bus.emit(EventKind::Enqueued, &item("a"));
        assert_eq!(rx.recv().await, Some("enqueued"));

        drop(bus);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_affect_publisher() {
        let bus = EventBus::new(8);
        let handle = bus.listen(|_event: QueueEvent<String>| panic!("listener bug"));
        let mut healthy = bus.subscribe();

        bus.emit(EventKind::Enqueued, &item("a"));
        assert!(handle.await.unwrap_err().is_panic());

        bus.emit(EventKind::Completed, &item("b"));
        assert_eq!(healthy.recv().await.unwrap().kind, EventKind::Enqueued);
        assert_eq!(healthy.recv().await.unwrap().kind, EventKind::Completed);
    }
}
