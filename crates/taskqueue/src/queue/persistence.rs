//! Pluggable backlog storage

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::QueueError;
use crate::task::QueuedItem;

/// External backlog for a worker pool
///
/// When a pool is built with a persistence backend, every submission and
/// every dequeue goes through it and the pool's `max_queue_size` is not
/// checked. Capacity policy belongs to the backend.
#[async_trait]
pub trait QueuePersistence<T>: Send + Sync {
    /// Store an item at the tail of the backlog
    async fn enqueue(&self, item: QueuedItem<T>) -> Result<(), QueueError>;

    /// Take the item at the head of the backlog, if any
    async fn dequeue(&self) -> Result<Option<QueuedItem<T>>, QueueError>;

    /// Number of items currently stored
    async fn len(&self) -> Result<usize, QueueError>;
}

/// Unbounded in-memory persistence
///
/// This is primarily for testing. It provides the FIFO semantics expected of
/// any backend without durability.
///
/// # Example
///
/// ```
/// use taskqueue::queue::InMemoryPersistence;
///
/// let store: InMemoryPersistence<String> = InMemoryPersistence::new();
/// assert_eq!(store.item_count(), 0);
/// ```
pub struct InMemoryPersistence<T> {
    items: Mutex<VecDeque<QueuedItem<T>>>,
}

impl<T> InMemoryPersistence<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Get the number of stored items without going through the trait
    pub fn item_count(&self) -> usize {
        self.items.lock().len()
    }
}

impl<T> Default for InMemoryPersistence<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> QueuePersistence<T> for InMemoryPersistence<T>
where
    T: Send + Sync + 'static,
{
    async fn enqueue(&self, item: QueuedItem<T>) -> Result<(), QueueError> {
        self.items.lock().push_back(item);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueuedItem<T>>, QueueError> {
        Ok(self.items.lock().pop_front())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.items.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::task::{from_fn, TaskError};

    fn item(n: u32) -> QueuedItem<u32> {
        QueuedItem::new(
            from_fn(|_: Arc<u32>, _| async { Ok::<(), TaskError>(()) }),
            n,
        )
    }

    #[tokio::test]
    async fn test_in_memory_fifo() {
        let store = InMemoryPersistence::new();
        store.enqueue(item(1)).await.unwrap();
        store.enqueue(item(2)).await.unwrap();

        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(**store.dequeue().await.unwrap().unwrap().payload(), 1);
        assert_eq!(**store.dequeue().await.unwrap().unwrap().payload(), 2);
        assert!(store.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_is_unbounded() {
        let store = InMemoryPersistence::new();
        for n in 0..2_000 {
            store.enqueue(item(n)).await.unwrap();
        }
        assert_eq!(store.item_count(), 2_000);
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let store: Arc<dyn QueuePersistence<u32>> = Arc::new(InMemoryPersistence::new());
        store.enqueue(item(9)).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
    }
}
