//! Bounded in-process FIFO

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::QueueError;
use crate::task::QueuedItem;

/// Bounded FIFO of pending items
///
/// Inserts past capacity are rejected immediately; they never block and never
/// evict. Every operation takes the same lock, so each one is linearizable
/// with respect to concurrent producers and workers.
///
/// # Example
///
/// ```
/// use taskqueue::queue::AdmissionQueue;
/// use taskqueue::task::{from_fn, QueuedItem, TaskError};
///
/// let queue = AdmissionQueue::new(1);
/// let job = || from_fn(|_: std::sync::Arc<u8>, _| async { Ok::<(), TaskError>(()) });
///
/// assert!(queue.enqueue(QueuedItem::new(job(), 1)).is_ok());
/// assert!(queue.enqueue(QueuedItem::new(job(), 2)).is_err());
/// ```
pub struct AdmissionQueue<T> {
    items: Mutex<VecDeque<QueuedItem<T>>>,
    capacity: usize,
}

impl<T> AdmissionQueue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Append an item, or reject it when the backlog is full
    pub fn enqueue(&self, item: QueuedItem<T>) -> Result<(), QueueError> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        items.push_back(item);
        Ok(())
    }

    /// Remove and return the oldest item, if any
    pub fn dequeue(&self) -> Option<QueuedItem<T>> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots left before submissions are rejected
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use crate::task::{from_fn, TaskError};

    fn item(n: u32) -> QueuedItem<u32> {
        QueuedItem::new(
            from_fn(|_: Arc<u32>, _| async { Ok::<(), TaskError>(()) }),
            n,
        )
    }

    #[test]
    fn test_rejects_past_capacity() {
        let queue = AdmissionQueue::new(3);
        for n in 0..3 {
            queue.enqueue(item(n)).unwrap();
        }

        let err = queue.enqueue(item(3)).unwrap_err();
        assert!(matches!(err, QueueError::Full { capacity: 3 }));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.remaining(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let queue = AdmissionQueue::new(10);
        for n in 0..5 {
            queue.enqueue(item(n)).unwrap();
        }

        let order: Vec<u32> = std::iter::from_fn(|| queue.dequeue())
            .map(|i| *i.payload().as_ref())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dequeue_empty_returns_none() {
        let queue: AdmissionQueue<u32> = AdmissionQueue::new(1);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_dequeue_frees_a_slot() {
        let queue = AdmissionQueue::new(1);
        queue.enqueue(item(1)).unwrap();
        assert!(queue.enqueue(item(2)).is_err());

        queue.dequeue().unwrap();
        assert!(queue.enqueue(item(3)).is_ok());
    }

    #[test]
    fn test_concurrent_producers_never_exceed_capacity() {
        let queue = Arc::new(AdmissionQueue::new(50));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    (0..25)
                        .filter(|n| queue.enqueue(item(t * 100 + n)).is_ok())
                        .count()
                })
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 50);
        assert_eq!(queue.len(), 50);
    }
}
