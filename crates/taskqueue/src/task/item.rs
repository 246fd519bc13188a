//! Queued work items

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Executable;

/// Unique identifier of a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generate a new time-ordered identifier
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ItemId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A unit of work owned by the queue from admission until a worker
/// reports its terminal outcome
pub struct QueuedItem<T> {
    id: ItemId,
    payload: Arc<T>,
    executable: Arc<dyn Executable<T>>,
    priority: i32,
    retry_attempts: AtomicU32,
    enqueued_at: DateTime<Utc>,
}

impl<T> QueuedItem<T>
where
    T: Send + Sync + 'static,
{
    /// Create an item with priority 0
    pub fn new<E>(executable: E, payload: T) -> Self
    where
        E: Executable<T> + 'static,
    {
        Self::from_shared(Arc::new(executable), Arc::new(payload))
    }

    /// Create an item from an already shared executable and payload
    pub fn from_shared(executable: Arc<dyn Executable<T>>, payload: Arc<T>) -> Self {
        Self {
            id: ItemId::new(),
            payload,
            executable,
            priority: 0,
            retry_attempts: AtomicU32::new(0),
            enqueued_at: Utc::now(),
        }
    }

    /// Set the priority
    ///
    /// Priority is carried as metadata; dequeue order is strictly FIFO.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn payload(&self) -> &Arc<T> {
        &self.payload
    }

    pub fn executable(&self) -> &Arc<dyn Executable<T>> {
        &self.executable
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Number of retries performed so far (diagnostic only)
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts.load(Ordering::Relaxed)
    }

    pub(crate) fn record_retry(&self) -> u32 {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn mark_enqueued(&mut self) {
        self.enqueued_at = Utc::now();
    }

    /// Cloneable view of the item, as carried by lifecycle events
    pub fn snapshot(&self) -> ItemSnapshot<T> {
        ItemSnapshot {
            id: self.id,
            priority: self.priority,
            retry_attempts: self.retry_attempts(),
            enqueued_at: self.enqueued_at,
            payload: Arc::clone(&self.payload),
        }
    }
}

impl<T> fmt::Debug for QueuedItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedItem")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("retry_attempts", &self.retry_attempts.load(Ordering::Relaxed))
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a queued item
pub struct ItemSnapshot<T> {
    pub id: ItemId,
    pub priority: i32,
    pub retry_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub payload: Arc<T>,
}

// Manual impl: the payload is shared, so `T: Clone` is not required.
impl<T> Clone for ItemSnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            priority: self.priority,
            retry_attempts: self.retry_attempts,
            enqueued_at: self.enqueued_at,
            payload: Arc::clone(&self.payload),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ItemSnapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemSnapshot")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("retry_attempts", &self.retry_attempts)
            .field("enqueued_at", &self.enqueued_at)
            .field("payload", &self.payload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{from_fn, TaskError};

    fn noop_item(payload: &str) -> QueuedItem<String> {
        QueuedItem::new(
            from_fn(|_p: Arc<String>, _c| async { Ok::<(), TaskError>(()) }),
            payload.to_string(),
        )
    }

    #[test]
    fn test_ids_are_unique() {
        let a = ItemId::new();
        let b = ItemId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 7);
    }

    #[test]
    fn test_item_defaults() {
        let item = noop_item("hello");
        assert_eq!(item.priority(), 0);
        assert_eq!(item.retry_attempts(), 0);
        assert_eq!(item.payload().as_str(), "hello");
    }

    #[test]
    fn test_with_priority_is_metadata() {
        let item = noop_item("x").with_priority(7);
        assert_eq!(item.priority(), 7);
    }

    #[test]
    fn test_record_retry_updates_snapshot() {
        let item = noop_item("x");
        assert_eq!(item.record_retry(), 1);
        assert_eq!(item.record_retry(), 2);

        let snapshot = item.snapshot();
        assert_eq!(snapshot.retry_attempts, 2);
        assert_eq!(snapshot.id, item.id());
        assert!(Arc::ptr_eq(&snapshot.payload, item.payload()));
    }

    #[test]
    fn test_mark_enqueued_restamps() {
        let mut item = noop_item("x");
        let created = item.enqueued_at();
        item.mark_enqueued();
        assert!(item.enqueued_at() >= created);
    }
}
