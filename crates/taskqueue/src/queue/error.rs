//! Admission errors

use thiserror::Error;

/// Why a submission could not be accepted
#[derive(Debug, Error)]
pub enum QueueError {
    /// The bounded backlog already holds `capacity` items
    #[error("queue is full (capacity {capacity})")]
    Full { capacity: usize },

    /// The persistence backend rejected or failed the operation
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl QueueError {
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}
