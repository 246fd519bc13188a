//! Pending-item storage
//!
//! - [`AdmissionQueue`] - Bounded FIFO used by default
//! - [`QueuePersistence`] - Trait for an external backlog
//! - [`InMemoryPersistence`] - Unbounded reference backend

mod admission;
mod error;
mod persistence;

pub use admission::AdmissionQueue;
pub use error::QueueError;
pub use persistence::{InMemoryPersistence, QueuePersistence};
