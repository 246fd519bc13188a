//! # Task Queue
//!
//! A bounded, concurrent, in-process task queue for Tokio applications.
//!
//! ## Features
//!
//! - **Admission control**: Submissions beyond `max_queue_size` are rejected immediately
//! - **Bounded parallelism**: At most `max_concurrency` items execute at once
//! - **Automatic retries**: Exponential backoff with jitter, interruptible by cancellation
//! - **Circuit breaker**: Workers stop dequeuing after repeated terminal failures
//! - **Lifecycle events**: Per-pool broadcast of enqueued/started/completed/failed/cancelled
//! - **Pluggable backlog**: Swap the in-process queue for any [`QueuePersistence`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     submit(executable, payload)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  QueueError::Full when at capacity
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              AdmissionQueue / QueuePersistence              │
//! │  (FIFO backlog, bounded in-process, unbounded external)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                           │
//! │  (N worker loops, semaphore, circuit breaker, retries)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         EventBus                            │
//! │  (best-effort lifecycle notifications to subscribers)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use taskqueue::prelude::*;
//!
//! struct SendEmail;
//!
//! #[async_trait::async_trait]
//! impl Executable<String> for SendEmail {
//!     async fn execute(&self, to: Arc<String>, cancel: CancellationToken) -> Result<(), TaskError> {
//!         tokio::select! {
//!             _ = cancel.cancelled() => Err(TaskError::Cancelled),
//!             _ = tokio::time::sleep(Duration::from_millis(5)) => {
//!                 println!("sent to {to}");
//!                 Ok(())
//!             }
//!         }
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let pool = WorkerPool::new(WorkerPoolConfig::new(4, 100))?;
//! let cancel = CancellationToken::new();
//! pool.start(&cancel)?;
//!
//! let email = Arc::new(SendEmail);
//! for to in ["a@example.com", "b@example.com"] {
//!     pool.submit(Arc::clone(&email), to.to_string(), 0).await?;
//! }
//!
//! pool.stop().await;
//! # Ok(())
//! # }
//! ```

mod duration_millis;

pub mod events;
pub mod queue;
pub mod reliability;
pub mod task;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::events::{EventBus, EventKind, QueueEvent};
    pub use crate::queue::{AdmissionQueue, InMemoryPersistence, QueueError, QueuePersistence};
    pub use crate::reliability::{
        CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryError, RetryPolicy,
    };
    pub use crate::task::{from_fn, Executable, ItemId, QueuedItem, TaskError};
    pub use crate::worker::{
        ConfigError, WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus,
    };
    pub use tokio_util::sync::CancellationToken;
}

// Re-export key types at crate root
pub use events::{EventBus, EventKind, QueueEvent};
pub use queue::{AdmissionQueue, InMemoryPersistence, QueueError, QueuePersistence};
pub use reliability::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryAttempt, RetryError, RetryPolicy,
};
pub use task::{Executable, ItemId, ItemSnapshot, QueuedItem, TaskError};
pub use worker::{
    ConfigError, PoolStatsSnapshot, WorkerPool, WorkerPoolConfig, WorkerPoolError,
    WorkerPoolStatus,
};
