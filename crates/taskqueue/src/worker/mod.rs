//! Worker pool for queued items
//!
//! This module provides:
//! - [`WorkerPool`] - Concurrent worker loops over a shared backlog
//! - [`WorkerPoolConfig`] - Pool settings, loadable from the environment
//! - [`PoolStats`] - Lock-free counters of submissions and outcomes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                            │
//! │   submit() ──► ┌──────────────────────────────────────┐     │
//! │                │  Backlog (AdmissionQueue or          │     │
//! │                │  QueuePersistence)                   │     │
//! │                └──────────────────┬───────────────────┘     │
//! │                                   │ dequeue (FIFO)          │
//! │         ┌─────────────────────────┼──────────────────┐      │
//! │         ▼                         ▼                  ▼      │
//! │   ┌───────────┐            ┌───────────┐      ┌───────────┐ │
//! │   │ worker 0  │            │ worker 1  │ ...  │ worker N  │ │
//! │   └─────┬─────┘            └─────┬─────┘      └─────┬─────┘ │
//! │         │   CircuitBreaker gate, Semaphore permit   │       │
//! │         ▼                                           ▼       │
//! │   RetryPolicy ──► Executable::execute ──► EventBus          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod pool;
mod stats;

pub use config::{ConfigError, WorkerPoolConfig, ENV_PREFIX};
pub use pool::{WorkerPool, WorkerPoolError, WorkerPoolStatus};
pub use stats::{PoolStats, PoolStatsSnapshot};
