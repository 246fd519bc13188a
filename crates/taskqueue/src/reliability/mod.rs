//! Reliability patterns for queued work
//!
//! This module provides:
//! - [`RetryPolicy`] - Exponential backoff with jitter and cancellation
//! - [`CircuitBreaker`] - Consecutive-failure breaker shared by all workers

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{RetryAttempt, RetryError, RetryPolicy};
