//! Worker pool configuration

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration_millis;
use crate::reliability::{CircuitBreakerConfig, RetryPolicy};

/// Prefix shared by every environment variable read by [`WorkerPoolConfig::from_env`]
pub const ENV_PREFIX: &str = "TASKQUEUE_";

/// Invalid configuration, reported before any worker starts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_concurrency must be greater than zero")]
    ZeroConcurrency,

    #[error("max_queue_size must be greater than zero")]
    ZeroQueueSize,

    #[error("event_capacity must be greater than zero")]
    ZeroEventCapacity,

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker loops, and the permit capacity
    pub max_concurrency: usize,

    /// Items held by the in-process queue before submissions are rejected
    pub max_queue_size: usize,

    /// Retries after the first attempt of every item
    pub retry_count: u32,

    /// Delay before the first retry; doubles on each further retry
    #[serde(with = "duration_millis")]
    pub retry_base_delay: Duration,

    /// Upper bound of the random delay added to each backoff
    #[serde(with = "duration_millis")]
    pub retry_max_jitter: Duration,

    /// Consecutive terminal failures that open the circuit
    pub circuit_breaker_max_failures: u32,

    /// How long the circuit stays open
    #[serde(with = "duration_millis")]
    pub circuit_breaker_open_duration: Duration,

    /// Worker sleep while the circuit is open
    #[serde(with = "duration_millis")]
    pub circuit_open_poll_interval: Duration,

    /// Worker sleep when the backlog is empty
    #[serde(with = "duration_millis")]
    pub empty_poll_interval: Duration,

    /// Bound on `stop()`; `None` waits for every worker to finish
    #[serde(default, with = "duration_millis::option")]
    pub shutdown_timeout: Option<Duration>,

    /// Events buffered per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_queue_size: 1000,
            retry_count: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_jitter: Duration::from_millis(100),
            circuit_breaker_max_failures: 5,
            circuit_breaker_open_duration: Duration::from_secs(30),
            circuit_open_poll_interval: Duration::from_secs(1),
            empty_poll_interval: Duration::from_millis(100),
            shutdown_timeout: None,
            event_capacity: 1024,
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with the given concurrency and backlog bound
    pub fn new(max_concurrency: usize, max_queue_size: usize) -> Self {
        Self {
            max_concurrency,
            max_queue_size,
            ..Default::default()
        }
    }

    /// Set maximum concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Set the backlog bound
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the number of retries per item
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set the base retry delay
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Set the retry jitter bound
    pub fn with_retry_max_jitter(mut self, jitter: Duration) -> Self {
        self.retry_max_jitter = jitter;
        self
    }

    /// Set the circuit breaker threshold
    pub fn with_circuit_breaker_max_failures(mut self, max: u32) -> Self {
        self.circuit_breaker_max_failures = max;
        self
    }

    /// Set how long the circuit stays open
    pub fn with_circuit_breaker_open_duration(mut self, duration: Duration) -> Self {
        self.circuit_breaker_open_duration = duration;
        self
    }

    /// Set the worker sleep while the circuit is open
    pub fn with_circuit_open_poll_interval(mut self, interval: Duration) -> Self {
        self.circuit_open_poll_interval = interval;
        self
    }

    /// Set the worker sleep on an empty backlog
    pub fn with_empty_poll_interval(mut self, interval: Duration) -> Self {
        self.empty_poll_interval = interval;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Set the per-subscriber event buffer
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Retry policy derived from the retry settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count, self.retry_base_delay)
            .with_max_jitter(self.retry_max_jitter)
    }

    /// Circuit breaker settings
    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(
            self.circuit_breaker_max_failures,
            self.circuit_breaker_open_duration,
        )
    }

    /// Reject values the pool cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        Ok(())
    }

    /// Load configuration from `TASKQUEUE_*` environment variables
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        env.read("MAX_CONCURRENCY", &mut config.max_concurrency)?;
        env.read("MAX_QUEUE_SIZE", &mut config.max_queue_size)?;
        env.read("RETRY_COUNT", &mut config.retry_count)?;
        env.read_millis("RETRY_BASE_DELAY_MS", &mut config.retry_base_delay)?;
        env.read_millis("RETRY_MAX_JITTER_MS", &mut config.retry_max_jitter)?;
        env.read(
            "CIRCUIT_BREAKER_MAX_FAILURES",
            &mut config.circuit_breaker_max_failures,
        )?;
        env.read_millis(
            "CIRCUIT_BREAKER_OPEN_DURATION_MS",
            &mut config.circuit_breaker_open_duration,
        )?;
        env.read_millis("CIRCUIT_OPEN_POLL_MS", &mut config.circuit_open_poll_interval)?;
        env.read_millis("EMPTY_POLL_MS", &mut config.empty_poll_interval)?;
        if let Some(ms) = env.parse::<u64>("SHUTDOWN_TIMEOUT_MS")? {
            config.shutdown_timeout = Some(Duration::from_millis(ms));
        }
        env.read("EVENT_CAPACITY", &mut config.event_capacity)?;

        Ok(config)
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<V: FromStr>(&self, name: &str) -> Result<Option<V>, ConfigError> {
        let key = format!("{ENV_PREFIX}{name}");
        match (self.lookup)(&key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        }
    }

    fn read<V: FromStr>(&self, name: &str, target: &mut V) -> Result<(), ConfigError> {
        if let Some(value) = self.parse(name)? {
            *target = value;
        }
        Ok(())
    }

    fn read_millis(&self, name: &str, target: &mut Duration) -> Result<(), ConfigError> {
        if let Some(ms) = self.parse::<u64>(name)? {
            *target = Duration::from_millis(ms);
        }
        Ok(())
    }
}
