//! Consecutive-failure circuit breaker

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::info;

use crate::duration_millis;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - items are dequeued
    Closed,

    /// Failure threshold reached - workers hold off until the window ends
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Circuit breaker configuration
///
/// # State Machine
///
/// ```text
/// ┌─────────┐  max_failures reached  ┌─────────┐
/// │ Closed  │ ─────────────────────► │  Open   │
/// └─────────┘                        └─────────┘
///      ▲        open_duration elapsed     │
///      └──────────────────────────────────┘
/// ```
///
/// Elapsing the window does not clear the failure count: only a success
/// does. A failure observed after the window therefore reopens immediately.
///
/// # Example
///
/// ```
/// use taskqueue::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::default()
///     .with_max_failures(3)
///     .with_open_duration(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit
    pub max_failures: u32,

    /// How long the circuit stays open
    #[serde(with = "duration_millis")]
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(max_failures: u32, open_duration: Duration) -> Self {
        Self {
            max_failures,
            open_duration,
        }
    }

    /// Set the failure threshold to open the circuit
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Set how long the circuit stays open
    pub fn with_open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    open_until: Option<Instant>,
}

impl BreakerState {
    fn is_open(&self, now: Instant) -> bool {
        self.open_until.is_some_and(|until| now < until)
    }
}

/// Shared circuit breaker
///
/// Every transition happens under one lock, so concurrent failures can never
/// lose an increment.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether the open window is still running
    pub fn is_open(&self) -> bool {
        self.state.lock().is_open(Instant::now())
    }

    pub fn state(&self) -> CircuitState {
        if self.is_open() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Consecutive failures since the last success
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// End of the most recent open window, if the circuit ever opened
    pub fn open_until(&self) -> Option<Instant> {
        self.state.lock().open_until
    }

    /// Record a success, closing the circuit
    pub fn on_success(&self) {
        let mut state = self.state.lock();
        state.failure_count = 0;
        state.open_until = None;
    }

    /// Record a terminal failure and return the resulting state
    pub fn on_failure(&self) -> CircuitState {
        let mut state = self.state.lock();
        state.failure_count = state.failure_count.saturating_add(1);

        if state.failure_count < self.config.max_failures {
            return CircuitState::Closed;
        }

        let now = Instant::now();
        let was_open = state.is_open(now);
        state.open_until = Some(
            now.checked_add(self.config.open_duration)
                .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365)),
        );

        if !state.is_open(now) {
            return CircuitState::Closed;
        }
        if !was_open {
            info!(
                failure_count = state.failure_count,
                open_ms = self.config.open_duration.as_millis() as u64,
                "circuit breaker opened"
            );
        }
        CircuitState::Open
    }

    /// Forget all failures and close the circuit
    pub fn reset(&self) {
        self.on_success();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a capturing subscriber and count "opened" log lines
    fn count_opened_logs(f: impl FnOnce()) -> usize {
        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);

        let output = String::from_utf8_lossy(&capture.0.lock()).into_owned();
        output.matches("circuit breaker opened").count()
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.max_failures, 5);
        assert_eq!(config.open_duration, Duration::from_secs(30));
    }

    #[test]
    fn test_config_builder() {
        let config = CircuitBreakerConfig::default()
            .with_max_failures(10)
            .with_open_duration(Duration::from_secs(60));

        assert_eq!(config.max_failures, 10);
        assert_eq!(config.open_duration, Duration::from_secs(60));
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
    }

    #[test]
    fn test_serialization() {
        let config = CircuitBreakerConfig::new(2, Duration::from_millis(1500));
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"max_failures":2,"open_duration":1500}"#);

        let parsed: CircuitBreakerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_max_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(5)));

        assert_eq!(breaker.on_failure(), CircuitState::Closed);
        assert_eq!(breaker.on_failure(), CircuitState::Closed);
        assert!(!breaker.is_open());

        assert_eq!(breaker.on_failure(), CircuitState::Open);
        assert!(breaker.is_open());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_when_window_elapses() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_secs(5)));
        breaker.on_failure();
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_millis(4_999)).await;
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!breaker.is_open());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_window_reopens() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(1)));
        breaker.on_failure();
        breaker.on_failure();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!breaker.is_open());

        assert_eq!(breaker.on_failure(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(30)));
        breaker.on_failure();
        breaker.on_failure();
        assert!(breaker.is_open());

        breaker.on_success();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.open_until().is_none());

        assert_eq!(breaker.on_failure(), CircuitState::Closed);
    }

    #[test]
    fn test_zero_max_failures_opens_on_first_failure() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(0, Duration::from_secs(30)));
        assert!(!breaker.is_open());
        assert_eq!(breaker.on_failure(), CircuitState::Open);
    }

    #[test]
    fn test_zero_open_duration_never_blocks() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::ZERO));
        assert_eq!(breaker.on_failure(), CircuitState::Closed);
        assert!(!breaker.is_open());
        assert!(breaker.open_until().is_some());
    }

    #[test]
    fn test_logs_only_when_circuit_opens() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(30)));
        let logged = count_opened_logs(|| {
            for _ in 0..5 {
                breaker.on_failure();
            }
        });
        assert!(breaker.is_open());
        assert_eq!(logged, 1);
    }

    #[test]
    fn test_zero_open_duration_never_logs_opened() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::ZERO));
        let logged = count_opened_logs(|| {
            for _ in 0..3 {
                assert_eq!(breaker.on_failure(), CircuitState::Closed);
            }
        });
        assert_eq!(logged, 0);
    }

    #[test]
    fn test_reset() {
        let breaker = CircuitBreaker::default();
        for _ in 0..5 {
            breaker.on_failure();
        }
        assert!(breaker.is_open());

        breaker.reset();
        assert_eq!(breaker.failure_count(), 0);
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_concurrent_failures_are_all_counted() {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::new(
            1_000,
            Duration::from_secs(1),
        )));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        breaker.on_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(breaker.failure_count(), 400);
    }
}
