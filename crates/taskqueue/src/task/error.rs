//! Outcome errors returned by caller-supplied executables

/// Error returned by a single execution attempt of a [`super::Executable`]
///
/// `Cancelled` is kept distinct from ordinary failures: it is never retried
/// and never counts toward the circuit breaker.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The attempt observed the cancellation signal and gave up
    #[error("task was cancelled")]
    Cancelled,

    /// The attempt failed
    #[error("{0}")]
    Failed(#[source] anyhow::Error),

    /// The attempt panicked; the panic was caught by the worker
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Create a failure from a plain message
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Failed(anyhow::Error::msg(message))
    }

    /// Wrap any error as a failure
    pub fn failed(error: impl Into<anyhow::Error>) -> Self {
        Self::Failed(error.into())
    }

    /// Build a failure from a caught panic payload
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }

    /// Whether this error represents cancellation rather than failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        Self::Failed(error)
    }
}
