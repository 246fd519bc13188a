//! The single capability every queued item carries

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::TaskError;

/// Caller-defined unit of work
///
/// The worker invokes `execute` once per attempt. Cancellation is
/// cooperative: implementations should watch `cancel` and return
/// [`TaskError::Cancelled`] promptly once it fires.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use taskqueue::{Executable, TaskError};
/// use tokio_util::sync::CancellationToken;
///
/// struct SendEmail;
///
/// #[async_trait::async_trait]
/// impl Executable<String> for SendEmail {
///     async fn execute(&self, to: Arc<String>, cancel: CancellationToken) -> Result<(), TaskError> {
///         tokio::select! {
///             _ = cancel.cancelled() => Err(TaskError::Cancelled),
///             _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {
///                 println!("sent to {to}");
///                 Ok(())
///             }
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Executable<T>: Send + Sync {
    /// Run one attempt against the payload
    async fn execute(&self, payload: Arc<T>, cancel: CancellationToken) -> Result<(), TaskError>;
}

#[async_trait]
impl<T, E> Executable<T> for Arc<E>
where
    T: Send + Sync + 'static,
    E: Executable<T> + ?Sized,
{
    async fn execute(&self, payload: Arc<T>, cancel: CancellationToken) -> Result<(), TaskError> {
        (**self).execute(payload, cancel).await
    }
}

/// Executable backed by a closure, see [`from_fn`]
pub struct FnExecutable<T, F> {
    f: F,
    _payload: PhantomData<fn(Arc<T>)>,
}

/// Build an executable from an async closure
///
/// ```
/// use taskqueue::task::from_fn;
/// use taskqueue::TaskError;
///
/// let job = from_fn(|n: std::sync::Arc<u32>, _cancel| async move {
///     if *n % 2 == 0 { Ok(()) } else { Err(TaskError::msg("odd")) }
/// });
/// # let _ = job;
/// ```
pub fn from_fn<T, F, Fut>(f: F) -> FnExecutable<T, F>
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    FnExecutable {
        f,
        _payload: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> Executable<T> for FnExecutable<T, F>
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    async fn execute(&self, payload: Arc<T>, cancel: CancellationToken) -> Result<(), TaskError> {
        (self.f)(payload, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Executable<u32> for Counter {
        async fn execute(&self, _payload: Arc<u32>, _cancel: CancellationToken) -> Result<(), TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_from_fn_executes_closure() {
        let job = from_fn(|n: Arc<u32>, _cancel| async move {
            if *n > 10 {
                Err(TaskError::msg("too large"))
            } else {
                Ok(())
            }
        });

        assert!(job.execute(Arc::new(3), CancellationToken::new()).await.is_ok());
        assert!(job.execute(Arc::new(30), CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_shared_executable_through_arc() {
        let counter = Arc::new(Counter {
            calls: AtomicUsize::new(0),
        });
        let shared: Arc<dyn Executable<u32>> = counter.clone();

        shared.execute(Arc::new(1), CancellationToken::new()).await.unwrap();
        Arc::clone(&counter)
            .execute(Arc::new(2), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
    }
}
