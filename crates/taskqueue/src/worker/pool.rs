//! Worker pool for queued items
//!
//! Runs `max_concurrency` worker loops over one shared backlog, with a
//! semaphore bounding execution and a circuit breaker gating dequeues.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::config::{ConfigError, WorkerPoolConfig};
use super::stats::{PoolStats, PoolStatsSnapshot};
use crate::events::{EventBus, EventKind, QueueEvent};
use crate::queue::{AdmissionQueue, QueueError, QueuePersistence};
use crate::reliability::{CircuitBreaker, RetryError, RetryPolicy};
use crate::task::{Executable, ItemId, QueuedItem, TaskError};

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// No worker loops are running
    Stopped,
    /// Worker loops are consuming the backlog
    Running,
    /// Cancellation was requested and the loops are winding down
    Draining,
}

impl fmt::Display for WorkerPoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
        }
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// `start` was called outside a Tokio runtime
    #[error("worker pool must be started from within a Tokio runtime")]
    NoRuntime,
}

/// Where pending items live
enum Backlog<T> {
    InProcess(AdmissionQueue<T>),
    External(Arc<dyn QueuePersistence<T>>),
}

impl<T> Backlog<T>
where
    T: Send + Sync + 'static,
{
    async fn push(&self, item: QueuedItem<T>) -> Result<(), QueueError> {
        match self {
            Self::InProcess(queue) => queue.enqueue(item),
            Self::External(store) => store.enqueue(item).await,
        }
    }

    async fn pop(&self) -> Result<Option<QueuedItem<T>>, QueueError> {
        match self {
            Self::InProcess(queue) => Ok(queue.dequeue()),
            Self::External(store) => store.dequeue().await,
        }
    }

    async fn len(&self) -> Result<usize, QueueError> {
        match self {
            Self::InProcess(queue) => Ok(queue.len()),
            Self::External(store) => store.len().await,
        }
    }
}

/// State shared by the pool handle and every worker loop
struct Shared<T> {
    config: WorkerPoolConfig,
    backlog: Backlog<T>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    events: EventBus<T>,
    stats: PoolStats,
}

struct Lifecycle {
    status: WorkerPoolStatus,
    stop: Option<CancellationToken>,
    workers: JoinSet<()>,
}

/// Bounded, concurrent processor of queued items
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use taskqueue::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let pool = WorkerPool::new(WorkerPoolConfig::new(2, 100))?;
/// let mut events = pool.subscribe();
///
/// let cancel = CancellationToken::new();
/// pool.start(&cancel)?;
///
/// let greet = from_fn(|name: Arc<String>, _cancel| async move {
///     println!("hello, {name}");
///     Ok::<_, TaskError>(())
/// });
/// pool.submit(greet, "world".to_string(), 0).await?;
///
/// while !events.recv().await?.kind.is_terminal() {}
/// pool.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct WorkerPool<T> {
    shared: Arc<Shared<T>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<T> WorkerPool<T>
where
    T: Send + Sync + 'static,
{
    /// Create a pool backed by the bounded in-process queue
    pub fn new(config: WorkerPoolConfig) -> Result<Self, ConfigError> {
        let backlog = Backlog::InProcess(AdmissionQueue::new(config.max_queue_size));
        Self::build(config, backlog)
    }

    /// Create a pool whose backlog lives in `persistence`
    ///
    /// `max_queue_size` is not enforced in this mode: capacity policy belongs
    /// to the backend.
    pub fn with_persistence(
        config: WorkerPoolConfig,
        persistence: Arc<dyn QueuePersistence<T>>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, Backlog::External(persistence))
    }

    fn build(config: WorkerPoolConfig, backlog: Backlog<T>) -> Result<Self, ConfigError> {
        config.validate()?;

        let shared = Shared {
            breaker: CircuitBreaker::new(config.circuit_breaker()),
            retry: config.retry_policy(),
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            events: EventBus::new(config.event_capacity),
            stats: PoolStats::new(),
            backlog,
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
            lifecycle: Mutex::new(Lifecycle {
                status: WorkerPoolStatus::Stopped,
                stop: None,
                workers: JoinSet::new(),
            }),
        })
    }

    /// Start the worker loops
    ///
    /// The loops stop when `cancel` fires or when [`stop`](Self::stop) runs.
    /// Calling `start` on a running pool does nothing. Once the previous
    /// caller token has fired, `start` spawns a fresh set of loops.
    #[instrument(skip(self, cancel), fields(max_concurrency = self.shared.config.max_concurrency))]
    pub fn start(&self, cancel: &CancellationToken) -> Result<(), WorkerPoolError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| WorkerPoolError::NoRuntime)?;

        let mut lifecycle = self.lifecycle.lock();
        let status = lifecycle.status;
        match status {
            WorkerPoolStatus::Running
                if lifecycle.stop.as_ref().is_some_and(|stop| stop.is_cancelled()) =>
            {
                // Loops of the cancelled run stay in the set until stop drains them
                reap(&mut lifecycle.workers);
                info!(
                    exiting_workers = lifecycle.workers.len(),
                    "Previous run was cancelled by the caller, restarting"
                );
            }
            WorkerPoolStatus::Running => {
                debug!("Worker pool already running");
                return Ok(());
            }
            WorkerPoolStatus::Draining => {
                warn!("Worker pool is draining, start ignored");
                return Ok(());
            }
            WorkerPoolStatus::Stopped => {}
        }

        let stop = cancel.child_token();
        for worker in 0..self.shared.config.max_concurrency {
            let shared = Arc::clone(&self.shared);
            lifecycle
                .workers
                .spawn_on(run_worker(worker, shared, stop.clone()), &runtime);
        }
        lifecycle.stop = Some(stop);
        lifecycle.status = WorkerPoolStatus::Running;

        info!(
            max_concurrency = self.shared.config.max_concurrency,
            max_queue_size = self.shared.config.max_queue_size,
            retry_count = self.shared.config.retry_count,
            "Worker pool started"
        );
        Ok(())
    }

    /// Stop the worker loops and wait for them to exit
    ///
    /// In-flight items observe cancellation cooperatively. With a
    /// `shutdown_timeout`, loops still running when it elapses are aborted.
    /// Calling `stop` on a stopped pool does nothing.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let (mut shutdown, stop) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.status != WorkerPoolStatus::Running {
                return;
            }
            lifecycle.status = WorkerPoolStatus::Draining;
            let workers = std::mem::take(&mut lifecycle.workers);
            let stop = lifecycle.stop.take();
            (
                Shutdown {
                    lifecycle: &self.lifecycle,
                    workers,
                },
                stop,
            )
        };

        info!(workers = shutdown.workers.len(), "Initiating graceful shutdown");
        if let Some(stop) = stop {
            stop.cancel();
        }

        let workers = &mut shutdown.workers;
        let drained = match self.shared.config.shutdown_timeout {
            Some(timeout) => tokio::time::timeout(timeout, drain(workers))
                .await
                .is_ok(),
            None => {
                drain(workers).await;
                true
            }
        };

        if !drained {
            warn!(
                remaining_workers = workers.len(),
                "Shutdown timeout reached, aborting workers"
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }

        drop(shutdown);
        info!("Worker pool stopped");
    }

    /// Admit an item built from `executable` and `payload`
    pub async fn submit<E>(&self, executable: E, payload: T, priority: i32) -> Result<ItemId, QueueError>
    where
        E: Executable<T> + 'static,
    {
        self.submit_item(QueuedItem::new(executable, payload).with_priority(priority))
            .await
    }

    /// Admit a prepared item
    ///
    /// Fails with [`QueueError::Full`] when the in-process backlog is at
    /// capacity; the item is dropped and nothing is retried.
    pub async fn submit_item(&self, mut item: QueuedItem<T>) -> Result<ItemId, QueueError> {
        item.mark_enqueued();
        let item_id = item.id();
        let snapshot = (self.shared.events.subscriber_count() > 0).then(|| item.snapshot());

        match self.shared.backlog.push(item).await {
            Ok(()) => {
                self.shared.stats.record_submitted();
                debug!(%item_id, "Item enqueued");
                if let Some(snapshot) = snapshot {
                    self.shared
                        .events
                        .publish(QueueEvent::new(EventKind::Enqueued, snapshot));
                }
                Ok(item_id)
            }
            Err(err) => {
                if err.is_full() {
                    self.shared.stats.record_rejected();
                    debug!(%item_id, error = %err, "Item rejected");
                } else {
                    error!(%item_id, error = %err, "Failed to store item");
                }
                Err(err)
            }
        }
    }

    /// Get current status
    pub fn status(&self) -> WorkerPoolStatus {
        let lifecycle = self.lifecycle.lock();
        match (&lifecycle.status, &lifecycle.stop) {
            (WorkerPoolStatus::Running, Some(stop)) if stop.is_cancelled() => {
                WorkerPoolStatus::Draining
            }
            (status, _) => *status,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status() == WorkerPoolStatus::Running
    }

    /// Number of items waiting in the backlog
    pub async fn pending(&self) -> Result<usize, QueueError> {
        self.shared.backlog.len().await
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.shared.breaker
    }

    /// Lifecycle events of this pool
    pub fn events(&self) -> &EventBus<T> {
        &self.shared.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent<T>> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.shared.config
    }
}

impl<T> fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.shared.config)
            .field("status", &self.lifecycle.lock().status)
            .finish_non_exhaustive()
    }
}

/// Marks the pool stopped when `stop` finishes or its future is dropped
struct Shutdown<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
    workers: JoinSet<()>,
}

impl Drop for Shutdown<'_> {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            warn!(
                remaining_workers = self.workers.len(),
                "Shutdown interrupted, aborting workers"
            );
            self.workers.abort_all();
        }
        self.lifecycle.lock().status = WorkerPoolStatus::Stopped;
    }
}

/// Collect loops that already exited without waiting on the rest
fn reap(workers: &mut JoinSet<()>) {
    while let Some(result) = workers.try_join_next() {
        log_exit(result);
    }
}

fn log_exit(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            error!(error = %err, "Worker loop panicked");
        }
    }
}

async fn drain(workers: &mut JoinSet<()>) {
    while let Some(result) = workers.join_next().await {
        log_exit(result);
    }
}

/// Sleep for `period`; returns true if cancelled first
async fn wait(cancel: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(period) => false,
    }
}

async fn run_worker<T>(worker: usize, shared: Arc<Shared<T>>, cancel: CancellationToken)
where
    T: Send + Sync + 'static,
{
    debug!(worker, "Worker started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if shared.breaker.is_open() {
            if wait(&cancel, shared.config.circuit_open_poll_interval).await {
                break;
            }
            continue;
        }

        let item = match shared.backlog.pop().await {
            Ok(Some(item)) => item,
            Ok(None) => {
                if wait(&cancel, shared.config.empty_poll_interval).await {
                    break;
                }
                continue;
            }
            Err(err) => {
                error!(worker, error = %err, "Failed to read backlog");
                if wait(&cancel, shared.config.circuit_open_poll_interval).await {
                    break;
                }
                continue;
            }
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&shared.permits).acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            shared.finish_cancelled(worker, &item);
            break;
        };

        shared.process(worker, item, permit, &cancel).await;
    }

    debug!(worker, "Worker stopped");
}

/// Keeps the execution count in step with the permit it holds
struct Executing<'a> {
    stats: &'a PoolStats,
    _permit: OwnedSemaphorePermit,
}

impl<'a> Executing<'a> {
    fn new(stats: &'a PoolStats, permit: OwnedSemaphorePermit) -> Self {
        stats.task_started();
        Self {
            stats,
            _permit: permit,
        }
    }
}

impl Drop for Executing<'_> {
    fn drop(&mut self) {
        self.stats.task_finished();
    }
}

impl<T> Shared<T>
where
    T: Send + Sync + 'static,
{
    async fn process(
        &self,
        worker: usize,
        item: QueuedItem<T>,
        permit: OwnedSemaphorePermit,
        cancel: &CancellationToken,
    ) {
        let _executing = Executing::new(&self.stats, permit);
        let item_id = item.id();

        debug!(worker, %item_id, priority = item.priority(), "Item started");
        self.events.emit(EventKind::Started, &item);

        let outcome = self
            .retry
            .execute_with(
                cancel,
                |attempt| run_attempt(&item, cancel, attempt),
                |retry| {
                    item.record_retry();
                    self.stats.record_retry();
                    warn!(
                        worker,
                        %item_id,
                        attempt = retry.retry,
                        delay_ms = retry.delay.as_millis() as u64,
                        error = %retry.error,
                        "Attempt failed, retrying"
                    );
                    self.events.emit(
                        EventKind::Retrying {
                            attempt: retry.retry,
                            delay: retry.delay,
                            error: retry.error.to_string(),
                        },
                        &item,
                    );
                },
            )
            .await;

        match outcome {
            Ok(()) => {
                self.breaker.on_success();
                self.stats.record_completed();
                debug!(worker, %item_id, "Item completed");
                self.events.emit(EventKind::Completed, &item);
            }
            Err(RetryError::Cancelled { attempts }) => {
                debug!(worker, %item_id, attempts, "Item cancelled");
                self.finish_cancelled(worker, &item);
            }
            Err(RetryError::Exhausted { attempts, source }) => {
                let circuit = self.breaker.on_failure();
                self.stats.record_failed();
                warn!(
                    worker,
                    %item_id,
                    attempts,
                    error = %source,
                    %circuit,
                    "Item failed"
                );
                self.events.emit(
                    EventKind::Failed {
                        error: source.to_string(),
                    },
                    &item,
                );
            }
        }
    }

    fn finish_cancelled(&self, worker: usize, item: &QueuedItem<T>) {
        self.stats.record_cancelled();
        debug!(worker, item_id = %item.id(), "Item reported cancelled");
        self.events.emit(EventKind::Cancelled, item);
    }
}

/// One invocation of the item's executable, with panics turned into errors
async fn run_attempt<T>(
    item: &QueuedItem<T>,
    cancel: &CancellationToken,
    attempt: u32,
) -> Result<(), TaskError>
where
    T: Send + Sync + 'static,
{
    let execution = async {
        item.executable()
            .execute(Arc::clone(item.payload()), cancel.clone())
            .await
    };

    match AssertUnwindSafe(execution).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let err = TaskError::from_panic(panic);
            error!(item_id = %item.id(), attempt, error = %err, "Executable panicked");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::from_fn;

    fn ok_job() -> impl Executable<u32> {
        from_fn(|_: Arc<u32>, _| async { Ok::<(), TaskError>(()) })
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = WorkerPool::<u32>::new(WorkerPoolConfig::new(0, 1)).unwrap_err();
        assert_eq!(err, ConfigError::ZeroConcurrency);
    }

    #[test]
    fn test_start_outside_runtime() {
        let pool = WorkerPool::<u32>::new(WorkerPoolConfig::new(1, 1)).unwrap();
        let err = pool.start(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, WorkerPoolError::NoRuntime));
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(WorkerPoolStatus::Running.to_string(), "running");
        assert_eq!(WorkerPoolStatus::Draining.to_string(), "draining");
    }

    #[tokio::test]
    async fn test_caller_cancellation_reports_draining() {
        let pool = WorkerPool::<u32>::new(WorkerPoolConfig::new(2, 4)).unwrap();
        let cancel = CancellationToken::new();
        pool.start(&cancel).unwrap();
        assert_eq!(pool.status(), WorkerPoolStatus::Running);

        cancel.cancel();
        assert_eq!(pool.status(), WorkerPoolStatus::Draining);

        pool.stop().await;
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(1, 4)).unwrap();
        let cancel = CancellationToken::new();

        pool.start(&cancel).unwrap();
        pool.stop().await;
        pool.start(&cancel).unwrap();
        assert!(pool.is_running());

        pool.submit(ok_job(), 1, 0).await.unwrap();
        pool.stop().await;
        assert!(!pool.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_counts_backlog() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(1, 10)).unwrap();
        for n in 0..3 {
            pool.submit(ok_job(), n, 0).await.unwrap();
        }
        assert_eq!(pool.pending().await.unwrap(), 3);
        assert_eq!(pool.stats().submitted, 3);
    }
}
