//! Bounded pool of asynchronous workers forwarding requests to the backend.
//!
//! [`BoundedDispatcher`] owns `num_workers` worker tasks that all pull from
//! one bounded MPSC queue. Submitting never waits: when the queue is full the
//! caller gets [`DispatchError::Overloaded`] immediately, so sustained overload
//! turns into fast 503s instead of unbounded memory growth.
//!
//! Waiting on a [`DispatchHandle`] with a timeout *abandons* the wait but not
//! the work. The task keeps its worker slot until the backend answers (bounded
//! by the proxy timeout), and its result is discarded. Nothing is cancelled on
//! the backend either.

use crate::server::{
    pool::{
        request::{TaskResult, WorkRequest},
        worker::worker_loop,
    },
    proxy::{BackendReply, Forward, ForwardRequest, ProxyError},
};
use core::time::Duration;
use portable_atomic::{AtomicUsize, Ordering};
use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// Receiving side of the work queue, shared by every worker.
pub type SharedQueue = Arc<Mutex<mpsc::Receiver<WorkRequest>>>;

/// Why a dispatch did not produce a backend reply.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The queue is full.
    #[error("dispatch queue is full")]
    Overloaded,

    /// The caller's wait elapsed. The task itself is still running.
    #[error("timed out waiting for the dispatched task")]
    TimedOut,

    /// The dispatcher is shutting down and refuses new work.
    #[error("dispatcher is shutting down")]
    ServiceShutdown,

    /// The task ran and the forward failed.
    #[error(transparent)]
    Forward(#[from] ProxyError),
}

impl From<DispatchError> for numclaim_core::Error {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Overloaded => Self::Overloaded,
            DispatchError::TimedOut => Self::DownstreamTimeout,
            DispatchError::ServiceShutdown => Self::ServiceShutdown,
            DispatchError::Forward(e) => e.into(),
        }
    }
}

/// Live counters maintained by the dispatcher and its workers.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub(crate) queued: AtomicUsize,
    pub(crate) active: AtomicUsize,
    pub(crate) completed: AtomicUsize,
    pub(crate) abandoned: AtomicUsize,
}

impl PoolStats {
    fn pending(&self) -> usize {
        self.queued.load(Ordering::Relaxed) + self.active.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the pool, reported under `thread_pool` by `/health`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub queued_tasks: usize,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub abandoned_tasks: usize,
}

/// Sizing and shutdown behaviour of a [`BoundedDispatcher`].
#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    pub num_workers: usize,
    pub queue_capacity: usize,
    pub shutdown_timeout: Duration,
}

/// Caller's side of one submitted task.
#[derive(Debug)]
pub struct DispatchHandle {
    rx: oneshot::Receiver<TaskResult>,
}

impl DispatchHandle {
    /// Waits up to `wait` for the task's result.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::TimedOut`] if `wait` elapses first. Dropping the
    ///   handle here is what abandons the task.
    /// - [`DispatchError::Forward`] if the forward itself failed.
    pub async fn wait(self, wait: Duration) -> Result<BackendReply, DispatchError> {
        match timeout(wait, self.rx).await {
            Ok(Ok(result)) => result.map_err(DispatchError::from),
            Ok(Err(_)) => Err(DispatchError::Forward(ProxyError::Internal {
                context: "worker dropped the task without a result".to_string(),
            })),
            Err(_) => Err(DispatchError::TimedOut),
        }
    }
}

/// Fixed-size worker pool with a bounded FIFO queue.
pub struct BoundedDispatcher {
    queue: mpsc::Sender<WorkRequest>,
    config: DispatcherConfig,
    stats: Arc<PoolStats>,
    shutdown_token: CancellationToken,
}

impl BoundedDispatcher {
    /// Spawns `config.num_workers` worker tasks on the current Tokio runtime,
    /// all sharing `forwarder`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, or if `num_workers` or
    /// `queue_capacity` is zero (the server config rejects both).
    pub fn spawn<F: Forward>(forwarder: Arc<F>, config: DispatcherConfig) -> Self {
        assert!(config.num_workers > 0, "a dispatcher needs at least one worker");

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let queue: SharedQueue = Arc::new(Mutex::new(rx));
        let stats = Arc::new(PoolStats::default());

        for worker_id in 0..config.num_workers {
            tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&queue),
                Arc::clone(&forwarder),
                Arc::clone(&stats),
            ));
        }

        Self {
            queue: tx,
            config,
            stats,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Enqueues `request` without waiting.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::ServiceShutdown`] once [`shutdown`](Self::shutdown)
    ///   has started.
    /// - [`DispatchError::Overloaded`] if the queue is full.
    pub fn submit(&self, request: ForwardRequest) -> Result<DispatchHandle, DispatchError> {
        if self.shutdown_token.is_cancelled() {
            return Err(DispatchError::ServiceShutdown);
        }

        let (reply, rx) = oneshot::channel();
        // Count before sending so a fast worker never decrements below zero.
        self.stats.queued.fetch_add(1, Ordering::Relaxed);

        match self.queue.try_send(WorkRequest::Forward { request, reply }) {
            Ok(()) => Ok(DispatchHandle { rx }),
            Err(e) => {
                self.stats.queued.fetch_sub(1, Ordering::Relaxed);
                match e {
                    mpsc::error::TrySendError::Full(_) => Err(DispatchError::Overloaded),
                    mpsc::error::TrySendError::Closed(_) => Err(DispatchError::ServiceShutdown),
                }
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            max_workers: self.config.num_workers,
            queue_capacity: self.config.queue_capacity,
            queued_tasks: self.stats.queued.load(Ordering::Relaxed),
            active_tasks: self.stats.active.load(Ordering::Relaxed),
            completed_tasks: self.stats.completed.load(Ordering::Relaxed),
            abandoned_tasks: self.stats.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Cancels the shared [`CancellationToken`] so `submit` refuses new work.
    /// - Waits up to `shutdown_timeout` for queued and running tasks to finish.
    /// - Sends a [`WorkRequest::Shutdown`] to each worker and waits (up to
    ///   `shutdown_timeout` per worker) for the acknowledgements.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new requests ===
        tracing::info!("Refusing new dispatches");
        self.shutdown_token.cancel();

        // === Phase 1: Let queued and in-flight tasks drain ===
        tracing::info!("Draining {} pending tasks", self.stats.pending());
        let drain_result = timeout(self.config.shutdown_timeout, async {
            while self.stats.pending() > 0 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => tracing::debug!("All pending tasks drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} tasks still pending)",
                self.stats.pending()
            ),
        }

        // === Phase 2: Notify workers to shut down ===
        tracing::debug!("Notifying all workers to shut down");
        let mut shutdown_handles = Vec::with_capacity(self.config.num_workers);

        for i in 0..self.config.num_workers {
            let (tx, rx) = oneshot::channel();
            let send = self.queue.send(WorkRequest::Shutdown { response: tx });
            match timeout(self.config.shutdown_timeout, send).await {
                Ok(Ok(())) => shutdown_handles.push((i, rx)),
                Ok(Err(e)) => tracing::error!("Failed to send shutdown to worker {i}: {e}"),
                Err(_) => tracing::warn!("Queue still full, could not notify worker {i}"),
            }
        }

        let shutdown_timeout = self.config.shutdown_timeout;
        let acks = shutdown_handles.into_iter().map(|(i, rx)| async move {
            match timeout(shutdown_timeout, rx).await {
                Ok(Ok(())) => tracing::trace!("Shutdown acknowledgement {i} received"),
                Ok(Err(e)) => tracing::error!("Shutdown acknowledgement {i} failed: {e}"),
                Err(_) => tracing::warn!("Shutdown acknowledgement {i} timed out"),
            }
        });

        futures::future::join_all(acks).await;

        tracing::info!("Worker pool shutdown complete");
    }
}
