use crate::server::{
    pool::{
        manager::{PoolStats, SharedQueue},
        request::{TaskResult, WorkRequest},
    },
    proxy::{Forward, ForwardRequest, ProxyError},
};
use futures::FutureExt;
use portable_atomic::Ordering;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

/// Worker task responsible for processing [`WorkRequest`] messages.
///
/// Each worker executes at most one forward at a time. Workers share a single
/// queue and only hold its lock while waiting for the next message, so the
/// pool as a whole drains the queue in FIFO order with `num_workers`-way
/// concurrency.
///
/// This function is designed to be spawned as a Tokio task and runs until it
/// receives [`WorkRequest::Shutdown`] or the queue is closed.
///
/// # Request Types
///
/// - [`WorkRequest::Forward`] - Runs the forward to completion, even if the
///   caller has already given up waiting, then delivers the result.
/// - [`WorkRequest::Shutdown`] - Acknowledges and exits.
pub async fn worker_loop<F: Forward>(
    worker_id: usize,
    queue: SharedQueue,
    forwarder: Arc<F>,
    stats: Arc<PoolStats>,
) {
    tracing::trace!("Worker {worker_id} started");

    loop {
        let work = queue.lock().await.recv().await;
        let Some(work) = work else {
            tracing::debug!("Worker {worker_id} queue closed");
            break;
        };

        match work {
            WorkRequest::Forward { request, reply } => {
                stats.queued.fetch_sub(1, Ordering::Relaxed);
                stats.active.fetch_add(1, Ordering::Relaxed);

                let result = run_task(worker_id, forwarder.as_ref(), request).await;

                stats.active.fetch_sub(1, Ordering::Relaxed);
                stats.completed.fetch_add(1, Ordering::Relaxed);

                if reply.send(result).is_err() {
                    stats.abandoned.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Worker {worker_id} finished a task nobody is waiting for");
                }
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}

/// Runs one forward. A panic inside the forwarder becomes an
/// [`ProxyError::Internal`] result instead of taking the worker down.
async fn run_task<F: Forward>(worker_id: usize, forwarder: &F, request: ForwardRequest) -> TaskResult {
    match AssertUnwindSafe(forwarder.forward(request)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let context = panic_message(panic.as_ref());
            tracing::error!("Worker {worker_id} task panicked: {context}");
            Err(ProxyError::Internal { context })
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("task panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("task panicked: {msg}")
    } else {
        "task panicked".to_string()
    }
}
