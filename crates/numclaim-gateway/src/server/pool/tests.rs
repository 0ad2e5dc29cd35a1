use crate::server::{
    pool::manager::{BoundedDispatcher, DispatchError, DispatcherConfig},
    proxy::{BackendReply, Forward, ForwardRequest, ProxyError},
};
use bytes::Bytes;
use core::time::Duration;
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::{sync::Semaphore, time::sleep};

/// Forwarder that records what it ran and can be held at a gate.
struct Recorder {
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    panic_on: Option<i64>,
    seen: Mutex<Vec<i64>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
}

impl Recorder {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            gate: None,
            panic_on: None,
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(Duration::ZERO)
        }
    }
}

impl Forward for Recorder {
    async fn forward(&self, request: ForwardRequest) -> Result<BackendReply, ProxyError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.seen.lock().push(request.number);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        if self.panic_on == Some(request.number) {
            panic!("forwarder exploded on {}", request.number);
        }

        Ok(BackendReply {
            status: StatusCode::OK,
            content_type: None,
            body: Bytes::from(request.number.to_string()),
        })
    }
}

fn config(num_workers: usize, queue_capacity: usize) -> DispatcherConfig {
    DispatcherConfig {
        num_workers,
        queue_capacity,
        shutdown_timeout: Duration::from_secs(2),
    }
}

fn request(number: i64) -> ForwardRequest {
    ForwardRequest {
        client_key: "192.0.2.1".to_string(),
        number,
    }
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never held: {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn returns_result_within_timeout() {
    let forwarder = Arc::new(Recorder::new(Duration::from_millis(10)));
    let dispatcher = BoundedDispatcher::spawn(Arc::clone(&forwarder), config(2, 8));

    let reply = dispatcher
        .submit(request(7))
        .unwrap()
        .wait(Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, Bytes::from("7"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_callers_do_not_cancel_tasks() {
    let forwarder = Arc::new(Recorder::new(Duration::from_millis(300)));
    let dispatcher = BoundedDispatcher::spawn(Arc::clone(&forwarder), config(2, 8));

    let handles: Vec<_> = (0..5).map(|n| dispatcher.submit(request(n)).unwrap()).collect();
    let waits = handles
        .into_iter()
        .map(|handle| handle.wait(Duration::from_millis(50)));

    for outcome in futures::future::join_all(waits).await {
        assert_eq!(outcome.unwrap_err(), DispatchError::TimedOut);
    }

    eventually("all five tasks complete", || {
        forwarder.completed.load(Ordering::SeqCst) == 5
    })
    .await;
    eventually("all five results abandoned", || {
        dispatcher.snapshot().abandoned_tasks == 5
    })
    .await;
    assert!(forwarder.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_capped_at_worker_count() {
    let forwarder = Arc::new(Recorder::new(Duration::from_millis(40)));
    let dispatcher = BoundedDispatcher::spawn(Arc::clone(&forwarder), config(2, 16));

    let waits = (0..8).map(|n| {
        dispatcher
            .submit(request(n))
            .unwrap()
            .wait(Duration::from_secs(5))
    });
    for outcome in futures::future::join_all(waits).await {
        outcome.unwrap();
    }

    assert_eq!(forwarder.completed.load(Ordering::SeqCst), 8);
    assert_eq!(forwarder.max_in_flight.load(Ordering::SeqCst), 2);

    let snapshot = dispatcher.snapshot();
    assert_eq!(snapshot.max_workers, 2);
    assert_eq!(snapshot.queued_tasks, 0);
    assert_eq!(snapshot.active_tasks, 0);
    assert_eq!(snapshot.completed_tasks, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_queue_is_overloaded() {
    let gate = Arc::new(Semaphore::new(0));
    let forwarder = Arc::new(Recorder::gated(Arc::clone(&gate)));
    let dispatcher = BoundedDispatcher::spawn(Arc::clone(&forwarder), config(1, 1));

    let running = dispatcher.submit(request(1)).unwrap();
    eventually("first task picked up", || dispatcher.snapshot().active_tasks == 1).await;

    let queued = dispatcher.submit(request(2)).unwrap();
    assert_eq!(dispatcher.snapshot().queued_tasks, 1);
    assert_eq!(
        dispatcher.submit(request(3)).unwrap_err(),
        DispatchError::Overloaded
    );
    // A rejected submit leaves no trace in the counters.
    assert_eq!(dispatcher.snapshot().queued_tasks, 1);

    gate.add_permits(2);
    running.wait(Duration::from_secs(2)).await.unwrap();
    queued.wait(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queue_is_fifo() {
    let gate = Arc::new(Semaphore::new(0));
    let forwarder = Arc::new(Recorder::gated(Arc::clone(&gate)));
    let dispatcher = BoundedDispatcher::spawn(Arc::clone(&forwarder), config(1, 8));

    let first = dispatcher.submit(request(1)).unwrap();
    eventually("first task picked up", || dispatcher.snapshot().active_tasks == 1).await;
    let rest: Vec<_> = (2..=4).map(|n| dispatcher.submit(request(n)).unwrap()).collect();

    gate.add_permits(4);
    first.wait(Duration::from_secs(2)).await.unwrap();
    for handle in rest {
        handle.wait(Duration::from_secs(2)).await.unwrap();
    }

    assert_eq!(*forwarder.seen.lock(), vec![1, 2, 3, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_task_becomes_internal_error() {
    let mut recorder = Recorder::new(Duration::ZERO);
    recorder.panic_on = Some(13);
    let forwarder = Arc::new(recorder);
    let dispatcher = BoundedDispatcher::spawn(Arc::clone(&forwarder), config(1, 4));

    let err = dispatcher
        .submit(request(13))
        .unwrap()
        .wait(Duration::from_secs(2))
        .await
        .unwrap_err();
    match err {
        DispatchError::Forward(ProxyError::Internal { context }) => {
            assert!(context.contains("exploded"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        numclaim_core::Error::from(DispatchError::Forward(ProxyError::Internal {
            context: String::new()
        }))
        .status(),
        axum::http::StatusCode::INTERNAL_SERVER_ERROR
    );

    // The lone worker survived the panic.
    dispatcher
        .submit(request(14))
        .unwrap()
        .wait(Duration::from_secs(2))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_drains_then_refuses() {
    let forwarder = Arc::new(Recorder::new(Duration::from_millis(50)));
    let dispatcher = BoundedDispatcher::spawn(Arc::clone(&forwarder), config(2, 8));

    let handles: Vec<_> = (0..4).map(|n| dispatcher.submit(request(n)).unwrap()).collect();
    dispatcher.shutdown().await;

    assert!(dispatcher.is_shutting_down());
    assert_eq!(forwarder.completed.load(Ordering::SeqCst), 4);
    for handle in handles {
        handle.wait(Duration::from_millis(10)).await.unwrap();
    }
    assert_eq!(
        dispatcher.submit(request(99)).unwrap_err(),
        DispatchError::ServiceShutdown
    );
}
