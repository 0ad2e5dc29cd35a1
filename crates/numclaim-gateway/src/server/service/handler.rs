//! Gateway service and its HTTP handlers.
//!
//! [`GatewayService`] owns the three collaborators every request touches:
//! the [`RateLimiter`], the [`BoundedDispatcher`] and the [`ProxyClient`] the
//! dispatcher's workers forward through. It is constructed once at startup
//! and handed to the router as state; there is no global table.
//!
//! ## Request path
//!
//! 1. Validate the body (415/400). Invalid input never costs quota.
//! 2. Admit against the client's sliding window (429).
//! 3. Submit to the dispatcher (503 when the queue is full).
//! 4. Wait up to `dispatch_timeout` (504 when the wait elapses; the task
//!    keeps running).
//! 5. Relay the backend's status and body verbatim, or the mapped transport
//!    error (502/504/500).

use crate::server::{
    config::ServerConfig,
    limiter::{ClientUsage, RateLimiter},
    pool::manager::{BoundedDispatcher, DispatchError, DispatcherConfig, PoolSnapshot},
    proxy::{BackendReply, ForwardRequest, ProxyClient},
    telemetry::{
        increment_dispatch_timeouts, increment_overloaded, increment_rate_limited,
        increment_requests, record_forward_duration,
    },
};
use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use core::time::Duration;
use numclaim_core::{Error, parse_process_body};
use serde::Serialize;
use std::{collections::BTreeMap, net::SocketAddr, sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct GatewayService {
    limiter: Arc<RateLimiter>,
    dispatcher: Arc<BoundedDispatcher>,
    proxy: ProxyClient,
    dispatch_timeout: Duration,
    background: CancellationToken,
}

impl GatewayService {
    /// Builds the limiter, the proxy client and the worker pool, and starts
    /// the periodic purge of idle rate-limit windows.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the proxy client cannot be built for `config.backend_url`.
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_window,
            config.max_requests_per_window,
        ));
        let proxy = ProxyClient::new(
            &config.backend_url,
            config.backend_timeout,
            config.health_timeout,
        )?;
        let dispatcher = BoundedDispatcher::spawn(
            Arc::new(proxy.clone()),
            DispatcherConfig {
                num_workers: config.num_workers,
                queue_capacity: config.queue_capacity,
                shutdown_timeout: config.shutdown_timeout,
            },
        );

        let background = CancellationToken::new();
        tokio::spawn(purge_idle_clients(
            Arc::clone(&limiter),
            config.rate_limit_window,
            background.clone(),
        ));

        Ok(Self {
            limiter,
            dispatcher: Arc::new(dispatcher),
            proxy,
            dispatch_timeout: config.dispatch_timeout,
            background,
        })
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn dispatcher(&self) -> &BoundedDispatcher {
        &self.dispatcher
    }

    /// Stops background work and drains the worker pool.
    pub async fn shutdown(&self) {
        self.background.cancel();
        self.dispatcher.shutdown().await;
    }

    async fn forward(&self, request: ForwardRequest) -> Result<BackendReply, DispatchError> {
        let client_key = request.client_key.clone();
        let start = Instant::now();

        let handle = self.dispatcher.submit(request).inspect_err(|e| {
            if *e == DispatchError::Overloaded {
                increment_overloaded();
                tracing::warn!(client = %client_key, "dispatch queue full");
            }
        })?;

        let reply = handle.wait(self.dispatch_timeout).await.inspect_err(|e| {
            if *e == DispatchError::TimedOut {
                increment_dispatch_timeouts();
                tracing::warn!(
                    client = %client_key,
                    "gave up waiting after {:?}; task left running",
                    self.dispatch_timeout
                );
            }
        })?;

        record_forward_duration(start.elapsed().as_secs_f64() * 1000.0);
        Ok(reply)
    }
}

async fn purge_idle_clients(limiter: Arc<RateLimiter>, every: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let removed = limiter.purge_idle(Instant::now());
                if removed > 0 {
                    tracing::debug!("Purged {removed} idle rate-limit windows");
                }
            }
        }
    }
}

/// `POST /api/process`
pub async fn process(
    State(service): State<GatewayService>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Error> {
    increment_requests();

    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let number = parse_process_body(content_type, &body)?;
    let client_key = peer.ip().to_string();

    if !service.limiter.admit(&client_key, Instant::now()) {
        increment_rate_limited();
        tracing::info!("Rate limit exceeded for IP {client_key}");
        return Err(Error::RateLimited {
            max: service.limiter.max_per_window(),
            window_secs: service.limiter.window().as_secs(),
        });
    }

    tracing::info!("Processing request for IP {client_key}, number {number}");
    let reply = service
        .forward(ForwardRequest { client_key, number })
        .await?;
    Ok(relay(reply))
}

fn relay(reply: BackendReply) -> Response {
    let mut response = (reply.status, reply.body).into_response();
    match reply.content_type {
        Some(content_type) => {
            response.headers_mut().insert(CONTENT_TYPE, content_type);
        }
        None => {
            response.headers_mut().remove(CONTENT_TYPE);
        }
    }
    response
}

#[derive(Debug, Serialize)]
pub struct RateLimitPolicy {
    pub window_seconds: u64,
    pub max_per_ip: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub frontend: &'static str,
    pub backend: &'static str,
    pub thread_pool: PoolSnapshot,
    pub rate_limiting: RateLimitPolicy,
}

#[derive(Debug, Serialize)]
pub struct BackendUnreachable {
    pub frontend: &'static str,
    pub backend: &'static str,
    pub error: String,
}

/// `GET /health`
pub async fn health(State(service): State<GatewayService>) -> Response {
    match service.proxy.health().await {
        Ok(status) => {
            let backend_ok = status == StatusCode::OK;
            let report = HealthReport {
                frontend: "healthy",
                backend: if backend_ok { "healthy" } else { "unhealthy" },
                thread_pool: service.dispatcher.snapshot(),
                rate_limiting: RateLimitPolicy {
                    window_seconds: service.limiter.window().as_secs(),
                    max_per_ip: service.limiter.max_per_window(),
                },
            };
            let status = if backend_ok {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(report)).into_response()
        }
        Err(e) => {
            tracing::warn!("Backend health probe failed: {e}");
            let body = BackendUnreachable {
                frontend: "healthy",
                backend: "unreachable",
                error: e.to_string(),
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueueStats {
    pub total_unique_ips: usize,
    pub rate_limit_window_seconds: u64,
    pub max_requests_per_ip: usize,
    pub ip_statistics: BTreeMap<String, ClientUsage>,
}

/// `GET /api/queue/stats`
pub async fn queue_stats(State(service): State<GatewayService>) -> Json<QueueStats> {
    let ip_statistics = service.limiter.usage(Instant::now());
    Json(QueueStats {
        total_unique_ips: ip_statistics.len(),
        rate_limit_window_seconds: service.limiter.window().as_secs(),
        max_requests_per_ip: service.limiter.max_per_window(),
        ip_statistics,
    })
}
