//! Gateway metric handles.
//!
//! Instruments are created once by [`init_metric_handles`] after the global
//! meter provider is installed. Every recording function compiles to a no-op
//! when the `metrics` feature is disabled, so call sites never need a `cfg`.

#[cfg(feature = "metrics")]
use numclaim_core::telemetry::opentelemetry::metrics::{Counter, Histogram};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub const SERVICE_NAME: &str = "numclaim-gateway";

#[cfg(feature = "metrics")]
static REQUESTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RATE_LIMITED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static OVERLOADED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static DISPATCH_TIMEOUTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static FORWARD_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
pub fn init_metric_handles() {
    let meter = numclaim_core::telemetry::meter(SERVICE_NAME);

    let _ = REQUESTS.set(
        meter
            .u64_counter("requests")
            .with_description("Total claim requests received")
            .build(),
    );

    let _ = RATE_LIMITED.set(
        meter
            .u64_counter("rate_limited")
            .with_description("Requests rejected by the sliding-window limiter")
            .build(),
    );

    let _ = OVERLOADED.set(
        meter
            .u64_counter("overloaded")
            .with_description("Requests rejected because the dispatch queue was full")
            .build(),
    );

    let _ = DISPATCH_TIMEOUTS.set(
        meter
            .u64_counter("dispatch_timeouts")
            .with_description("Callers that stopped waiting on a dispatched task")
            .build(),
    );

    let _ = FORWARD_DURATION_MS.set(
        meter
            .f64_histogram("forward_duration")
            .with_unit("ms")
            .with_description("Time from dispatch to backend reply as seen by the caller")
            .build(),
    );
}

#[cfg(not(feature = "metrics"))]
pub fn init_metric_handles() {}

#[cfg(feature = "metrics")]
pub fn increment_requests() {
    if let Some(counter) = REQUESTS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests() {}

#[cfg(feature = "metrics")]
pub fn increment_rate_limited() {
    if let Some(counter) = RATE_LIMITED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_rate_limited() {}

#[cfg(feature = "metrics")]
pub fn increment_overloaded() {
    if let Some(counter) = OVERLOADED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_overloaded() {}

#[cfg(feature = "metrics")]
pub fn increment_dispatch_timeouts() {
    if let Some(counter) = DISPATCH_TIMEOUTS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_dispatch_timeouts() {}

#[cfg(feature = "metrics")]
pub fn record_forward_duration(duration_ms: f64) {
    if let Some(histogram) = FORWARD_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_forward_duration(_duration_ms: f64) {}
