//! Backend metric handles. All recording functions are no-ops without the
//! `metrics` feature.

use numclaim_core::ConflictReason;
#[cfg(feature = "metrics")]
use numclaim_core::telemetry::opentelemetry::{KeyValue, metrics::Counter};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub const SERVICE_NAME: &str = "numclaim-backend";

#[cfg(feature = "metrics")]
static CLAIMS_GRANTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CLAIM_CONFLICTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static STORE_UNAVAILABLE: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
pub fn init_metric_handles() {
    let meter = numclaim_core::telemetry::meter(SERVICE_NAME);

    let _ = CLAIMS_GRANTED.set(
        meter
            .u64_counter("claims_granted")
            .with_description("Claims recorded in the store")
            .build(),
    );

    let _ = CLAIM_CONFLICTS.set(
        meter
            .u64_counter("claim_conflicts")
            .with_description("Claims refused, by reason")
            .build(),
    );

    let _ = STORE_UNAVAILABLE.set(
        meter
            .u64_counter("store_unavailable")
            .with_description("Claims or health checks that could not reach the store")
            .build(),
    );
}

#[cfg(not(feature = "metrics"))]
pub fn init_metric_handles() {}

#[cfg(feature = "metrics")]
pub fn increment_claims_granted() {
    if let Some(counter) = CLAIMS_GRANTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_claims_granted() {}

#[cfg(feature = "metrics")]
pub fn increment_claim_conflicts(reason: ConflictReason) {
    if let Some(counter) = CLAIM_CONFLICTS.get() {
        counter.add(1, &[KeyValue::new("reason", reason.as_str())]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_claim_conflicts(_reason: ConflictReason) {}

#[cfg(feature = "metrics")]
pub fn increment_store_unavailable() {
    if let Some(counter) = STORE_UNAVAILABLE.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_store_unavailable() {}
