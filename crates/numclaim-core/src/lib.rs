//! Shared building blocks for the `numclaim` gateway and backend.
//!
//! Both tiers speak the same small JSON protocol and report failures through
//! the same error taxonomy, so those live here together with the telemetry
//! bootstrap each binary runs at startup.

mod common;
pub mod telemetry;

pub use common::*;
