//! Bounded worker pool that forwards admitted requests to the backend.
//!
//! - [`manager`] - [`BoundedDispatcher`](manager::BoundedDispatcher): submit,
//!   wait with timeout, stats and graceful shutdown.
//! - [`worker`] - the loop each worker task runs.
//! - [`request`] - messages exchanged between the two.

pub mod manager;
pub mod request;
pub mod worker;

#[cfg(test)]
mod tests;
