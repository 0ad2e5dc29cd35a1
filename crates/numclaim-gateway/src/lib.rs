//! Rate-limited HTTP gateway for the `numclaim` backend.
//!
//! The gateway validates claim requests, admits them against a per-client
//! sliding window, and forwards them through a bounded pool of workers. The
//! backend's answer is relayed unchanged.

pub mod server;
