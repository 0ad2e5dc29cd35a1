//! Claim backend for `numclaim`.
//!
//! Records `(owner, number)` claims in a store whose uniqueness constraint is
//! the final arbiter of conflicts, and refuses a number whose successor the
//! same owner already holds.

pub mod server;
