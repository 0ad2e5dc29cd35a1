//! Persistence of claims.
//!
//! A [`ClaimStore`] hands out [`ClaimSession`]s; a session is one pooled
//! connection held for the duration of a claim. The only guarantee a store
//! must enforce atomically is uniqueness of `(owner_key, number)`: a
//! duplicate insert reports [`InsertOutcome::Duplicate`] instead of failing.
//!
//! - [`postgres`] - [`PgClaimStore`](postgres::PgClaimStore), backed by a
//!   `UNIQUE` constraint.
//! - [`memory`] - [`MemoryClaimStore`](memory::MemoryClaimStore), backed by a
//!   set behind a mutex.

pub mod memory;
pub mod postgres;

/// Storage failures. Neither variant is ever a uniqueness conflict.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached: no connection, pool exhausted or
    /// closed, connection dropped mid-query.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error.
    #[error("store query failed: {0}")]
    Query(String),
}

impl From<StoreError> for numclaim_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => Self::StoreUnavailable,
            StoreError::Query(context) => Self::Internal { context },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The pair already existed; nothing was written.
    Duplicate,
}

pub trait ClaimStore: Send + Sync + 'static {
    type Session: ClaimSession;

    /// Acquires a session. Every call made through it runs on the same
    /// connection, with no transaction around them.
    fn acquire(&self) -> impl Future<Output = Result<Self::Session, StoreError>> + Send;

    /// Trivial round trip proving the store is reachable.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

pub trait ClaimSession: Send {
    fn exists(
        &mut self,
        owner_key: &str,
        number: i64,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn insert(
        &mut self,
        owner_key: &str,
        number: i64,
    ) -> impl Future<Output = Result<InsertOutcome, StoreError>> + Send;
}
