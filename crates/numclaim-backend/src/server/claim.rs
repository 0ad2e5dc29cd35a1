//! The claim protocol.
//!
//! A claim of `number` by `owner_key` runs three statements on one session:
//!
//! 1. `exists(owner, number)` -> [`ConflictReason::AlreadyClaimed`]
//! 2. `exists(owner, number + 1)` -> [`ConflictReason::SuccessorClaimed`]
//! 3. `insert(owner, number)`; a duplicate -> [`ConflictReason::ConcurrentClaim`]
//!
//! There is no transaction around them. Steps 1 and 2 are advisory: a
//! concurrent claim of the same pair can slip in between a check and the
//! insert, and only the store's uniqueness constraint (step 3) decides that
//! race. The constraint does not cover the successor rule, so concurrent
//! claims of `N` and `N + 1` by one owner can both succeed.

use crate::server::{
    store::{ClaimSession, ClaimStore, InsertOutcome},
    telemetry::{increment_claim_conflicts, increment_claims_granted, increment_store_unavailable},
};
use numclaim_core::{ConflictReason, Error, MAX_CLAIM_NUMBER, ValidationError};

/// A successful claim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claimed {
    pub owner_key: String,
    pub number: i64,
}

impl Claimed {
    /// The value reported back to the client.
    pub const fn result(&self) -> i64 {
        self.number + 1
    }
}

pub struct ClaimService<S> {
    store: S,
}

impl<S: ClaimStore> ClaimService<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Claims `number` for `owner_key`.
    ///
    /// # Errors
    ///
    /// - [`Error::Conflict`] if the number or its successor is already held.
    /// - [`Error::StoreUnavailable`] if the store cannot be reached.
    /// - [`Error::Validation`] if `number` is outside `0..i64::MAX`.
    #[tracing::instrument(skip(self))]
    pub async fn claim(&self, owner_key: &str, number: i64) -> Result<Claimed, Error> {
        if !(0..=MAX_CLAIM_NUMBER).contains(&number) {
            return Err(ValidationError::OutOfRange.into());
        }

        let outcome = self.run(owner_key, number).await;
        match &outcome {
            Ok(_) => {
                increment_claims_granted();
                tracing::info!("Claimed number {number} for {owner_key}");
            }
            Err(Error::Conflict(reason)) => {
                increment_claim_conflicts(*reason);
                tracing::info!("Claim of {number} by {owner_key} rejected: {reason}");
            }
            Err(Error::StoreUnavailable) => {
                increment_store_unavailable();
                tracing::warn!("Claim of {number} by {owner_key} failed: store unavailable");
            }
            Err(e) => tracing::error!("Claim of {number} by {owner_key} failed: {e:?}"),
        }
        outcome
    }

    async fn run(&self, owner_key: &str, number: i64) -> Result<Claimed, Error> {
        let mut session = self.store.acquire().await?;

        if session.exists(owner_key, number).await? {
            return Err(ConflictReason::AlreadyClaimed.into());
        }
        if session.exists(owner_key, number + 1).await? {
            return Err(ConflictReason::SuccessorClaimed.into());
        }

        match session.insert(owner_key, number).await? {
            InsertOutcome::Inserted => Ok(Claimed {
                owner_key: owner_key.to_string(),
                number,
            }),
            InsertOutcome::Duplicate => Err(ConflictReason::ConcurrentClaim.into()),
        }
    }

    /// Probes the store.
    ///
    /// # Errors
    ///
    /// [`Error::StoreUnavailable`] for any failed probe, including a query
    /// the store rejected.
    pub async fn health(&self) -> Result<(), Error> {
        self.store.ping().await.map_err(|e| {
            tracing::warn!("Store health check failed: {e}");
            increment_store_unavailable();
            Error::StoreUnavailable
        })
    }
}

#[cfg(test)]
mod tests;
