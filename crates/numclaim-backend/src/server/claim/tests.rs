use super::{ClaimService, Claimed};
use crate::server::store::{
    ClaimSession, ClaimStore, InsertOutcome, StoreError,
    memory::{MemoryClaimStore, MemorySession},
};
use numclaim_core::{ConflictReason, Error, MAX_CLAIM_NUMBER, ValidationError};
use std::sync::Arc;
use tokio::sync::Barrier;

const OWNER: &str = "10.0.0.1";

fn conflict(reason: ConflictReason) -> Result<Claimed, Error> {
    Err(Error::Conflict(reason))
}

/// Memory store whose sessions rendezvous on a barrier right before inserting,
/// so every participant has finished its existence checks first.
struct GatedStore {
    inner: MemoryClaimStore,
    barrier: Arc<Barrier>,
}

struct GatedSession {
    inner: MemorySession,
    barrier: Arc<Barrier>,
}

impl ClaimStore for GatedStore {
    type Session = GatedSession;

    async fn acquire(&self) -> Result<GatedSession, StoreError> {
        Ok(GatedSession {
            inner: self.inner.acquire().await?,
            barrier: Arc::clone(&self.barrier),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

impl ClaimSession for GatedSession {
    async fn exists(&mut self, owner_key: &str, number: i64) -> Result<bool, StoreError> {
        self.inner.exists(owner_key, number).await
    }

    async fn insert(&mut self, owner_key: &str, number: i64) -> Result<InsertOutcome, StoreError> {
        self.barrier.wait().await;
        self.inner.insert(owner_key, number).await
    }
}

fn gated(participants: usize) -> (Arc<ClaimService<GatedStore>>, MemoryClaimStore) {
    let inner = MemoryClaimStore::new();
    let service = ClaimService::new(GatedStore {
        inner: inner.clone(),
        barrier: Arc::new(Barrier::new(participants)),
    });
    (Arc::new(service), inner)
}

#[tokio::test]
async fn adjacency_rule_is_one_directional() {
    let service = ClaimService::new(MemoryClaimStore::new());

    let claimed = service.claim(OWNER, 5).await.unwrap();
    assert_eq!(claimed.number, 5);
    assert_eq!(claimed.result(), 6);

    assert_eq!(
        service.claim(OWNER, 5).await,
        conflict(ConflictReason::AlreadyClaimed)
    );
    assert_eq!(
        service.claim(OWNER, 4).await,
        conflict(ConflictReason::SuccessorClaimed)
    );
    assert_eq!(service.claim(OWNER, 6).await.unwrap().number, 6);

    assert_eq!(
        service.claim(OWNER, 4).await.unwrap_err().to_string(),
        "Number + 1 already exists"
    );
}

#[tokio::test]
async fn owners_do_not_interfere() {
    let service = ClaimService::new(MemoryClaimStore::new());

    service.claim("10.0.0.1", 5).await.unwrap();
    service.claim("10.0.0.2", 5).await.unwrap();
    service.claim("10.0.0.2", 4).await.unwrap_err();
    service.claim("10.0.0.3", 4).await.unwrap();

    assert_eq!(service.store().len(), 3);
}

#[tokio::test]
async fn zero_and_largest_number_are_claimable() {
    let service = ClaimService::new(MemoryClaimStore::new());

    assert_eq!(service.claim(OWNER, 0).await.unwrap().result(), 1);
    assert_eq!(
        service.claim(OWNER, MAX_CLAIM_NUMBER).await.unwrap().result(),
        i64::MAX
    );
}

#[tokio::test]
async fn out_of_range_numbers_are_rejected_without_touching_store() {
    let store = MemoryClaimStore::new();
    store.set_offline(true);
    let service = ClaimService::new(store);

    for number in [-1, i64::MIN, i64::MAX] {
        assert_eq!(
            service.claim(OWNER, number).await,
            Err(Error::Validation(ValidationError::OutOfRange))
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_claims_yield_exactly_one_success() {
    let service = Arc::new(ClaimService::new(MemoryClaimStore::new()));

    let attempts = (0..16).map(|_| {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.claim(OWNER, 42).await })
    });
    let outcomes: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let granted = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(granted, 1);
    for outcome in outcomes.iter().filter(|o| o.is_err()) {
        assert!(
            matches!(
                outcome,
                Err(Error::Conflict(
                    ConflictReason::AlreadyClaimed | ConflictReason::ConcurrentClaim
                ))
            ),
            "{outcome:?}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn insert_constraint_decides_same_pair_race() {
    let (service, store) = gated(2);

    let first = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.claim(OWNER, 7).await }
    });
    let second = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.claim(OWNER, 7).await }
    });
    let mut outcomes = vec![first.await.unwrap(), second.await.unwrap()];
    outcomes.sort_by_key(Result::is_err);

    // Both passed the existence checks; the uniqueness constraint picked one.
    assert!(outcomes[0].is_ok());
    assert_eq!(outcomes[1], conflict(ConflictReason::ConcurrentClaim));
    assert_eq!(store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn successor_race_is_not_prevented() {
    let (service, store) = gated(2);

    let lower = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.claim(OWNER, 10).await }
    });
    let upper = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.claim(OWNER, 11).await }
    });

    // Known gap: sequentially, claiming 10 after 11 is refused, but when both
    // pass their checks before either inserts, both succeed.
    assert!(lower.await.unwrap().is_ok());
    assert!(upper.await.unwrap().is_ok());
    assert!(store.contains(OWNER, 10) && store.contains(OWNER, 11));
}

#[tokio::test]
async fn unavailable_store_is_reported_as_such() {
    let store = MemoryClaimStore::new();
    let service = ClaimService::new(store.clone());
    service.health().await.unwrap();

    store.set_offline(true);

    assert_eq!(service.claim(OWNER, 1).await, Err(Error::StoreUnavailable));
    assert_eq!(service.health().await, Err(Error::StoreUnavailable));
    assert_eq!(
        Error::StoreUnavailable.status(),
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    );
}
