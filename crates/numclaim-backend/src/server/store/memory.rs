use super::{ClaimSession, ClaimStore, InsertOutcome, StoreError};
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use std::{collections::HashSet, sync::Arc};

#[derive(Debug, Default)]
struct Shared {
    claims: Mutex<HashSet<(String, i64)>>,
    offline: AtomicBool,
}

impl Shared {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::Acquire) {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

/// In-process claim store.
///
/// Insert is check-and-set under one lock, which gives the same uniqueness
/// guarantee as a database constraint. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct MemoryClaimStore {
    shared: Arc<Shared>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) the store. While offline every
    /// operation, including those on already acquired sessions, fails with
    /// [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.shared.claims.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, owner_key: &str, number: i64) -> bool {
        self.shared
            .claims
            .lock()
            .contains(&(owner_key.to_string(), number))
    }
}

impl ClaimStore for MemoryClaimStore {
    type Session = MemorySession;

    async fn acquire(&self) -> Result<MemorySession, StoreError> {
        self.shared.check_online()?;
        Ok(MemorySession {
            shared: Arc::clone(&self.shared),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.shared.check_online()
    }
}

#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Shared>,
}

impl ClaimSession for MemorySession {
    async fn exists(&mut self, owner_key: &str, number: i64) -> Result<bool, StoreError> {
        self.shared.check_online()?;
        Ok(self
            .shared
            .claims
            .lock()
            .contains(&(owner_key.to_string(), number)))
    }

    async fn insert(&mut self, owner_key: &str, number: i64) -> Result<InsertOutcome, StoreError> {
        self.shared.check_online()?;
        if self.shared.claims.lock().insert((owner_key.to_string(), number)) {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::Duplicate)
        }
    }
}
