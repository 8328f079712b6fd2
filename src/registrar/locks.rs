//! Per-identity mutual exclusion
//!
//! Mutations for one identity are linearized; different identities proceed in
//! parallel. Entries are dropped from the map once nobody holds or waits on them.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct IdentityLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Held for the duration of one bind/unbind
pub struct IdentityGuard {
    guard: Option<OwnedMutexGuard<()>>,
    identity: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `identity`
    pub async fn acquire(&self, identity: &str) -> IdentityGuard {
        let mutex = self
            .inner
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        IdentityGuard {
            guard: Some(mutex.lock_owned().await),
            identity: identity.to_string(),
            locks: self.inner.clone(),
        }
    }

    /// Number of identities with a live lock entry
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left: no holder, no waiter
        self.locks
            .remove_if(&self.identity, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
