//! In-process per-identifier locks
//!
//! Two fetches of the same identifier would race on the same archive path
//! and artifact directory. Holders of the guard returned by
//! [`IdentifierLocks::acquire`] have exclusive use of one identifier's
//! checkpoint directory; different identifiers never contend.

use super::metadata::ModelIdentifier;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct IdentifierLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl IdentifierLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `identifier`; released when the guard drops
    pub async fn acquire(&self, identifier: &ModelIdentifier) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Wait for every lock currently in the map
    ///
    /// Locks are taken in key order, so two callers never deadlock.
    /// Identifiers first locked after the snapshot are not covered.
    pub async fn acquire_all(&self) -> Vec<OwnedMutexGuard<()>> {
        let mut locks: Vec<(String, Arc<Mutex<()>>)> = self
            .locks
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        locks.sort_by(|a, b| a.0.cmp(&b.0));

        let mut guards = Vec::with_capacity(locks.len());
        for (_, lock) in locks {
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    /// Drop map entries nobody holds or waits on
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
