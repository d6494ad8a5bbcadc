//! Per-key regeneration locking.
//!
//! A key only has an entry in the lock map while someone holds or waits on its
//! lock; the last guard to leave removes it. Keys never contend with each other.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Tracks which keys are being regenerated and serializes regeneration per key.
#[derive(Default)]
pub struct RefreshCoordinator {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Proof that the holder is the only regeneration in flight for a key.
///
/// Dropping the guard releases the key on every exit path, including generator
/// failures and cancelled callers.
pub struct RefreshGuard {
    coordinator: Arc<RefreshCoordinator>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the key's mutex out of the map, inserting one if needed.
    ///
    /// The returned `Release` must outlive every clone of the mutex handed out
    /// here, so that its drop sees only the map and any guard still holding it.
    fn lock_for<'a>(&'a self, key: &'a str) -> (Release<'a>, Arc<Mutex<()>>) {
        let lock = Arc::clone(
            &self
                .locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        let release = Release {
            coordinator: self,
            key,
        };
        (release, lock)
    }

    /// Acquire the lock for `key`, waiting for any regeneration already in flight.
    ///
    /// Cancelling the returned future while it waits leaves no trace in the map.
    pub async fn lock(self: &Arc<Self>, key: &str) -> RefreshGuard {
        let (release, lock) = self.lock_for(key);
        let guard = lock.lock_owned().await;
        drop(release);

        RefreshGuard {
            coordinator: Arc::clone(self),
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Acquire the lock for `key` only if no one holds it.
    pub fn try_lock(self: &Arc<Self>, key: &str) -> Option<RefreshGuard> {
        let (release, lock) = self.lock_for(key);
        let guard = lock.try_lock_owned().ok()?;
        drop(release);

        Some(RefreshGuard {
            coordinator: Arc::clone(self),
            key: key.to_string(),
            guard: Some(guard),
        })
    }

    /// Whether a regeneration for `key` is in flight or waiting to start.
    pub fn is_refreshing(&self, key: &str) -> bool {
        self.locks.contains_key(key)
    }

    /// Number of keys with a regeneration in flight.
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }

    fn release(&self, key: &str) {
        // Only the map itself may still reference the lock; anyone else is
        // either holding it or queued on it.
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Re-checks a key's map entry once a caller is done with its mutex handle.
///
/// Waiters that are cancelled and failed `try_lock` calls go through this
/// too, so the entry never outlives its last user.
struct Release<'a> {
    coordinator: &'a RefreshCoordinator,
    key: &'a str,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.coordinator.release(self.key);
    }
}

impl RefreshGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.coordinator.release(&self.key);
    }
}
