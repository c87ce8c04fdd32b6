//! Per-user serialization of multi-step operations

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use pulse_core::UserId;

/// One async mutex per user, created on first use
#[derive(Debug, Default)]
pub(crate) struct UserLocks {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user`'s multi-step operations
    pub(crate) async fn lock(&self, user: &UserId) -> UserLockGuard<'_> {
        let lock = Arc::clone(&self.locks.entry(user.clone()).or_default());
        UserLockGuard {
            locks: self,
            user: user.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Held lock; the user's entry is evicted on drop when nobody else wants it
pub(crate) struct UserLockGuard<'a> {
    locks: &'a UserLocks,
    user: UserId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of one means the map's is the last
        self.locks
            .locks
            .remove_if(&self.user, |_, lock| Arc::strong_count(lock) == 1);
    }
}
