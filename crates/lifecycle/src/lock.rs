use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use common::store::keys;
use common::{AtomicStore, Result};

/// Proof of holding a lock. Release it with [`DistributedLock::release`];
/// a guard that is never released expires with the lock's TTL.
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    token: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Mutual exclusion over the shared store, usable across processes.
///
/// A lock is a `lock:{name}` key holding a random token, written only if
/// absent and with a TTL so a crashed holder cannot block progress for
/// longer than the TTL. Release deletes the key only if it still holds our
/// token, so a holder whose lock already expired cannot free someone else's.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn AtomicStore>,
    ttl: Duration,
    wait: Duration,
    poll: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn AtomicStore>, ttl: Duration, wait: Duration, poll: Duration) -> Self {
        Self { store, ttl, wait, poll }
    }

    /// Single attempt.
    pub async fn try_acquire(&self, name: &str) -> Result<Option<LockGuard>> {
        let key = keys::lock(name);
        let token = Uuid::new_v4().to_string();
        if self.store.put_if_absent(&key, token.clone(), Some(self.ttl)).await? {
            debug!(key = %key, "Lock acquired");
            Ok(Some(LockGuard { key, token }))
        } else {
            Ok(None)
        }
    }

    /// Poll until the lock is free or the wait bound elapses. `Ok(None)`
    /// means someone else holds it; that is an expected outcome.
    pub async fn acquire(&self, name: &str) -> Result<Option<LockGuard>> {
        let deadline = Instant::now() + self.wait;
        loop {
            if let Some(guard) = self.try_acquire(name).await? {
                return Ok(Some(guard));
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(name, "Lock busy, giving up");
                return Ok(None);
            }
            tokio::time::sleep(self.poll.min(deadline - now)).await;
        }
    }

    /// Returns false if the lock had already expired and been taken over.
    pub async fn release(&self, guard: LockGuard) -> Result<bool> {
        let released = self.store.delete_if_value(&guard.key, &guard.token).await?;
        if !released {
            warn!(key = %guard.key, "Lock expired before release");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ManualClock;
    use store::MemoryStore;

    fn lock_on(store: &MemoryStore) -> DistributedLock {
        DistributedLock::new(
            Arc::new(store.clone()),
            Duration::from_secs(5),
            Duration::from_millis(50),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn second_acquire_times_out() {
        let store = MemoryStore::new();
        let lock = lock_on(&store);
        let held = lock.acquire("t-1").await.unwrap().unwrap();
        assert!(lock.acquire("t-1").await.unwrap().is_none());
        assert!(lock.release(held).await.unwrap());
        assert!(lock.acquire("t-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn abandoned_lock_expires() {
        let clock = ManualClock::default();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let lock = lock_on(&store);
        let stale = lock.acquire("t-1").await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(6));
        let fresh = lock.acquire("t-1").await.unwrap().unwrap();

        // The old holder must not free the new holder's lock
        assert!(!lock.release(stale).await.unwrap());
        assert!(lock.try_acquire("t-1").await.unwrap().is_none());
        assert!(lock.release(fresh).await.unwrap());
    }
}
