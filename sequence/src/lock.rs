//! per-identity mutual exclusion
//!
//! one async mutex per identity, created on first use. the guard owns the
//! mutex guard, so every exit path of the holder (return, `?`, panic)
//! releases the identity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use swarm_traits::IdentityId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// identity lock table
#[derive(Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<IdentityId, Arc<AsyncMutex<()>>>>,
}

/// proof that the holder is the only submitter for `identity`
pub struct IdentityGuard {
    identity: IdentityId,
    _guard: OwnedMutexGuard<()>,
}

impl IdentityGuard {
    #[inline]
    pub fn identity(&self) -> &IdentityId {
        &self.identity
    }
}

impl std::fmt::Debug for IdentityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityGuard")
            .field("identity", &self.identity)
            .finish()
    }
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, identity: &IdentityId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// wait until the identity is free and take it. waiters are served FIFO.
    pub async fn lock(&self, identity: &IdentityId) -> IdentityGuard {
        let slot = self.slot(identity);
        let guard = slot.lock_owned().await;
        IdentityGuard {
            identity: identity.clone(),
            _guard: guard,
        }
    }

    /// take the identity only if nobody holds it
    pub fn try_lock(&self, identity: &IdentityId) -> Option<IdentityGuard> {
        let slot = self.slot(identity);
        let guard = slot.try_lock_owned().ok()?;
        Some(IdentityGuard {
            identity: identity.clone(),
            _guard: guard,
        })
    }

    /// true while some guard for the identity is alive
    pub fn is_locked(&self, identity: &IdentityId) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        match locks.get(identity) {
            Some(slot) => slot.try_lock().is_err(),
            None => false,
        }
    }

    /// number of identities seen so far
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_try_lock_exclusive() {
        let locks = IdentityLocks::new();
        let a = IdentityId::new("0xaa");
        let b = IdentityId::new("0xbb");

        let guard = locks.try_lock(&a).unwrap();
        assert!(locks.try_lock(&a).is_none());
        assert!(locks.is_locked(&a));

        // other identities are independent
        assert!(locks.try_lock(&b).is_some());

        drop(guard);
        assert!(!locks.is_locked(&a));
        assert!(locks.try_lock(&a).is_some());
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_released_on_error_path() {
        fn failing(locks: &IdentityLocks, id: &IdentityId) -> Result<(), &'static str> {
            let _guard = locks.try_lock(id).ok_or("busy")?;
            Err("send failed")
        }

        let locks = IdentityLocks::new();
        let id = IdentityId::new("0xaa");
        assert_eq!(failing(&locks, &id), Err("send failed"));
        assert!(!locks.is_locked(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_waits_for_release() {
        let locks = Arc::new(IdentityLocks::new());
        let id = IdentityId::new("0xaa");

        let guard = locks.lock(&id).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move {
                let g = locks.lock(&id).await;
                g.identity().clone()
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        assert_eq!(waiter.await.unwrap(), id);
        assert!(!locks.is_locked(&id));
    }

    #[tokio::test]
    async fn test_released_when_holder_panics() {
        let locks = Arc::new(IdentityLocks::new());
        let id = IdentityId::new("0xaa");

        let holder = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
                panic!("worker crashed");
            })
        };
        assert!(holder.await.is_err());
        assert!(locks.try_lock(&id).is_some());
    }
}
