// 🔒 Entity Locks & Abort Handle
//
// EntityLocks: at most one writer per (entity type, id) across concurrent
// calculations in this process. A caller claims a whole set at once and
// holds a single guard at a time, so two callers can never wait on each
// other in a cycle.
//
// AbortHandle: shared flag checked between entities. Raising it stops the
// calculation at the next entity boundary; what was written stays written.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::debug;

use crate::entities::EntityRef;

// ============================================================================
// ABORT HANDLE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the handle can be reused for the next run
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// ENTITY LOCKS
// ============================================================================

#[derive(Debug, Default)]
pub struct EntityLocks {
    held: Mutex<HashSet<EntityRef>>,
    released: Condvar,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned set is still consistent: guards only insert and remove whole claims
    fn held(&self) -> MutexGuard<'_, HashSet<EntityRef>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until none of `entities` is held, then claim all of them
    pub fn acquire(&self, entities: &[EntityRef]) -> EntityGuard<'_> {
        let mut held = self.held();
        while entities.iter().any(|e| held.contains(e)) {
            debug!(entities = entities.len(), "Waiting for entities claimed by another calculation");
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        held.extend(entities.iter().copied());

        EntityGuard {
            locks: self,
            entities: entities.to_vec(),
        }
    }

    /// Claim `entities` only if none of them is held
    pub fn try_acquire(&self, entities: &[EntityRef]) -> Option<EntityGuard<'_>> {
        let mut held = self.held();
        if entities.iter().any(|e| held.contains(e)) {
            return None;
        }
        held.extend(entities.iter().copied());
        Some(EntityGuard {
            locks: self,
            entities: entities.to_vec(),
        })
    }

    pub fn is_held(&self, entity: &EntityRef) -> bool {
        self.held().contains(entity)
    }
}

/// Releases its claim on drop
#[derive(Debug)]
pub struct EntityGuard<'a> {
    locks: &'a EntityLocks,
    entities: Vec<EntityRef>,
}

impl EntityGuard<'_> {
    pub fn entities(&self) -> &[EntityRef] {
        &self.entities
    }
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held();
        for entity in &self.entities {
            held.remove(entity);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityType;
    use std::thread;
    use std::time::Duration;

    fn refs(ids: &[i64]) -> Vec<EntityRef> {
        ids.iter().map(|id| EntityRef::new(EntityType::Individual, *id)).collect()
    }

    #[test]
    fn test_abort_handle_is_shared() {
        let handle = AbortHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_aborted());

        clone.abort();
        assert!(handle.is_aborted());

        handle.reset();
        assert!(!clone.is_aborted());
    }

    #[test]
    fn test_overlapping_claims_are_exclusive() {
        let locks = EntityLocks::new();
        let guard = locks.acquire(&refs(&[1, 2]));

        assert!(locks.is_held(&EntityRef::new(EntityType::Individual, 2)));
        assert!(locks.try_acquire(&refs(&[2, 3])).is_none());
        // same id, other type
        assert!(locks
            .try_acquire(&[EntityRef::new(EntityType::Organization, 1)])
            .is_some());

        drop(guard);
        assert!(locks.try_acquire(&refs(&[2, 3])).is_some());
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let locks = Arc::new(EntityLocks::new());
        let guard = locks.acquire(&refs(&[7]));

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let guard = locks.acquire(&refs(&[7]));
                guard.entities().len()
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        drop(guard);
        assert_eq!(waiter.join().unwrap(), 1);
        assert!(!locks.is_held(&EntityRef::new(EntityType::Individual, 7)));
    }
}
