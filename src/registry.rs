//! In-flight query tracking for cancellation.
//!
//! Maps a client-supplied query id to the interrupt token of the engine
//! session currently executing it. A second concurrent execution under an
//! already-registered id is rejected with a conflict error rather than
//! silently replacing the prior cursor, which would make cancellation
//! ambiguous.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::engine::InterruptToken;
use crate::error::{GatewayError, Result};

#[derive(Default)]
struct Slot {
    /// Set by `interrupt` even before the worker has armed the slot, so a
    /// cancel that races query startup is still observed.
    cancelled: AtomicBool,
    token: Mutex<Option<Arc<dyn InterruptToken>>>,
}

/// Registry of live, interruptible query executions.
#[derive(Default)]
pub struct CursorRegistry {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl CursorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `query_id` before any work is submitted to the executor.
    ///
    /// Returns a guard that must travel with the execution; dropping it
    /// releases the registration on every exit path. Fails with
    /// `Conflict` if the id is already live.
    pub fn claim(self: &Arc<Self>, query_id: &str) -> Result<CursorGuard> {
        let mut slots = self.slots.lock();
        if slots.contains_key(query_id) {
            return Err(GatewayError::Conflict(query_id.to_string()));
        }
        let slot = Arc::new(Slot::default());
        slots.insert(query_id.to_string(), Arc::clone(&slot));
        Ok(CursorGuard {
            registry: Arc::clone(self),
            query_id: query_id.to_string(),
            slot,
        })
    }

    /// Signal the engine to abort the execution registered under
    /// `query_id`. Returns whether a registration was found.
    ///
    /// Safe to call concurrently with the worker that owns the cursor;
    /// interrupting an unknown or already-finished query is a tolerated
    /// race and simply returns `false`.
    pub fn interrupt(&self, query_id: &str) -> bool {
        let slot = {
            let slots = self.slots.lock();
            match slots.get(query_id) {
                Some(slot) => Arc::clone(slot),
                None => return false,
            }
        };
        // Fire while holding the token lock: the guard disarms under the
        // same lock when the execution ends, so the interrupt can never
        // land on whatever the session runs next.
        let token = slot.token.lock();
        slot.cancelled.store(true, Ordering::SeqCst);
        if let Some(token) = token.as_ref() {
            token.interrupt();
        }
        debug!("interrupt signalled for query '{query_id}'");
        true
    }

    /// Interrupt every live registration. Used on shutdown.
    pub fn interrupt_all(&self) -> usize {
        let ids: Vec<String> = self.slots.lock().keys().cloned().collect();
        let mut interrupted = 0;
        for id in ids {
            if self.interrupt(&id) {
                interrupted += 1;
            }
        }
        interrupted
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn release(&self, query_id: &str) {
        self.slots.lock().remove(query_id);
    }
}

/// RAII registration for one cancellable execution.
///
/// Created by [`CursorRegistry::claim`] on the dispatch path and moved into
/// the worker closure; the worker arms it with the live interrupt token
/// before executing. Dropping the guard unregisters the query id whether
/// the execution succeeded, failed, was interrupted, or never ran.
pub struct CursorGuard {
    registry: Arc<CursorRegistry>,
    query_id: String,
    slot: Arc<Slot>,
}

impl std::fmt::Debug for CursorGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorGuard")
            .field("query_id", &self.query_id)
            .finish_non_exhaustive()
    }
}

impl CursorGuard {
    /// Attach the live interrupt token for the execution about to start.
    ///
    /// Returns `false` if the query was already cancelled before the worker
    /// got to it, in which case the worker must not run the query.
    pub fn arm(&self, token: Arc<dyn InterruptToken>) -> bool {
        *self.slot.token.lock() = Some(token);
        !self.slot.cancelled.load(Ordering::SeqCst)
    }

    /// Whether an interrupt was signalled for this execution.
    pub fn interrupted(&self) -> bool {
        self.slot.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        // Disarm first: a cancel thread that already fetched this slot must
        // find no token once the execution is over, not a handle onto a
        // session that has moved on to another query.
        *self.slot.token.lock() = None;
        self.registry.release(&self.query_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlagToken(AtomicBool);

    impl InterruptToken for FlagToken {
        fn interrupt(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_claim_and_release_on_drop() {
        let registry = Arc::new(CursorRegistry::new());
        {
            let _guard = registry.claim("q1").unwrap();
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_claim_is_conflict() {
        let registry = Arc::new(CursorRegistry::new());
        let _guard = registry.claim("q1").unwrap();
        let err = registry.claim("q1").unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(id) if id == "q1"));

        // The first registration is untouched by the rejected claim.
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_claim_again_after_release() {
        let registry = Arc::new(CursorRegistry::new());
        drop(registry.claim("q1").unwrap());
        assert!(registry.claim("q1").is_ok());
    }

    #[test]
    fn test_interrupt_fires_armed_token() {
        let registry = Arc::new(CursorRegistry::new());
        let guard = registry.claim("q1").unwrap();
        let token = Arc::new(FlagToken(AtomicBool::new(false)));
        assert!(guard.arm(token.clone()));

        assert!(registry.interrupt("q1"));
        assert!(token.0.load(Ordering::SeqCst));
        assert!(guard.interrupted());
    }

    #[test]
    fn test_interrupt_before_arm_is_observed() {
        let registry = Arc::new(CursorRegistry::new());
        let guard = registry.claim("q1").unwrap();

        assert!(registry.interrupt("q1"));

        // The worker arrives late and must not run the query.
        let token = Arc::new(FlagToken(AtomicBool::new(false)));
        assert!(!guard.arm(token));
    }

    #[test]
    fn test_dropped_guard_disarms_its_token() {
        let registry = Arc::new(CursorRegistry::new());
        let guard = registry.claim("q1").unwrap();
        let token = Arc::new(FlagToken(AtomicBool::new(false)));
        assert!(guard.arm(token.clone()));

        // A cancel thread fetches the slot, but the execution finishes
        // before it fires; the token it would have used is gone.
        let slot = Arc::clone(registry.slots.lock().get("q1").unwrap());
        drop(guard);
        assert!(slot.token.lock().is_none());
        assert!(!token.0.load(Ordering::SeqCst));
    }

    #[test]
    fn test_interrupt_unknown_id_returns_false() {
        let registry = Arc::new(CursorRegistry::new());
        assert!(!registry.interrupt("nonexistent"));
    }

    #[test]
    fn test_interrupt_all() {
        let registry = Arc::new(CursorRegistry::new());
        let g1 = registry.claim("q1").unwrap();
        let g2 = registry.claim("q2").unwrap();
        assert_eq!(registry.interrupt_all(), 2);
        assert!(g1.interrupted());
        assert!(g2.interrupted());
    }
}
