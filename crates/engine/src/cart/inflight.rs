//! Per-target in-flight guard.
//!
//! At most one mutation runs per key. A second attempt while the first is
//! outstanding is refused outright; nothing is queued.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cartsync_core::{LineId, ProductId};

/// What a mutation is acting on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum InFlightKey {
    /// An existing cart line (update, remove).
    Line(LineId),
    /// A product being added.
    Product(ProductId),
    /// The whole cart (clear).
    Cart,
}

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    keys: Mutex<HashSet<InFlightKey>>,
}

impl InFlight {
    /// Claim `key`, or `None` if a mutation for it is already running.
    pub(crate) fn try_acquire(&self, key: InFlightKey) -> Option<InFlightGuard<'_>> {
        let claimed = self.lock().insert(key.clone());
        if claimed {
            Some(InFlightGuard { owner: self, key })
        } else {
            None
        }
    }

    pub(crate) fn is_busy(&self, key: &InFlightKey) -> bool {
        self.lock().contains(key)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<InFlightKey>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases its key when dropped, whatever the mutation's outcome.
#[derive(Debug)]
pub(crate) struct InFlightGuard<'a> {
    owner: &'a InFlight,
    key: InFlightKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let in_flight = InFlight::default();
        let key = InFlightKey::Line(LineId::new("l1"));

        let guard = in_flight.try_acquire(key.clone());
        assert!(guard.is_some());
        assert!(in_flight.try_acquire(key.clone()).is_none());
        assert!(in_flight.is_busy(&key));

        drop(guard);
        assert!(!in_flight.is_busy(&key));
        assert!(in_flight.try_acquire(key).is_some());
    }

    #[test]
    fn test_keys_are_independent() {
        let in_flight = InFlight::default();
        let _a = in_flight.try_acquire(InFlightKey::Line(LineId::new("l1")));
        assert!(in_flight.try_acquire(InFlightKey::Line(LineId::new("l2"))).is_some());
        assert!(in_flight.try_acquire(InFlightKey::Product(ProductId::new("l1"))).is_some());
        assert!(in_flight.try_acquire(InFlightKey::Cart).is_some());
    }
}
