//! In-flight operation registry.
//!
//! Every transfer a session submits is anchored here before it reaches
//! the transport and acknowledged after its completion handler has run.
//! Drain uses the registry to wait for quiescence and to find what to
//! force-cancel. The acknowledgment, not the cancel call, is what proves
//! a completion handler is no longer touching session state.
//!
//! The table is a fixed array so anchoring from completion context never
//! allocates.

use crate::sync::{lock, wait_while_timeout};
use launcher_common::usb::transport::{TransferId, TransferKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Upper bound of simultaneously anchored transfers per session
/// (status poll + command + correction, with headroom).
pub const MAX_IN_FLIGHT: usize = 4;

/// Why a transfer could not be anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorError {
    /// The registry is being drained; new submissions are refused.
    Poisoned,
    /// All slots are taken.
    Full,
}

#[derive(Debug, Default)]
struct Anchor {
    slots: [Option<(TransferId, TransferKind)>; MAX_IN_FLIGHT],
    poisoned: bool,
}

impl Anchor {
    fn count(&self, filter: &impl Fn(TransferKind) -> bool) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|(_, kind)| filter(*kind))
            .count()
    }
}

/// Registry of outstanding transfers of one session.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    anchor: Mutex<Anchor>,
    idle: Condvar,
    next_id: AtomicU64,
}

impl InFlightRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh transfer id.
    pub fn next_id(&self) -> TransferId {
        TransferId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Record a transfer as outstanding. Must precede submission.
    pub fn anchor(&self, id: TransferId, kind: TransferKind) -> Result<(), AnchorError> {
        let mut anchor = lock(&self.anchor);
        if anchor.poisoned {
            return Err(AnchorError::Poisoned);
        }
        match anchor.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some((id, kind));
                Ok(())
            }
            None => Err(AnchorError::Full),
        }
    }

    /// One-shot acknowledgment: the transfer's completion has been fully handled
    /// (or its submission failed). Wakes drain waiters.
    pub fn acknowledge(&self, id: TransferId) {
        let mut anchor = lock(&self.anchor);
        for slot in anchor.slots.iter_mut() {
            if matches!(slot, Some((slot_id, _)) if *slot_id == id) {
                *slot = None;
            }
        }
        drop(anchor);
        self.idle.notify_all();
    }

    /// Number of outstanding transfers.
    pub fn outstanding(&self) -> usize {
        lock(&self.anchor).count(&|_| true)
    }

    /// Number of outstanding transfers of one kind.
    pub fn outstanding_of(&self, kind: TransferKind) -> usize {
        lock(&self.anchor).count(&|k| k == kind)
    }

    /// Whether a specific transfer is still anchored.
    pub fn contains(&self, id: TransferId) -> bool {
        lock(&self.anchor)
            .slots
            .iter()
            .flatten()
            .any(|(slot_id, _)| *slot_id == id)
    }

    /// Ids of outstanding transfers accepted by `filter`.
    pub fn snapshot(&self, filter: impl Fn(TransferKind) -> bool) -> Vec<TransferId> {
        lock(&self.anchor)
            .slots
            .iter()
            .flatten()
            .filter(|(_, kind)| filter(*kind))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Wait until no transfer accepted by `filter` is outstanding.
    ///
    /// Returns true if that state was reached within `timeout`.
    pub fn wait_idle(&self, timeout: Duration, filter: impl Fn(TransferKind) -> bool) -> bool {
        let guard = lock(&self.anchor);
        let (_guard, timed_out) =
            wait_while_timeout(&self.idle, guard, timeout, |anchor| anchor.count(&filter) > 0);
        !timed_out
    }

    /// Wait until every listed transfer has been acknowledged.
    pub fn wait_acknowledged(&self, ids: &[TransferId], timeout: Duration) -> bool {
        let guard = lock(&self.anchor);
        let (_guard, timed_out) = wait_while_timeout(&self.idle, guard, timeout, |anchor| {
            anchor
                .slots
                .iter()
                .flatten()
                .any(|(id, _)| ids.contains(id))
        });
        !timed_out
    }

    /// Refuse new anchors until [`InFlightRegistry::unpoison`].
    pub fn poison(&self) {
        lock(&self.anchor).poisoned = true;
    }

    /// Accept new anchors again.
    pub fn unpoison(&self) {
        lock(&self.anchor).poisoned = false;
    }

    /// Whether new anchors are refused.
    pub fn is_poisoned(&self) -> bool {
        lock(&self.anchor).poisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ids_are_unique_and_nonzero() {
        let registry = InFlightRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
        assert_ne!(a, TransferId(0));
    }

    #[test]
    fn test_anchor_and_acknowledge() {
        let registry = InFlightRegistry::new();
        let id = registry.next_id();
        registry.anchor(id, TransferKind::Command).unwrap();
        assert_eq!(registry.outstanding(), 1);
        assert_eq!(registry.outstanding_of(TransferKind::StatusPoll), 0);
        assert!(registry.contains(id));

        registry.acknowledge(id);
        assert_eq!(registry.outstanding(), 0);
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_poison_refuses_new_anchors() {
        let registry = InFlightRegistry::new();
        registry.poison();
        assert_eq!(
            registry.anchor(registry.next_id(), TransferKind::StatusPoll),
            Err(AnchorError::Poisoned)
        );
        registry.unpoison();
        assert!(registry.anchor(registry.next_id(), TransferKind::StatusPoll).is_ok());
    }

    #[test]
    fn test_full_table() {
        let registry = InFlightRegistry::new();
        for _ in 0..MAX_IN_FLIGHT {
            registry.anchor(registry.next_id(), TransferKind::Command).unwrap();
        }
        assert_eq!(
            registry.anchor(registry.next_id(), TransferKind::Command),
            Err(AnchorError::Full)
        );
    }

    #[test]
    fn test_wait_idle_filters_by_kind() {
        let registry = InFlightRegistry::new();
        registry.anchor(registry.next_id(), TransferKind::StatusPoll).unwrap();
        assert!(registry.wait_idle(Duration::from_millis(5), |k| k != TransferKind::StatusPoll));
        assert!(!registry.wait_idle(Duration::from_millis(5), |_| true));
        assert_eq!(registry.snapshot(|_| true).len(), 1);
    }

    #[test]
    fn test_acknowledge_wakes_waiter() {
        let registry = Arc::new(InFlightRegistry::new());
        let id = registry.next_id();
        registry.anchor(id, TransferKind::Correction).unwrap();

        let acker = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                registry.acknowledge(id);
            })
        };

        assert!(registry.wait_acknowledged(&[id], Duration::from_secs(2)));
        acker.join().unwrap();
    }
}
