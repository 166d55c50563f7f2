//! Reservation-bounded output buffers for octant keys.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::map::OctantKey;

/// A fixed-capacity key buffer shared by the traversal threads.
///
/// Writers claim a slot with a fetch-and-add and skip the store when the
/// claimed index falls at or beyond the reservation, so the buffer is never
/// written out of bounds and no locks are needed. The final length is the
/// claimed count clamped to the reservation; a saturated list signals that
/// the caller should retry the frame with a larger reservation.
pub struct KeyList {
    slots: Box<[AtomicU64]>,
    claimed: AtomicUsize,
}

impl KeyList {
    /// Reserve space for up to `reserved` keys.
    pub fn with_capacity(reserved: usize) -> Self {
        let slots = (0..reserved).map(|_| AtomicU64::new(0)).collect();
        Self {
            slots,
            claimed: AtomicUsize::new(0),
        }
    }

    /// Append a key if the reservation still has room.
    pub fn push(&self, key: OctantKey) {
        let idx = self.claimed.fetch_add(1, Ordering::Relaxed);
        if idx < self.slots.len() {
            self.slots[idx].store(key.raw(), Ordering::Relaxed);
        }
    }

    /// Number of keys stored (claims clamped to the reservation).
    pub fn len(&self) -> usize {
        self.claimed.load(Ordering::Relaxed).min(self.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether keys were dropped because the reservation filled up.
    pub fn truncated(&self) -> bool {
        self.claimed.load(Ordering::Relaxed) > self.slots.len()
    }

    /// Snapshot the stored keys. Call after traversal has finished.
    pub fn keys(&self) -> Vec<OctantKey> {
        self.slots[..self.len()]
            .iter()
            .map(|slot| OctantKey::from_raw(slot.load(Ordering::Relaxed)))
            .collect()
    }

    /// Reset for reuse on the next frame.
    pub fn clear(&mut self) {
        self.claimed.store(0, Ordering::Relaxed);
    }
}
