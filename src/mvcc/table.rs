//! The MVCC table
//!
//! Allocation of new ids is serialized on one mutex; that same order is
//! the order ids enter the completion window, so the window never has
//! holes it does not know about. Every mutation publishes an immutable
//! status copy into a power-of-two history ring. Snapshot takers read
//! from the ring with a position-check retry loop instead of taking the
//! mutation lock, and park their snapshot's lowest-active id in a
//! per-slot atomic so the global oldest-active bound is a lock-free min.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::status::{MvccSnapshot, MvccStatus};
use super::{Mvccid, MVCCID_FIRST, MVCCID_NULL};

/// History ring capacity. Power of two so positions wrap with a mask.
pub const HISTORY_SIZE: usize = 2048;

/// Tracks id allocation, completion and snapshot publication.
pub struct MvccTable {
    next_id: Mutex<Mvccid>,
    active: Mutex<MvccStatus>,
    history: Vec<Mutex<Arc<MvccStatus>>>,
    history_pos: AtomicUsize,
    /// Per transaction slot: the lowest-active id its snapshot pinned,
    /// [`MVCCID_NULL`] when the slot holds no snapshot.
    tran_lowest_active: Vec<AtomicU64>,
}

impl MvccTable {
    pub fn new(max_transactions: usize) -> Self {
        Self::starting_at(MVCCID_FIRST, max_transactions)
    }

    /// A table whose next allocated id is `next`, for recovery restarts.
    pub fn starting_at(next: Mvccid, max_transactions: usize) -> Self {
        let initial = Arc::new(MvccStatus::new(next));
        let history = (0..HISTORY_SIZE)
            .map(|_| Mutex::new(Arc::clone(&initial)))
            .collect();
        let tran_lowest_active = (0..max_transactions)
            .map(|_| AtomicU64::new(MVCCID_NULL))
            .collect();
        Self {
            next_id: Mutex::new(next),
            active: Mutex::new(MvccStatus::new(next)),
            history,
            history_pos: AtomicUsize::new(0),
            tran_lowest_active,
        }
    }

    fn publish(&self, status: &MvccStatus) {
        let copy = Arc::new(status.clone());
        let pos = self.history_pos.load(Ordering::Acquire).wrapping_add(1);
        *self.history[pos & (HISTORY_SIZE - 1)].lock().unwrap() = copy;
        self.history_pos.store(pos, Ordering::Release);
    }

    /// Allocate the next MVCC id for the transaction in `slot`.
    /// Allocation order and window order are the same order.
    pub fn allocate(&self, slot: usize) -> Mvccid {
        let mut next = self.next_id.lock().unwrap();
        let id = *next;
        *next += 1;
        let mut active = self.active.lock().unwrap();
        active.track(id);
        self.publish(&active);
        drop(active);
        drop(next);
        // A transaction's own id pins the oldest-active bound even
        // before it takes a snapshot.
        self.pin_lowest(slot, id);
        id
    }

    /// Mark `id` completed. The commit/abort distinction is carried by
    /// the log records, not the completion bit.
    pub fn complete(&self, slot: usize, id: Mvccid) {
        if id == MVCCID_NULL {
            return;
        }
        let mut active = self.active.lock().unwrap();
        active.complete(id);
        self.publish(&active);
        drop(active);
        self.tran_lowest_active[slot].store(MVCCID_NULL, Ordering::Release);
    }

    fn pin_lowest(&self, slot: usize, id: Mvccid) {
        let current = self.tran_lowest_active[slot].load(Ordering::Acquire);
        if current == MVCCID_NULL || id < current {
            self.tran_lowest_active[slot].store(id, Ordering::Release);
        }
    }

    /// Take a snapshot for the transaction in `slot` without blocking
    /// mutators: read the latest published status, retrying if a
    /// publication raced past.
    pub fn snapshot(&self, slot: usize) -> MvccSnapshot {
        loop {
            let pos = self.history_pos.load(Ordering::Acquire);
            let status = Arc::clone(&self.history[pos & (HISTORY_SIZE - 1)].lock().unwrap());
            if self.history_pos.load(Ordering::Acquire) == pos {
                self.pin_lowest(slot, status.lowest_active);
                return status.snapshot();
            }
        }
    }

    /// Release the snapshot pin of `slot` (transaction finished without
    /// an id of its own).
    pub fn release_slot(&self, slot: usize) {
        self.tran_lowest_active[slot].store(MVCCID_NULL, Ordering::Release);
    }

    /// Globally oldest id that may still be active: the min over every
    /// slot's pinned bound and the live lowest-active.
    pub fn oldest_active(&self) -> Mvccid {
        let mut oldest = self.active.lock().unwrap().lowest_active;
        for slot in &self.tran_lowest_active {
            let pinned = slot.load(Ordering::Acquire);
            if pinned != MVCCID_NULL && pinned < oldest {
                oldest = pinned;
            }
        }
        oldest
    }

    /// Highest id handed out so far, [`MVCCID_NULL`] if none.
    pub fn highest_allocated(&self) -> Mvccid {
        let next = *self.next_id.lock().unwrap();
        if next == MVCCID_FIRST {
            MVCCID_NULL
        } else {
            next - 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_monotonic() {
        let table = MvccTable::new(8);
        let a = table.allocate(0);
        let b = table.allocate(1);
        let c = table.allocate(2);
        assert!(a < b && b < c);
        assert_eq!(table.highest_allocated(), c);
    }

    #[test]
    fn test_snapshot_excludes_concurrent_writer() {
        let table = MvccTable::new(8);
        let writer = table.allocate(0);
        let snap = table.snapshot(1);
        assert!(!snap.is_visible(writer, MVCCID_NULL));

        table.complete(0, writer);
        // A new snapshot sees it; the old one still does not.
        let snap2 = table.snapshot(1);
        assert!(snap2.is_visible(writer, MVCCID_NULL));
        assert!(!snap.is_visible(writer, MVCCID_NULL));
    }

    #[test]
    fn test_oldest_active_pinned_by_snapshot() {
        let table = MvccTable::new(8);
        let writer = table.allocate(0);
        table.snapshot(1);
        table.complete(0, writer);
        // Slot 1's snapshot still pins the writer's cohort.
        assert!(table.oldest_active() <= writer);
        table.release_slot(1);
        assert!(table.oldest_active() > writer);
    }

    #[test]
    fn test_abort_completes_like_commit() {
        let table = MvccTable::new(8);
        let id = table.allocate(0);
        table.complete(0, id);
        let snap = table.snapshot(1);
        // Completion makes the id non-active; the log decides whether its
        // effects survive.
        assert!(!snap.is_active(id));
    }

    #[test]
    fn test_restart_continues_id_space() {
        let table = MvccTable::starting_at(100, 4);
        let id = table.allocate(0);
        assert_eq!(id, 100);
        let snap = table.snapshot(1);
        // Everything below the restart point reads as completed.
        assert!(snap.is_visible(99, MVCCID_NULL));
    }
}
