//! MVCC completion status and snapshots
//!
//! [`MvccStatus`] tracks which MVCC ids have completed. Ids at or above
//! the window start live in a bit area (bit set = completed); the window
//! slides forward as its low words fill up. An id that stays active long
//! after its cohort completed would pin the window, so when the window
//! must slide past it the id moves to an explicit overflow list instead.
//!
//! A [`MvccSnapshot`] is an immutable copy of the status at a point in
//! time; visibility checks run against the copy without any lock.

use super::{Mvccid, MVCCID_NULL};

/// Maximum bit-area words before active stragglers overflow to the list.
pub const MAX_BITAREA_WORDS: usize = 32;

const WORD_BITS: usize = 64;

/// Mutable completion state.
#[derive(Debug, Clone)]
pub struct MvccStatus {
    /// One bit per id starting at `bit_area_start`; set means completed.
    bit_area: Vec<u64>,
    /// Id the first bit of the area corresponds to.
    bit_area_start: Mvccid,
    /// Number of meaningful bits (ids allocated at or above the start).
    bit_area_length: usize,
    /// Still-active ids the window has slid past.
    long_tran_mvccids: Vec<Mvccid>,
    /// Cached lowest active id, recomputed on every mutation.
    pub lowest_active: Mvccid,
    /// Highest id known completed.
    pub highest_completed: Mvccid,
    /// Bumped on every mutation; snapshot publication is keyed to it.
    pub version: u64,
}

impl MvccStatus {
    pub fn new(first_id: Mvccid) -> Self {
        Self {
            bit_area: Vec::new(),
            bit_area_start: first_id,
            bit_area_length: 0,
            long_tran_mvccids: Vec::new(),
            lowest_active: first_id,
            highest_completed: MVCCID_NULL,
            version: 0,
        }
    }

    /// Extend the window to cover a freshly allocated `id`.
    pub fn track(&mut self, id: Mvccid) {
        debug_assert!(id >= self.bit_area_start);
        let needed = (id - self.bit_area_start) as usize + 1;
        if needed > self.bit_area_length {
            self.bit_area_length = needed;
            let words = needed.div_ceil(WORD_BITS);
            if words > self.bit_area.len() {
                self.bit_area.resize(words, 0);
            }
        }
        self.spill_overflow();
        self.recompute_lowest_active();
        self.version += 1;
    }

    /// Mark `id` completed. Commit and abort look the same here; the
    /// distinction lives in the log, not the completion bit.
    pub fn complete(&mut self, id: Mvccid) {
        if id >= self.bit_area_start {
            let idx = (id - self.bit_area_start) as usize;
            if idx < self.bit_area_length {
                self.bit_area[idx / WORD_BITS] |= 1u64 << (idx % WORD_BITS);
            }
        } else {
            self.long_tran_mvccids.retain(|&t| t != id);
        }
        if id > self.highest_completed {
            self.highest_completed = id;
        }
        self.slide_window();
        self.recompute_lowest_active();
        self.version += 1;
    }

    /// True when `id` is completed according to this status.
    pub fn is_completed(&self, id: Mvccid) -> bool {
        if id == MVCCID_NULL {
            return false;
        }
        if id < self.bit_area_start {
            return !self.long_tran_mvccids.contains(&id);
        }
        let idx = (id - self.bit_area_start) as usize;
        if idx >= self.bit_area_length {
            return false;
        }
        self.bit_area[idx / WORD_BITS] & (1u64 << (idx % WORD_BITS)) != 0
    }

    /// Drop fully completed low words.
    fn slide_window(&mut self) {
        while !self.bit_area.is_empty()
            && self.bit_area_length >= WORD_BITS
            && self.bit_area[0] == u64::MAX
        {
            self.bit_area.remove(0);
            self.bit_area_start += WORD_BITS as Mvccid;
            self.bit_area_length -= WORD_BITS;
        }
    }

    /// Force the window under its size cap by moving still-active low ids
    /// to the overflow list.
    fn spill_overflow(&mut self) {
        while self.bit_area.len() > MAX_BITAREA_WORDS && self.bit_area_length >= WORD_BITS {
            let word = self.bit_area.remove(0);
            for bit in 0..WORD_BITS {
                if word & (1u64 << bit) == 0 {
                    self.long_tran_mvccids
                        .push(self.bit_area_start + bit as Mvccid);
                }
            }
            self.bit_area_start += WORD_BITS as Mvccid;
            self.bit_area_length -= WORD_BITS;
        }
    }

    fn recompute_lowest_active(&mut self) {
        let mut lowest = self.bit_area_start + self.bit_area_length as Mvccid;
        for idx in 0..self.bit_area_length {
            if self.bit_area[idx / WORD_BITS] & (1u64 << (idx % WORD_BITS)) == 0 {
                lowest = self.bit_area_start + idx as Mvccid;
                break;
            }
        }
        if let Some(&min_long) = self.long_tran_mvccids.iter().min() {
            if min_long < lowest {
                lowest = min_long;
            }
        }
        self.lowest_active = lowest;
    }

    pub fn overflow_len(&self) -> usize {
        self.long_tran_mvccids.len()
    }

    /// Freeze into a snapshot usable without locks.
    pub fn snapshot(&self) -> MvccSnapshot {
        MvccSnapshot {
            lowest_active: self.lowest_active,
            highest_completed: self.highest_completed,
            status: self.clone(),
        }
    }
}

/// Immutable point-in-time visibility oracle.
#[derive(Debug, Clone)]
pub struct MvccSnapshot {
    pub lowest_active: Mvccid,
    pub highest_completed: Mvccid,
    status: MvccStatus,
}

impl MvccSnapshot {
    /// Whether data stamped with `id` is visible to the snapshot holder
    /// (`own_id` is the holder's MVCC id, always visible to itself).
    pub fn is_visible(&self, id: Mvccid, own_id: Mvccid) -> bool {
        if id == MVCCID_NULL {
            // Unstamped data predates MVCC tracking.
            return true;
        }
        if id == own_id && own_id != MVCCID_NULL {
            return true;
        }
        if id < self.lowest_active {
            return true;
        }
        if id > self.highest_completed {
            return false;
        }
        self.status.is_completed(id)
    }

    /// Whether `id` was still running when the snapshot was taken.
    pub fn is_active(&self, id: Mvccid) -> bool {
        id != MVCCID_NULL && !self.status.is_completed(id) && id >= self.lowest_active
    }
}
