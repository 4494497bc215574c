//! The transaction table
//!
//! A fixed array of descriptor slots, each behind its own mutex so
//! slot-level work never serializes against unrelated transactions. A
//! separate structural mutex guards assignment bookkeeping (free-slot
//! hint, identifier counters). Client transactions count upwards from
//! 1; system workers count downwards from [`SYSTEM_WORKER_FIRST_TRID`].
//!
//! Lock order: structural lock before any slot lock; slot lock before
//! the prior-queue lock.

use std::sync::Mutex;

use serde::Serialize;

use crate::log::{Lsa, Trid, NULL_TRID};

use super::descriptor::TransactionDescriptor;
use super::errors::{TxnError, TxnResult};
use super::state::TransactionState;

/// First identifier handed to system workers, counting downwards.
pub const SYSTEM_WORKER_FIRST_TRID: Trid = NULL_TRID - 1;

struct TableMeta {
    num_assigned: usize,
    hint_free_index: usize,
    num_interrupts: u64,
    next_trid: Trid,
    next_system_trid: Trid,
}

/// Snapshot of one live transaction, for checkpoints and monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSummary {
    pub trid: Trid,
    pub state: TransactionState,
    pub head_lsa: Lsa,
    pub tail_lsa: Lsa,
    pub undo_nxlsa: Lsa,
    pub posp_nxlsa: Lsa,
    pub mvccid: u64,
    pub num_log_records: u64,
}

/// Fixed-capacity table of transaction descriptors.
pub struct TransactionTable {
    slots: Vec<Mutex<Option<TransactionDescriptor>>>,
    meta: Mutex<TableMeta>,
}

impl TransactionTable {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Mutex::new(None)).collect();
        Self {
            slots,
            meta: Mutex::new(TableMeta {
                num_assigned: 0,
                hint_free_index: 0,
                num_interrupts: 0,
                next_trid: 1,
                next_system_trid: SYSTEM_WORKER_FIRST_TRID,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn num_assigned(&self) -> usize {
        self.meta.lock().unwrap().num_assigned
    }

    fn assign_with(&self, make_trid: impl FnOnce(&mut TableMeta) -> Trid) -> TxnResult<(usize, Trid)> {
        let mut meta = self.meta.lock().unwrap();
        if meta.num_assigned == self.slots.len() {
            return Err(TxnError::NoFreeSlot);
        }
        let start = meta.hint_free_index;
        for probe in 0..self.slots.len() {
            let index = (start + probe) % self.slots.len();
            let mut slot = self.slots[index].lock().unwrap();
            if slot.is_none() {
                let trid = make_trid(&mut meta);
                *slot = Some(TransactionDescriptor::new(trid));
                meta.num_assigned += 1;
                meta.hint_free_index = (index + 1) % self.slots.len();
                return Ok((index, trid));
            }
        }
        Err(TxnError::NoFreeSlot)
    }

    /// Assign a slot to a new client transaction.
    pub fn assign(&self) -> TxnResult<(usize, Trid)> {
        self.assign_with(|meta| {
            let trid = meta.next_trid;
            meta.next_trid += 1;
            trid
        })
    }

    /// Assign a slot to a system worker, with a negative identifier.
    pub fn assign_system_worker(&self) -> TxnResult<(usize, Trid)> {
        self.assign_with(|meta| {
            let trid = meta.next_system_trid;
            meta.next_system_trid -= 1;
            trid
        })
    }

    /// Restore a descriptor rebuilt by recovery into a free slot.
    pub fn restore(&self, tdes: TransactionDescriptor) -> TxnResult<usize> {
        let mut meta = self.meta.lock().unwrap();
        if meta.num_assigned == self.slots.len() {
            return Err(TxnError::NoFreeSlot);
        }
        if tdes.trid >= meta.next_trid {
            meta.next_trid = tdes.trid + 1;
        }
        for (index, slot) in self.slots.iter().enumerate() {
            let mut slot = slot.lock().unwrap();
            if slot.is_none() {
                *slot = Some(tdes);
                meta.num_assigned += 1;
                return Ok(index);
            }
        }
        Err(TxnError::NoFreeSlot)
    }

    /// Run `f` against the descriptor in `index`. Errors when the slot is
    /// empty.
    pub fn with_tdes<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut TransactionDescriptor) -> R,
    ) -> TxnResult<R> {
        let mut slot = self.slots[index].lock().unwrap();
        match slot.as_mut() {
            Some(tdes) => Ok(f(tdes)),
            None => Err(TxnError::NotFound(NULL_TRID)),
        }
    }

    /// Find a transaction's slot by identifier.
    pub fn index_of(&self, trid: Trid) -> TxnResult<usize> {
        for (index, slot) in self.slots.iter().enumerate() {
            let slot = slot.lock().unwrap();
            if slot.as_ref().map(|t| t.trid) == Some(trid) {
                return Ok(index);
            }
        }
        Err(TxnError::NotFound(trid))
    }

    /// Release a finished transaction's slot. Only terminal descriptors
    /// without loose ends may leave the table.
    pub fn release(&self, index: usize) -> TxnResult<()> {
        let mut slot = self.slots[index].lock().unwrap();
        match slot.as_ref() {
            Some(tdes) if tdes.state.is_terminal() && !tdes.is_loose_end => {
                *slot = None;
                drop(slot);
                let mut meta = self.meta.lock().unwrap();
                meta.num_assigned -= 1;
                meta.hint_free_index = index;
                Ok(())
            }
            Some(tdes) => Err(TxnError::NotReleasable {
                trid: tdes.trid,
                state: tdes.state,
            }),
            None => Err(TxnError::NotFound(NULL_TRID)),
        }
    }

    /// Request an interrupt of the transaction in `index`.
    pub fn interrupt(&self, index: usize) -> TxnResult<()> {
        self.with_tdes(index, |tdes| tdes.interrupt.cancel())?;
        self.meta.lock().unwrap().num_interrupts += 1;
        Ok(())
    }

    pub fn num_interrupts(&self) -> u64 {
        self.meta.lock().unwrap().num_interrupts
    }

    /// Summaries of every assigned slot, for checkpoints and monitoring.
    pub fn enumerate(&self) -> Vec<TransactionSummary> {
        let mut out = Vec::new();
        for slot in &self.slots {
            let slot = slot.lock().unwrap();
            if let Some(tdes) = slot.as_ref() {
                out.push(TransactionSummary {
                    trid: tdes.trid,
                    state: tdes.state,
                    head_lsa: tdes.head_lsa,
                    tail_lsa: tdes.tail_lsa,
                    undo_nxlsa: tdes.undo_nxlsa,
                    posp_nxlsa: tdes.posp_nxlsa,
                    mvccid: tdes.mvccid,
                    num_log_records: tdes.num_log_records,
                });
            }
        }
        out
    }

    /// Every open system-operation scope across the table, paired with
    /// its owner. Checkpoints capture these alongside the transactions.
    pub fn enumerate_sysops(&self) -> Vec<(Trid, super::descriptor::SysopAddresses)> {
        let mut out = Vec::new();
        for slot in &self.slots {
            let slot = slot.lock().unwrap();
            if let Some(tdes) = slot.as_ref() {
                for addresses in &tdes.topops {
                    out.push((tdes.trid, *addresses));
                }
            }
        }
        out
    }

    /// Oldest un-flushed record address across live transactions, the
    /// undo half of the checkpoint redo horizon.
    pub fn min_head_lsa(&self) -> Lsa {
        let mut min = Lsa::NULL;
        for slot in &self.slots {
            let slot = slot.lock().unwrap();
            if let Some(tdes) = slot.as_ref() {
                if tdes.has_logged() && (min.is_null() || tdes.head_lsa < min) {
                    min = tdes.head_lsa;
                }
            }
        }
        min
    }
}
