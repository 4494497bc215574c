//! Transaction descriptors
//!
//! A [`TransactionDescriptor`] (TDES) is everything the engine knows
//! about one transaction: its identity, state, the bookmarks into its
//! log chain, the system-operation stack, MVCC id, distributed
//! coordination info and pending unique-statistics deltas. The staging
//! queue rolls the bookmarks forward as records are assigned LSAs; undo
//! and postpone walk them backwards.

use std::collections::HashMap;

use crate::log::{DataHeader, LogRecord, Lsa, RecordType, Trid, NULL_TRID};
use crate::mvcc::{Mvccid, MVCCID_NULL};
use crate::stats::{BtreeId, UniqueStatsDelta};
use crate::sync::CancelToken;

use super::errors::{TxnError, TxnResult};
use super::state::TransactionState;

/// Who is on the other end of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user: String,
    pub program: String,
    pub host: String,
    pub process_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// One level of the system-operation stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysopAddresses {
    /// Owner's last record before this scope opened.
    pub lastparent_lsa: Lsa,
    /// First postpone record logged inside this scope.
    pub posp_lsa: Lsa,
}

/// Addresses recovery needs to resume interrupted multi-step work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryBookmarks {
    pub sysop_start_postpone_lsa: Lsa,
    pub tran_start_postpone_lsa: Lsa,
    pub atomic_sysop_start_lsa: Lsa,
}

/// Opaque participant address in a distributed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantId(pub Vec<u8>);

/// Coordinator-side bookkeeping for a global transaction.
#[derive(Debug, Clone)]
pub struct CoordinatorInfo {
    pub participants: Vec<ParticipantId>,
    pub ack_received: Vec<bool>,
}

impl CoordinatorInfo {
    pub fn new(participants: Vec<ParticipantId>) -> Self {
        let acks = vec![false; participants.len()];
        Self {
            participants,
            ack_received: acks,
        }
    }

    pub fn ack(&mut self, index: usize) {
        if let Some(flag) = self.ack_received.get_mut(index) {
            *flag = true;
        }
    }

    pub fn all_acked(&self) -> bool {
        self.ack_received.iter().all(|&a| a)
    }
}

/// Per-transaction descriptor.
#[derive(Debug, Clone)]
pub struct TransactionDescriptor {
    pub trid: Trid,
    pub state: TransactionState,
    pub isolation: IsolationLevel,
    pub client: Option<ClientIdentity>,

    /// First record of this transaction.
    pub head_lsa: Lsa,
    /// Most recent record of this transaction.
    pub tail_lsa: Lsa,
    /// Next record the undo walk would visit.
    pub undo_nxlsa: Lsa,
    /// Next postpone record to execute.
    pub posp_nxlsa: Lsa,
    /// Most recent savepoint record.
    pub savept_lsa: Lsa,
    /// Most recent system-operation result record.
    pub tail_topresult_lsa: Lsa,

    /// Open system-operation scopes, innermost last.
    pub topops: Vec<SysopAddresses>,
    pub rcv: RecoveryBookmarks,

    pub mvccid: Mvccid,
    /// Global transaction id when participating in 2PC.
    pub gtrid: Option<i64>,
    pub coordinator: Option<CoordinatorInfo>,

    /// Unique-index statistic deltas to apply at commit.
    pub unique_stats: HashMap<BtreeId, UniqueStatsDelta>,
    pub interrupt: CancelToken,
    /// Survives restart awaiting a distributed outcome.
    pub is_loose_end: bool,
    pub num_log_records: u64,
}

impl TransactionDescriptor {
    pub fn new(trid: Trid) -> Self {
        Self {
            trid,
            state: TransactionState::Active,
            isolation: IsolationLevel::ReadCommitted,
            client: None,
            head_lsa: Lsa::NULL,
            tail_lsa: Lsa::NULL,
            undo_nxlsa: Lsa::NULL,
            posp_nxlsa: Lsa::NULL,
            savept_lsa: Lsa::NULL,
            tail_topresult_lsa: Lsa::NULL,
            topops: Vec::new(),
            rcv: RecoveryBookmarks::default(),
            mvccid: MVCCID_NULL,
            gtrid: None,
            coordinator: None,
            unique_stats: HashMap::new(),
            interrupt: CancelToken::new(),
            is_loose_end: false,
            num_log_records: 0,
        }
    }

    /// System workers log under negative identifiers below [`NULL_TRID`].
    pub fn is_system_worker(&self) -> bool {
        self.trid < NULL_TRID
    }

    pub fn has_logged(&self) -> bool {
        !self.head_lsa.is_null()
    }

    /// Validated state transition.
    pub fn set_state(&mut self, to: TransactionState) -> TxnResult<()> {
        if !self.state.can_transition_to(to) {
            return Err(TxnError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Roll the bookmarks forward for a record just assigned `lsa`.
    /// Called by the staging queue under its lock.
    pub fn note_appended(&mut self, lsa: Lsa, record: &LogRecord) {
        self.num_log_records += 1;
        if self.head_lsa.is_null() {
            self.head_lsa = lsa;
        }
        self.tail_lsa = lsa;

        match record.header.rec_type {
            RecordType::DataUndo | RecordType::DataUndoRedo => {
                self.undo_nxlsa = lsa;
            }
            RecordType::Compensate => {
                // The compensation tells the undo walk where to resume.
                if let DataHeader::Compensate { undo_nxlsa, .. } = record.data_header {
                    self.undo_nxlsa = undo_nxlsa;
                }
            }
            RecordType::SysopEnd => {
                if let DataHeader::SysopEnd(h) = &record.data_header {
                    self.tail_topresult_lsa = lsa;
                    self.undo_nxlsa = h.lastparent_lsa;
                }
            }
            RecordType::Savepoint => {
                self.savept_lsa = lsa;
            }
            RecordType::Postpone => {
                // First deferred action anchors the postpone chain.
                if self.posp_nxlsa.is_null() {
                    self.posp_nxlsa = lsa;
                }
            }
            RecordType::StartPostpone => {
                if let DataHeader::StartPostpone { posp_lsa } = record.data_header {
                    self.posp_nxlsa = posp_lsa;
                }
            }
            _ => {}
        }
    }

    /// Open a system-operation scope rooted at the current tail.
    pub fn sysop_push(&mut self) {
        self.topops.push(SysopAddresses {
            lastparent_lsa: self.tail_lsa,
            posp_lsa: Lsa::NULL,
        });
    }

    /// Close the innermost scope, returning its addresses.
    pub fn sysop_pop(&mut self) -> Option<SysopAddresses> {
        self.topops.pop()
    }

    pub fn sysop_depth(&self) -> usize {
        self.topops.len()
    }

    /// Merge a unique-statistics delta to be reflected at commit.
    pub fn accumulate_unique_stats(&mut self, btid: BtreeId, delta: UniqueStatsDelta) {
        let entry = self.unique_stats.entry(btid).or_default();
        entry.num_keys += delta.num_keys;
        entry.num_nulls += delta.num_nulls;
        entry.num_objects += delta.num_objects;
    }
}
