//! Undo pass and rollback walks
//!
//! Rolling back a transaction walks its chain backwards from
//! `undo_nxlsa`, applying each undo payload and logging a compensation
//! record that both carries the change (for redo) and tells any later
//! restart where the walk resumes. A rollback interrupted by a crash
//! therefore never undoes the same change twice.
//!
//! The same walk serves runtime aborts, partial rollback to a savepoint
//! and the restart undo pass.

use crate::errors::EngineResult;
use crate::log::{
    DataHeader, LogReader, LogRecord, LogStorage, Lsa, PriorQueue, RecordType, SysopEndKind,
};
use crate::txn::{TransactionDescriptor, TransactionState};

use super::PageApplier;

/// Undo one transaction's changes back to `stop_at` (exclusive);
/// [`Lsa::NULL`] rolls back everything. Compensation records go through
/// the staging queue like any other append.
pub fn undo_one(
    reader: &LogReader<'_>,
    storage: &dyn LogStorage,
    prior: &PriorQueue,
    tdes: &mut TransactionDescriptor,
    applier: &mut dyn PageApplier,
    stop_at: Lsa,
) -> EngineResult<u64> {
    let mut undone = 0u64;
    loop {
        let cursor = tdes.undo_nxlsa;
        if cursor.is_null() || cursor <= stop_at {
            break;
        }
        let record = reader.read_record_at(storage, cursor)?;
        match (&record.header.rec_type, &record.data_header) {
            (RecordType::DataUndo | RecordType::DataUndoRedo, DataHeader::Data {
                rcv_index,
                page_id,
                offset,
            }) => {
                let compensate_lsa = prior.push(
                    LogRecord::new(
                        RecordType::Compensate,
                        tdes.trid,
                        DataHeader::Compensate {
                            undo_nxlsa: record.header.prev_tran_lsa,
                            rcv_index: *rcv_index,
                            page_id: *page_id,
                            offset: *offset,
                        },
                    )
                    .with_rdata(&[&record.udata]),
                    tdes,
                );
                applier.apply_undo(*rcv_index, *page_id, *offset, &record.udata, compensate_lsa);
                undone += 1;
                // note_appended already rewound undo_nxlsa to the
                // record's predecessor.
            }
            // A compensation from an earlier, interrupted rollback:
            // resume where it points, applying nothing.
            (RecordType::Compensate, DataHeader::Compensate { undo_nxlsa, .. }) => {
                tdes.undo_nxlsa = *undo_nxlsa;
            }
            (RecordType::SysopEnd, DataHeader::SysopEnd(h)) => match h.kind {
                // Physically committed scope: its changes are undone
                // record by record like the owner's own.
                SysopEndKind::Commit => {
                    tdes.undo_nxlsa = record.header.prev_tran_lsa;
                }
                // Logical undo replaces the physical walk of the scope.
                SysopEndKind::LogicalUndo { rcv_index } => {
                    applier.apply_undo(rcv_index, -1, -1, &record.udata, cursor);
                    undone += 1;
                    tdes.undo_nxlsa = h.lastparent_lsa;
                }
                // Aborted or already-compensated scopes are skipped.
                _ => {
                    tdes.undo_nxlsa = h.lastparent_lsa;
                }
            },
            _ => {
                tdes.undo_nxlsa = record.header.prev_tran_lsa;
            }
        }
    }
    Ok(undone)
}

/// Restart undo: roll back every analyzed transaction that never reached
/// an outcome, finishing each with an abort record. Prepared and
/// deciding 2PC transactions are left alone; their outcome is not ours
/// to invent.
pub fn undo_transactions(
    reader: &LogReader<'_>,
    storage: &dyn LogStorage,
    prior: &PriorQueue,
    descriptors: &mut Vec<TransactionDescriptor>,
    applier: &mut dyn PageApplier,
) -> EngineResult<usize> {
    let mut undone = 0;
    descriptors.retain_mut(|tdes| {
        if tdes.state.is_loose_end() || tdes.state == TransactionState::CommittedWithPostpone {
            return true;
        }
        // Active, collecting votes, or otherwise unresolved: roll back.
        if undo_one(reader, storage, prior, tdes, applier, Lsa::NULL).is_err() {
            return true;
        }
        prior.push(
            LogRecord::new(RecordType::Abort, tdes.trid, DataHeader::None),
            tdes,
        );
        tdes.state = TransactionState::UnilaterallyAborted;
        undone += 1;
        false
    });
    Ok(undone)
}
