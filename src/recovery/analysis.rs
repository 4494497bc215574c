//! Analysis pass
//!
//! Seeds the transaction picture from the last checkpoint's summaries,
//! then scans forward from the redo horizon replaying only bookkeeping:
//! which transactions exist, their bookmark chains, and how far each
//! got. Transactions that reached a terminal record drop out; the
//! survivors go to the undo pass or stay as loose ends.

use std::collections::BTreeMap;

use crate::checkpoint::CheckpointPayload;
use crate::errors::{EngineError, EngineResult};
use crate::log::{
    DataHeader, LogReader, LogStorage, Lsa, RecordType, Trid,
};
use crate::mvcc::{Mvccid, MVCCID_FIRST};
use crate::txn::{SysopAddresses, TransactionDescriptor, TransactionState};

/// What analysis hands to the later passes.
#[derive(Debug)]
pub struct AnalysisResult {
    /// Where redo must start.
    pub redo_lsa: Lsa,
    /// First MVCC id the restarted engine may allocate.
    pub next_mvccid: Mvccid,
    /// Transactions without a terminal record, rebuilt bookmarks and all.
    pub descriptors: Vec<TransactionDescriptor>,
}

fn seed_from_checkpoint(
    reader: &LogReader<'_>,
    storage: &dyn LogStorage,
    chkpt_lsa: Lsa,
) -> EngineResult<(Lsa, Mvccid, BTreeMap<Trid, TransactionDescriptor>)> {
    let marker = reader.read_record_at(storage, chkpt_lsa)?;
    let redo_lsa = match marker.data_header {
        DataHeader::Checkpoint { redo_lsa, .. } => redo_lsa,
        _ => {
            return Err(EngineError::Recovery(format!(
                "record at {} is not a checkpoint marker",
                chkpt_lsa
            )))
        }
    };
    // The summaries ride in the record staged immediately before the
    // marker, reachable through the stream back-link.
    let side = reader.read_record_at(storage, marker.header.back_lsa)?;
    if side.header.rec_type != RecordType::CheckpointTrans {
        return Err(EngineError::Recovery(
            "checkpoint marker without transaction summaries".into(),
        ));
    }
    let payload = CheckpointPayload::decode(&side.rdata)?;

    let mut map = BTreeMap::new();
    for summary in payload.trans {
        if summary.state.is_terminal() {
            continue;
        }
        let mut tdes = TransactionDescriptor::new(summary.trid);
        tdes.state = summary.state;
        tdes.head_lsa = summary.head_lsa;
        tdes.tail_lsa = summary.tail_lsa;
        tdes.undo_nxlsa = summary.undo_nxlsa;
        tdes.posp_nxlsa = summary.posp_nxlsa;
        tdes.mvccid = summary.mvccid;
        tdes.num_log_records = summary.num_log_records;
        map.insert(summary.trid, tdes);
    }
    for sysop in payload.sysops {
        if let Some(tdes) = map.get_mut(&sysop.trid) {
            tdes.topops.push(SysopAddresses {
                lastparent_lsa: sysop.lastparent_lsa,
                posp_lsa: sysop.posp_lsa,
            });
        }
    }
    Ok((payload.redo_lsa.min(redo_lsa), payload.next_mvccid, map))
}

/// Rebuild the live-transaction picture up to `end_lsa` (the durability
/// boundary at crash time). `chkpt_lsa` may be null for a log that never
/// checkpointed.
pub fn analyze(
    reader: &LogReader<'_>,
    storage: &dyn LogStorage,
    chkpt_lsa: Lsa,
    end_lsa: Lsa,
) -> EngineResult<AnalysisResult> {
    let (redo_lsa, next_mvccid, mut map) = if chkpt_lsa.is_null() {
        (Lsa::new(0, 0), MVCCID_FIRST, BTreeMap::new())
    } else {
        seed_from_checkpoint(reader, storage, chkpt_lsa)?
    };

    for (lsa, record) in reader.scan_forward(storage, redo_lsa, end_lsa)? {
        let trid = record.header.trid;
        if trid == crate::log::NULL_TRID {
            continue;
        }
        let tdes = map
            .entry(trid)
            .or_insert_with(|| TransactionDescriptor::new(trid));
        tdes.note_appended(lsa, &record);

        match record.header.rec_type {
            RecordType::Commit => {
                map.remove(&trid);
            }
            RecordType::Abort => {
                map.remove(&trid);
            }
            RecordType::StartPostpone => {
                // Commit is decided; only postpone replay remains.
                tdes.state = TransactionState::CommittedWithPostpone;
            }
            RecordType::EndPostpone => {
                tdes.posp_nxlsa = Lsa::NULL;
            }
            RecordType::SysopStart => {
                tdes.sysop_push();
            }
            RecordType::SysopEnd => {
                tdes.sysop_pop();
            }
            RecordType::TwoPcStart => {
                if let DataHeader::TwoPcStart { gtrid, .. } = record.data_header {
                    tdes.gtrid = Some(gtrid);
                }
                tdes.state = TransactionState::TwoPcCollectingVotes;
            }
            RecordType::TwoPcPrepare => {
                if let DataHeader::TwoPcPrepare { gtrid } = record.data_header {
                    tdes.gtrid = Some(gtrid);
                }
                tdes.state = TransactionState::TwoPcPrepare;
            }
            RecordType::TwoPcCommitDecision => {
                tdes.state = TransactionState::TwoPcCommitDecision;
            }
            RecordType::TwoPcAbortDecision => {
                tdes.state = TransactionState::TwoPcAbortDecision;
            }
            _ => {}
        }
    }

    // Sysop stacks seeded from the checkpoint use the scope's own base
    // as lastparent; the rebuild above already kept them consistent.
    let descriptors: Vec<TransactionDescriptor> = map.into_values().collect();
    Ok(AnalysisResult {
        redo_lsa,
        next_mvccid,
        descriptors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{
        DataHeader, LogAppender, LogRecord, PageBuffer, PriorQueue, RecordType, PAGE_HEADER_SIZE,
    };
    use crate::log::page_buffer::FileStorage;
    use tempfile::TempDir;

    const PAGE_SIZE: usize = 512;
    const AREA: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

    struct Fixture {
        prior: PriorQueue,
        appender: LogAppender,
        storage: FileStorage,
        pool: PageBuffer,
    }

    fn fixture(dir: &TempDir) -> Fixture {
        Fixture {
            prior: PriorQueue::new(Lsa::new(0, 0), AREA),
            appender: LogAppender::new(Lsa::new(0, 0), AREA),
            storage: FileStorage::open(dir.path().join("active.log"), PAGE_SIZE).unwrap(),
            pool: PageBuffer::new(16),
        }
    }

    fn data_record(trid: Trid) -> LogRecord {
        LogRecord::new(
            RecordType::DataUndoRedo,
            trid,
            DataHeader::Data {
                rcv_index: 0,
                page_id: 10,
                offset: 0,
            },
        )
        .with_udata(&[b"old"])
        .with_rdata(&[b"new"])
    }

    #[test]
    fn test_analysis_without_checkpoint() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);
        let mut t1 = TransactionDescriptor::new(1);
        let mut t2 = TransactionDescriptor::new(2);

        f.prior.push(data_record(1), &mut t1);
        f.prior.push(data_record(2), &mut t2);
        f.prior.push(
            LogRecord::new(RecordType::Commit, 1, DataHeader::None),
            &mut t1,
        );
        let end = f.prior.append_lsa();
        f.appender.flush(&f.prior, &f.storage, &f.pool).unwrap();

        let reader = LogReader::new(&f.pool, AREA);
        let result = analyze(&reader, &f.storage, Lsa::NULL, end).unwrap();

        // Transaction 1 committed; only 2 survives, still active.
        assert_eq!(result.descriptors.len(), 1);
        assert_eq!(result.descriptors[0].trid, 2);
        assert_eq!(result.descriptors[0].state, TransactionState::Active);
        assert!(!result.descriptors[0].undo_nxlsa.is_null());
    }

    #[test]
    fn test_prepared_transaction_survives_as_prepared() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);
        let mut t1 = TransactionDescriptor::new(1);
        f.prior.push(data_record(1), &mut t1);
        f.prior.push(
            LogRecord::new(
                RecordType::TwoPcPrepare,
                1,
                DataHeader::TwoPcPrepare { gtrid: 900 },
            ),
            &mut t1,
        );
        let end = f.prior.append_lsa();
        f.appender.flush(&f.prior, &f.storage, &f.pool).unwrap();

        let reader = LogReader::new(&f.pool, AREA);
        let result = analyze(&reader, &f.storage, Lsa::NULL, end).unwrap();
        assert_eq!(result.descriptors.len(), 1);
        assert_eq!(result.descriptors[0].state, TransactionState::TwoPcPrepare);
        assert_eq!(result.descriptors[0].gtrid, Some(900));
    }

    #[test]
    fn test_open_sysop_rebuilt() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);
        let mut t1 = TransactionDescriptor::new(1);
        f.prior.push(data_record(1), &mut t1);
        f.prior.push(
            LogRecord::new(RecordType::SysopStart, 1, DataHeader::None),
            &mut t1,
        );
        f.prior.push(data_record(1), &mut t1);
        let end = f.prior.append_lsa();
        f.appender.flush(&f.prior, &f.storage, &f.pool).unwrap();

        let reader = LogReader::new(&f.pool, AREA);
        let result = analyze(&reader, &f.storage, Lsa::NULL, end).unwrap();
        assert_eq!(result.descriptors[0].sysop_depth(), 1);
    }
}
