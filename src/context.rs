//! The engine context
//!
//! [`LogEngineContext`] owns every component of the log core and exposes
//! the operation surface: transaction lifecycle, record appends,
//! durability, system operations, savepoints, postpone replay,
//! checkpoints, two-phase commit and restart recovery. There is no
//! global instance; embedders construct as many contexts as they need
//! and every operation goes through one.
//!
//! Commit ordering is fixed: the commit record is appended, made
//! durable, and only then are MVCC completion, statistics reflection and
//! the state transition performed. Nothing is acknowledged before the
//! log says so.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::checkpoint::{
    compute_redo_horizon, CheckpointPayload, CheckpointSysopSummary, CheckpointTransSummary,
};
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::log::{
    ArchiveManager, DataHeader, FileStorage, GroupCommitManager, LogAppender, LogError,
    LogReader, LogRecord, LogStorage, Lsa, PageBuffer, PriorQueue, RecordType,
    RemoteWriterRegistry, RemoteWriterStatus, SysopEndHeader, SysopEndKind, Trid, NULL_TRID,
};
use crate::mvcc::{MvccSnapshot, MvccTable, Mvccid, MVCCID_NULL};
use crate::observability::{Logger, Severity};
use crate::recovery::{
    analyze, finish_2pc, redo_pass, undo_one, undo_transactions, PageApplier, RecoveryPhase,
    RecoveryReport,
};
use crate::stats::UniqueStatsTable;
use crate::sync::SectionLock;
use crate::twopc::{decide, Decision, Transport, TwoPcError, Vote};
use crate::txn::{
    CoordinatorInfo, ParticipantId, TransactionDescriptor, TransactionState, TransactionSummary,
    TransactionTable, TxnError,
};

const HEADER_FILE_NAME: &str = "log_header.json";
const ACTIVE_FILE_NAME: &str = "active.log";
const ARCHIVE_DIR_NAME: &str = "archives";

/// Persistent header: where the log ends and where recovery starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogHeader {
    chkpt_lsa: Lsa,
    chkpt_redo_lsa: Lsa,
    /// Durability boundary at the last persisted flush.
    append_lsa: Lsa,
    /// First page still in the active file (older ones are archived).
    first_active_page: i64,
}

impl Default for LogHeader {
    fn default() -> Self {
        Self {
            chkpt_lsa: Lsa::NULL,
            chkpt_redo_lsa: Lsa::NULL,
            append_lsa: Lsa::new(0, 0),
            first_active_page: 0,
        }
    }
}

/// Opaque handle to a live transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHandle {
    pub index: usize,
    pub trid: Trid,
}

/// Owns the log core. See the module docs for the operation surface.
pub struct LogEngineContext {
    config: EngineConfig,
    header: Mutex<LogHeader>,
    header_path: PathBuf,
    /// Appends hold the read side; checkpoint and recovery the write side.
    log_section: SectionLock,
    prior: PriorQueue,
    appender: LogAppender,
    storage: FileStorage,
    pool: PageBuffer,
    group_commit: GroupCommitManager,
    writers: RemoteWriterRegistry,
    archive: ArchiveManager,
    trantable: TransactionTable,
    mvcc: MvccTable,
    unique_stats: UniqueStatsTable,
}

impl LogEngineContext {
    /// Open a fresh engine rooted at the config's log directory.
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        Self::build(config, LogHeader::default(), MVCCID_NULL + 1)
    }

    fn build(config: EngineConfig, header: LogHeader, next_mvccid: Mvccid) -> EngineResult<Self> {
        fs::create_dir_all(&config.log_dir).map_err(|e| {
            LogError::fatal(
                "create log dir",
                LogError::flush_failed("create log dir", e),
            )
        })?;
        let area_size = config.area_size();
        let start = header.append_lsa;
        let storage = FileStorage::open(config.log_dir.join(ACTIVE_FILE_NAME), config.page_size)?;
        let archive = ArchiveManager::open(config.log_dir.join(ARCHIVE_DIR_NAME), config.page_size)?;
        let header_path = config.log_dir.join(HEADER_FILE_NAME);
        let ctx = Self {
            prior: PriorQueue::new(start, area_size),
            appender: LogAppender::new(start, area_size),
            pool: PageBuffer::new(config.page_buffer_capacity),
            group_commit: GroupCommitManager::new(config.group_commit),
            writers: RemoteWriterRegistry::new(),
            trantable: TransactionTable::new(config.max_transactions),
            mvcc: MvccTable::starting_at(next_mvccid.max(1), config.max_transactions),
            unique_stats: UniqueStatsTable::new(1024),
            header: Mutex::new(header),
            header_path,
            log_section: SectionLock::new(),
            storage,
            archive,
            config,
        };
        ctx.save_header()?;
        Ok(ctx)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn save_header(&self) -> EngineResult<()> {
        let header = self.header.lock().unwrap().clone();
        let data = serde_json::to_vec_pretty(&header)?;
        let tmp = self.header_path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(|e| {
            LogError::fatal("save header", LogError::flush_failed("write header", e))
        })?;
        fs::rename(&tmp, &self.header_path).map_err(|e| {
            LogError::fatal("save header", LogError::flush_failed("install header", e))
        })?;
        Ok(())
    }

    fn reader(&self) -> LogReader<'_> {
        LogReader::with_archive(&self.pool, &self.archive, self.config.area_size())
    }

    fn check_writable(&self) -> EngineResult<()> {
        if self.config.read_only {
            return Err(TxnError::ModificationsDisabled.into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transaction lifecycle
    // ------------------------------------------------------------------

    pub fn begin_transaction(&self) -> EngineResult<TransactionHandle> {
        let (index, trid) = self.trantable.assign()?;
        Ok(TransactionHandle { index, trid })
    }

    /// Begin an engine-internal worker (negative identifier).
    pub fn begin_system_worker(&self) -> EngineResult<TransactionHandle> {
        let (index, trid) = self.trantable.assign_system_worker()?;
        Ok(TransactionHandle { index, trid })
    }

    pub fn interrupt_transaction(&self, trid: Trid) -> EngineResult<()> {
        let index = self.trantable.index_of(trid)?;
        self.trantable.interrupt(index)?;
        Ok(())
    }

    pub fn enumerate_transactions(&self) -> Vec<TransactionSummary> {
        self.trantable.enumerate()
    }

    // ------------------------------------------------------------------
    // Appending
    // ------------------------------------------------------------------

    /// Append a record for the transaction in `handle`, returning its
    /// assigned address. Data records allocate the transaction's MVCC id
    /// on first use.
    pub fn append_record(
        &self,
        handle: TransactionHandle,
        rec_type: RecordType,
        data_header: DataHeader,
        ucrumbs: &[&[u8]],
        rcrumbs: &[&[u8]],
    ) -> EngineResult<Lsa> {
        self.check_writable()?;
        let _section = self.log_section.read();
        let needs_mvccid = matches!(
            rec_type,
            RecordType::DataUndo | RecordType::DataRedo | RecordType::DataUndoRedo
        );
        let record = LogRecord::new(rec_type, handle.trid, data_header)
            .with_udata(ucrumbs)
            .with_rdata(rcrumbs);
        let lsa = self.trantable.with_tdes(handle.index, |tdes| {
            if needs_mvccid && tdes.mvccid == MVCCID_NULL {
                tdes.mvccid = self.mvcc.allocate(handle.index);
            }
            self.prior.push(record, tdes)
        })?;
        Ok(lsa)
    }

    /// Convenience append for an in-place update with undo and redo.
    pub fn log_update(
        &self,
        handle: TransactionHandle,
        rcv_index: u32,
        page_id: i64,
        offset: i32,
        undo: &[u8],
        redo: &[u8],
    ) -> EngineResult<Lsa> {
        self.append_record(
            handle,
            RecordType::DataUndoRedo,
            DataHeader::Data {
                rcv_index,
                page_id,
                offset,
            },
            &[undo],
            &[redo],
        )
    }

    /// Register a deferred action executed only once commit is decided.
    pub fn log_postpone(
        &self,
        handle: TransactionHandle,
        rcv_index: u32,
        page_id: i64,
        offset: i32,
        redo: &[u8],
    ) -> EngineResult<Lsa> {
        self.append_record(
            handle,
            RecordType::Postpone,
            DataHeader::Data {
                rcv_index,
                page_id,
                offset,
            },
            &[],
            &[redo],
        )
    }

    // ------------------------------------------------------------------
    // Durability
    // ------------------------------------------------------------------

    /// Flush everything staged, notifying remote writers, and persist the
    /// new boundary.
    pub fn flush(&self) -> EngineResult<Lsa> {
        self.writers.begin_flush();
        let result = self.appender.flush(&self.prior, &self.storage, &self.pool);
        self.writers.end_flush();
        let boundary = result?;
        self.header.lock().unwrap().append_lsa = boundary;
        self.save_header()?;
        Ok(boundary)
    }

    fn make_durable(&self, lsa: Lsa) -> EngineResult<()> {
        self.group_commit
            .commit_durable(lsa, &self.prior, &self.appender, &self.storage, &self.pool)?;
        let boundary = self.appender.durability_boundary();
        self.header.lock().unwrap().append_lsa = boundary;
        self.save_header()?;
        Ok(())
    }

    /// First address not yet known durable.
    pub fn durability_boundary(&self) -> Lsa {
        self.appender.durability_boundary()
    }

    /// Address the next appended record will receive.
    pub fn append_lsa(&self) -> Lsa {
        self.prior.append_lsa()
    }

    // ------------------------------------------------------------------
    // Commit and abort
    // ------------------------------------------------------------------

    /// Commit the transaction. Runs deferred postpone actions, appends
    /// the commit record, waits for durability, then reflects MVCC and
    /// statistics. An interrupted transaction is unilaterally aborted
    /// instead and the interruption reported.
    pub fn commit_transaction(
        &self,
        handle: TransactionHandle,
        applier: &mut dyn PageApplier,
    ) -> EngineResult<Lsa> {
        self.check_writable()?;
        let interrupted = self
            .trantable
            .with_tdes(handle.index, |tdes| tdes.interrupt.is_cancelled())?;
        if interrupted {
            self.abort_internal(handle, applier, TransactionState::UnilaterallyAborted)?;
            return Err(EngineError::Interrupted(handle.trid));
        }

        let (has_logged, posp_nxlsa) = self
            .trantable
            .with_tdes(handle.index, |tdes| (tdes.has_logged(), tdes.posp_nxlsa))?;

        self.trantable
            .with_tdes(handle.index, |tdes| tdes.set_state(TransactionState::WillCommit))??;

        if !has_logged {
            // Read-only transaction: nothing to make durable.
            self.finish_commit(handle, Lsa::NULL)?;
            return Ok(Lsa::NULL);
        }

        if !posp_nxlsa.is_null() {
            self.append_record(
                handle,
                RecordType::StartPostpone,
                DataHeader::StartPostpone {
                    posp_lsa: posp_nxlsa,
                },
                &[],
                &[],
            )?;
            self.trantable.with_tdes(handle.index, |tdes| {
                tdes.set_state(TransactionState::CommittedWithPostpone)
            })??;
            // The replay walk reads the chain back from storage.
            self.appender.flush(&self.prior, &self.storage, &self.pool)?;
            self.run_postpones(handle, applier)?;
            self.append_record(handle, RecordType::EndPostpone, DataHeader::None, &[], &[])?;
        }

        let commit_lsa =
            self.append_record(handle, RecordType::Commit, DataHeader::None, &[], &[])?;
        self.make_durable(commit_lsa)?;
        self.finish_commit(handle, commit_lsa)?;
        Logger::log(
            Severity::Info,
            "transaction_committed",
            &[
                ("trid", &handle.trid.to_string()),
                ("commit_lsa", &commit_lsa.to_string()),
            ],
        );
        Ok(commit_lsa)
    }

    /// Post-durability commit epilogue: MVCC completion, statistics,
    /// state transition, slot release.
    fn finish_commit(&self, handle: TransactionHandle, commit_lsa: Lsa) -> EngineResult<()> {
        let (mvccid, stats) = self.trantable.with_tdes(handle.index, |tdes| {
            (tdes.mvccid, std::mem::take(&mut tdes.unique_stats))
        })?;
        self.mvcc.complete(handle.index, mvccid);
        for (btid, delta) in stats {
            self.unique_stats.update_by_delta(btid, delta, commit_lsa)?;
        }
        self.trantable.with_tdes(handle.index, |tdes| {
            if tdes.state == TransactionState::WillCommit
                || tdes.state == TransactionState::CommittedWithPostpone
                || tdes.state == TransactionState::CommittedInformingParticipants
            {
                tdes.set_state(TransactionState::Committed)?;
            }
            tdes.interrupt.reset();
            Ok::<_, TxnError>(())
        })??;
        self.mvcc.release_slot(handle.index);
        self.trantable.release(handle.index)?;
        Ok(())
    }

    /// Execute the transaction's deferred actions in registration order,
    /// each logged as an executed-postpone record before it is applied.
    fn run_postpones(
        &self,
        handle: TransactionHandle,
        applier: &mut dyn PageApplier,
    ) -> EngineResult<()> {
        let tail = self
            .trantable
            .with_tdes(handle.index, |tdes| tdes.tail_lsa)?;
        let reader = self.reader();
        let mut postpones = Vec::new();
        for (lsa, record) in reader.transaction_chain(&self.storage, tail)? {
            if record.header.rec_type == RecordType::Postpone {
                postpones.push((lsa, record));
            }
        }
        postpones.reverse(); // registration order

        for (ref_lsa, record) in postpones {
            if let DataHeader::Data {
                rcv_index,
                page_id,
                offset,
            } = record.data_header
            {
                let run_lsa = self.append_record(
                    handle,
                    RecordType::RunPostpone,
                    DataHeader::RunPostpone {
                        ref_lsa,
                        rcv_index,
                        page_id,
                        offset,
                    },
                    &[],
                    &[&record.rdata],
                )?;
                applier.apply_redo(rcv_index, page_id, offset, &record.rdata, run_lsa);
            }
        }
        Ok(())
    }

    /// Abort the transaction: undo every change (logging compensations),
    /// append the abort record and release the slot.
    pub fn abort_transaction(
        &self,
        handle: TransactionHandle,
        applier: &mut dyn PageApplier,
    ) -> EngineResult<()> {
        self.check_writable()?;
        self.abort_internal(handle, applier, TransactionState::Aborted)
    }

    fn abort_internal(
        &self,
        handle: TransactionHandle,
        applier: &mut dyn PageApplier,
        final_state: TransactionState,
    ) -> EngineResult<()> {
        let _section = self.log_section.read();
        // The undo walk reads the chain back from storage.
        self.appender.flush(&self.prior, &self.storage, &self.pool)?;
        let reader = self.reader();
        let mvccid = self.trantable.with_tdes(handle.index, |tdes| {
            undo_one(&reader, &self.storage, &self.prior, tdes, applier, Lsa::NULL)?;
            if tdes.has_logged() {
                self.prior.push(
                    LogRecord::new(RecordType::Abort, tdes.trid, DataHeader::None),
                    tdes,
                );
            }
            tdes.set_state(final_state)?;
            tdes.interrupt.reset();
            Ok::<_, EngineError>(tdes.mvccid)
        })??;
        self.mvcc.complete(handle.index, mvccid);
        self.mvcc.release_slot(handle.index);
        self.trantable.release(handle.index)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Savepoints and system operations
    // ------------------------------------------------------------------

    /// Record a named rollback point. Returns its address, which
    /// [`Self::rollback_to_savepoint`] accepts later.
    pub fn savepoint(&self, handle: TransactionHandle) -> EngineResult<Lsa> {
        let prev = self
            .trantable
            .with_tdes(handle.index, |tdes| tdes.savept_lsa)?;
        self.append_record(
            handle,
            RecordType::Savepoint,
            DataHeader::Savepoint { prev_savept: prev },
            &[],
            &[],
        )
    }

    /// Undo everything after `savept_lsa`; the transaction stays active.
    pub fn rollback_to_savepoint(
        &self,
        handle: TransactionHandle,
        savept_lsa: Lsa,
        applier: &mut dyn PageApplier,
    ) -> EngineResult<()> {
        self.check_writable()?;
        let _section = self.log_section.read();
        self.appender.flush(&self.prior, &self.storage, &self.pool)?;
        let reader = self.reader();
        self.trantable.with_tdes(handle.index, |tdes| {
            undo_one(&reader, &self.storage, &self.prior, tdes, applier, savept_lsa)
        })??;
        Ok(())
    }

    /// Open a nested system-operation scope.
    pub fn sysop_start(&self, handle: TransactionHandle) -> EngineResult<()> {
        self.check_writable()?;
        self.trantable
            .with_tdes(handle.index, |tdes| tdes.sysop_push())?;
        self.append_record(handle, RecordType::SysopStart, DataHeader::None, &[], &[])?;
        Ok(())
    }

    fn sysop_end(
        &self,
        handle: TransactionHandle,
        kind: SysopEndKind,
        udata: &[&[u8]],
    ) -> EngineResult<Lsa> {
        let (addresses, prv_topresult) = self.trantable.with_tdes(handle.index, |tdes| {
            (tdes.sysop_pop(), tdes.tail_topresult_lsa)
        })?;
        let addresses = addresses.ok_or_else(|| {
            EngineError::Recovery("system operation end without matching start".into())
        })?;
        self.append_record(
            handle,
            RecordType::SysopEnd,
            DataHeader::SysopEnd(SysopEndHeader {
                lastparent_lsa: addresses.lastparent_lsa,
                prv_topresult_lsa: prv_topresult,
                kind,
            }),
            udata,
            &[],
        )
    }

    /// Commit the innermost scope: its changes now belong to the owner.
    pub fn sysop_commit(&self, handle: TransactionHandle) -> EngineResult<Lsa> {
        self.sysop_end(handle, SysopEndKind::Commit, &[])
    }

    /// Commit the innermost scope with a logical undo that replaces the
    /// physical walk if the owner later aborts.
    pub fn sysop_commit_logical_undo(
        &self,
        handle: TransactionHandle,
        rcv_index: u32,
        undo: &[u8],
    ) -> EngineResult<Lsa> {
        self.sysop_end(handle, SysopEndKind::LogicalUndo { rcv_index }, &[undo])
    }

    /// Abort the innermost scope: undo its changes, owner stays active.
    pub fn sysop_abort(
        &self,
        handle: TransactionHandle,
        applier: &mut dyn PageApplier,
    ) -> EngineResult<Lsa> {
        self.check_writable()?;
        {
            let _section = self.log_section.read();
            self.appender.flush(&self.prior, &self.storage, &self.pool)?;
            let reader = self.reader();
            self.trantable.with_tdes(handle.index, |tdes| {
                let lastparent = tdes
                    .topops
                    .last()
                    .map(|a| a.lastparent_lsa)
                    .unwrap_or(Lsa::NULL);
                undo_one(
                    &reader,
                    &self.storage,
                    &self.prior,
                    tdes,
                    applier,
                    lastparent,
                )
            })??;
        }
        self.sysop_end(handle, SysopEndKind::Abort, &[])
    }

    // ------------------------------------------------------------------
    // MVCC
    // ------------------------------------------------------------------

    pub fn mvcc_snapshot(&self, handle: TransactionHandle) -> MvccSnapshot {
        self.mvcc.snapshot(handle.index)
    }

    pub fn oldest_active_mvccid(&self) -> Mvccid {
        self.mvcc.oldest_active()
    }

    // ------------------------------------------------------------------
    // Checkpoint
    // ------------------------------------------------------------------

    /// Write a checkpoint and advance the recovery horizon. Appends are
    /// excluded for the duration.
    pub fn checkpoint(&self) -> EngineResult<Lsa> {
        self.check_writable()?;
        let _section = self.log_section.write();
        self.writers.begin_flush();
        let flushed = self.appender.flush(&self.prior, &self.storage, &self.pool);
        self.writers.end_flush();
        flushed?;

        let redo_lsa =
            compute_redo_horizon(self.trantable.min_head_lsa(), self.appender.durability_boundary());
        let trans: Vec<CheckpointTransSummary> = self
            .trantable
            .enumerate()
            .into_iter()
            .map(Into::into)
            .collect();
        let sysops: Vec<CheckpointSysopSummary> = self
            .trantable
            .enumerate_sysops()
            .into_iter()
            .map(|(trid, a)| CheckpointSysopSummary {
                trid,
                lastparent_lsa: a.lastparent_lsa,
                posp_lsa: a.posp_lsa,
            })
            .collect();
        let payload = CheckpointPayload {
            redo_lsa,
            next_mvccid: self.mvcc.highest_allocated() + 1,
            trans,
            sysops,
        };
        let encoded = payload.encode()?;

        // Checkpoint records are engine-level; they belong to no
        // transaction. The marker's stream back-link reaches the
        // summaries during analysis.
        let mut engine_tdes = TransactionDescriptor::new(NULL_TRID);
        self.prior.push(
            LogRecord::new(RecordType::CheckpointTrans, NULL_TRID, DataHeader::None)
                .with_rdata(&[&encoded]),
            &mut engine_tdes,
        );
        let marker_lsa = self.prior.push(
            LogRecord::new(
                RecordType::Checkpoint,
                NULL_TRID,
                DataHeader::Checkpoint {
                    redo_lsa,
                    ntrans: payload.trans.len() as u32,
                    ntops: payload.sysops.len() as u32,
                },
            ),
            &mut engine_tdes,
        );
        self.appender.flush(&self.prior, &self.storage, &self.pool)?;

        {
            let mut header = self.header.lock().unwrap();
            header.chkpt_lsa = marker_lsa;
            header.chkpt_redo_lsa = redo_lsa;
            header.append_lsa = self.appender.durability_boundary();
        }
        self.save_header()?;
        Logger::log(
            Severity::Info,
            "checkpoint_complete",
            &[
                ("chkpt_lsa", &marker_lsa.to_string()),
                ("redo_lsa", &redo_lsa.to_string()),
            ],
        );
        Ok(marker_lsa)
    }

    // ------------------------------------------------------------------
    // Remote writers and archiving
    // ------------------------------------------------------------------

    pub fn register_log_writer(&self) -> u64 {
        self.writers.register()
    }

    pub fn deregister_log_writer(&self, id: u64) {
        self.writers.deregister(id)
    }

    pub fn update_writer_cursor(&self, id: u64, page_id: i64, status: RemoteWriterStatus) {
        self.writers.update_cursor(id, page_id, status)
    }

    /// Move fully durable pages below `up_to_page` into an archive,
    /// never past the slowest remote writer's cursor.
    pub fn rotate_archive(&self, up_to_page: i64) -> EngineResult<usize> {
        self.check_writable()?;
        let mut end = up_to_page.min(self.appender.durability_boundary().page_id);
        if let Some(required) = self.writers.min_required_page() {
            end = end.min(required);
        }
        let first = self.header.lock().unwrap().first_active_page;
        if end <= first {
            return Ok(0);
        }
        let pages: Result<Vec<_>, _> = (first..end).map(|id| self.storage.read_page(id)).collect();
        self.archive.archive(&pages?)?;
        self.header.lock().unwrap().first_active_page = end;
        self.save_header()?;
        Ok((end - first) as usize)
    }

    /// Delete archives no consumer can still need: below the active
    /// window, every remote cursor, and every live transaction's first
    /// record.
    pub fn prune_archives(&self) -> EngineResult<usize> {
        let mut bound = self.header.lock().unwrap().first_active_page;
        if let Some(required) = self.writers.min_required_page() {
            bound = bound.min(required);
        }
        let min_head = self.trantable.min_head_lsa();
        if !min_head.is_null() {
            bound = bound.min(min_head.page_id);
        }
        Ok(self.archive.trim_below(bound)?)
    }

    // ------------------------------------------------------------------
    // Two-phase commit
    // ------------------------------------------------------------------

    /// Coordinator side: run the full protocol for `handle` as the
    /// global transaction `gtrid`. The decision is durable before any
    /// participant learns it.
    pub fn coordinator_commit(
        &self,
        handle: TransactionHandle,
        gtrid: i64,
        participants: Vec<ParticipantId>,
        transport: &dyn Transport,
        applier: &mut dyn PageApplier,
    ) -> EngineResult<Decision> {
        self.check_writable()?;
        if participants.is_empty() {
            return Err(TwoPcError::NoParticipants(gtrid).into());
        }
        self.trantable.with_tdes(handle.index, |tdes| {
            tdes.gtrid = Some(gtrid);
            tdes.coordinator = Some(CoordinatorInfo::new(participants.clone()));
            tdes.set_state(TransactionState::TwoPcCollectingVotes)
        })??;
        self.append_record(
            handle,
            RecordType::TwoPcStart,
            DataHeader::TwoPcStart {
                gtrid,
                num_particps: participants.len() as u32,
            },
            &[],
            &[],
        )?;

        let mut votes = Vec::with_capacity(participants.len());
        for participant in &participants {
            let vote = transport
                .send_prepare(participant, gtrid)
                .unwrap_or(Vote::Abort);
            votes.push(vote);
        }
        let decision = decide(&votes);

        match decision {
            Decision::Commit => {
                self.trantable.with_tdes(handle.index, |tdes| {
                    tdes.set_state(TransactionState::TwoPcPrepare)?;
                    tdes.set_state(TransactionState::TwoPcCommitDecision)
                })??;
                let decision_lsa = self.append_record(
                    handle,
                    RecordType::TwoPcCommitDecision,
                    DataHeader::None,
                    &[],
                    &[],
                )?;
                self.make_durable(decision_lsa)?;
                self.trantable.with_tdes(handle.index, |tdes| {
                    tdes.set_state(TransactionState::CommittedInformingParticipants)
                })??;
                self.inform_participants(handle, gtrid, &participants, decision, transport)?;
                let all_acked = self
                    .trantable
                    .with_tdes(handle.index, |tdes| {
                        tdes.coordinator.as_ref().map(|c| c.all_acked()).unwrap_or(true)
                    })?;
                if all_acked {
                    self.finish_commit(handle, decision_lsa)?;
                } else {
                    self.trantable
                        .with_tdes(handle.index, |tdes| tdes.is_loose_end = true)?;
                }
            }
            Decision::Abort => {
                self.trantable.with_tdes(handle.index, |tdes| {
                    tdes.set_state(TransactionState::TwoPcAbortDecision)
                })??;
                let decision_lsa = self.append_record(
                    handle,
                    RecordType::TwoPcAbortDecision,
                    DataHeader::None,
                    &[],
                    &[],
                )?;
                self.make_durable(decision_lsa)?;
                self.trantable.with_tdes(handle.index, |tdes| {
                    tdes.set_state(TransactionState::AbortedInformingParticipants)
                })??;
                self.inform_participants(handle, gtrid, &participants, decision, transport)?;
                // Local undo, then the terminal record.
                self.appender.flush(&self.prior, &self.storage, &self.pool)?;
                let reader = self.reader();
                let mvccid = self.trantable.with_tdes(handle.index, |tdes| {
                    undo_one(&reader, &self.storage, &self.prior, tdes, applier, Lsa::NULL)?;
                    self.prior.push(
                        LogRecord::new(RecordType::Abort, tdes.trid, DataHeader::None),
                        tdes,
                    );
                    tdes.set_state(TransactionState::Aborted)?;
                    Ok::<_, EngineError>(tdes.mvccid)
                })??;
                self.mvcc.complete(handle.index, mvccid);
                self.mvcc.release_slot(handle.index);
                self.trantable.release(handle.index)?;
            }
        }
        Ok(decision)
    }

    fn inform_participants(
        &self,
        handle: TransactionHandle,
        gtrid: i64,
        participants: &[ParticipantId],
        decision: Decision,
        transport: &dyn Transport,
    ) -> EngineResult<()> {
        for (i, participant) in participants.iter().enumerate() {
            if transport.send_decision(participant, gtrid, decision).is_ok() {
                self.append_record(
                    handle,
                    RecordType::TwoPcParticipantAck,
                    DataHeader::TwoPcParticipantAck {
                        particp_index: i as u32,
                    },
                    &[],
                    &[],
                )?;
                self.trantable.with_tdes(handle.index, |tdes| {
                    if let Some(coordinator) = tdes.coordinator.as_mut() {
                        coordinator.ack(i);
                    }
                })?;
            }
        }
        Ok(())
    }

    /// Participant side: vote on prepare. A ready vote is durable before
    /// it is returned; after it, the outcome belongs to the coordinator.
    pub fn participant_prepare(
        &self,
        handle: TransactionHandle,
        gtrid: i64,
        applier: &mut dyn PageApplier,
    ) -> EngineResult<Vote> {
        self.check_writable()?;
        let interrupted = self
            .trantable
            .with_tdes(handle.index, |tdes| tdes.interrupt.is_cancelled())?;
        if interrupted {
            self.abort_internal(handle, applier, TransactionState::UnilaterallyAborted)?;
            return Ok(Vote::Abort);
        }
        let prepare_lsa = self.append_record(
            handle,
            RecordType::TwoPcPrepare,
            DataHeader::TwoPcPrepare { gtrid },
            &[],
            &[],
        )?;
        self.make_durable(prepare_lsa)?;
        self.trantable.with_tdes(handle.index, |tdes| {
            tdes.gtrid = Some(gtrid);
            tdes.set_state(TransactionState::TwoPcPrepare)
        })??;
        Ok(Vote::Ready)
    }

    /// Participant side: apply the coordinator's decision to a prepared
    /// transaction.
    pub fn participant_decide(
        &self,
        handle: TransactionHandle,
        decision: Decision,
        applier: &mut dyn PageApplier,
    ) -> EngineResult<()> {
        self.check_writable()?;
        match decision {
            Decision::Commit => {
                // A loose end recovered past the decision point skips the
                // transition it already made.
                self.trantable.with_tdes(handle.index, |tdes| {
                    if tdes.state == TransactionState::TwoPcPrepare {
                        tdes.set_state(TransactionState::TwoPcCommitDecision)?;
                    }
                    Ok::<_, TxnError>(())
                })??;
                let commit_lsa =
                    self.append_record(handle, RecordType::Commit, DataHeader::None, &[], &[])?;
                self.make_durable(commit_lsa)?;
                self.trantable.with_tdes(handle.index, |tdes| {
                    if tdes.state == TransactionState::TwoPcCommitDecision {
                        tdes.set_state(TransactionState::CommittedInformingParticipants)?;
                    }
                    tdes.set_state(TransactionState::Committed)?;
                    tdes.is_loose_end = false;
                    Ok::<_, TxnError>(())
                })??;
                let (mvccid, stats) = self.trantable.with_tdes(handle.index, |tdes| {
                    (tdes.mvccid, std::mem::take(&mut tdes.unique_stats))
                })?;
                self.mvcc.complete(handle.index, mvccid);
                for (btid, delta) in stats {
                    self.unique_stats.update_by_delta(btid, delta, commit_lsa)?;
                }
                self.mvcc.release_slot(handle.index);
                self.trantable.release(handle.index)?;
            }
            Decision::Abort => {
                self.trantable.with_tdes(handle.index, |tdes| {
                    if tdes.state == TransactionState::TwoPcPrepare {
                        tdes.set_state(TransactionState::TwoPcAbortDecision)?;
                    }
                    if tdes.state == TransactionState::TwoPcAbortDecision {
                        tdes.set_state(TransactionState::AbortedInformingParticipants)?;
                    }
                    Ok::<_, TxnError>(())
                })??;
                let _section = self.log_section.read();
                self.appender.flush(&self.prior, &self.storage, &self.pool)?;
                let reader = self.reader();
                let mvccid = self.trantable.with_tdes(handle.index, |tdes| {
                    undo_one(&reader, &self.storage, &self.prior, tdes, applier, Lsa::NULL)?;
                    self.prior.push(
                        LogRecord::new(RecordType::Abort, tdes.trid, DataHeader::None),
                        tdes,
                    );
                    tdes.set_state(TransactionState::Aborted)?;
                    tdes.is_loose_end = false;
                    Ok::<_, EngineError>(tdes.mvccid)
                })??;
                self.mvcc.complete(handle.index, mvccid);
                self.mvcc.release_slot(handle.index);
                self.trantable.release(handle.index)?;
            }
        }
        Ok(())
    }

    /// Settle a loose end left by recovery with a known outcome.
    pub fn resolve_loose_end(
        &self,
        trid: Trid,
        decision: Decision,
        applier: &mut dyn PageApplier,
    ) -> EngineResult<()> {
        let index = self.trantable.index_of(trid)?;
        let handle = TransactionHandle { index, trid };
        self.trantable
            .with_tdes(index, |tdes| tdes.is_loose_end = false)?;
        self.participant_decide(handle, decision, applier)
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    fn log_phase(phase: RecoveryPhase) {
        Logger::log(Severity::Info, "recovery_phase", &[("phase", phase.as_str())]);
    }

    /// Restart an engine from an existing log directory, replaying the
    /// durable log through `applier`. Returns the recovered context and
    /// a report of what each pass did.
    pub fn recover(
        config: EngineConfig,
        applier: &mut dyn PageApplier,
    ) -> EngineResult<(Self, RecoveryReport)> {
        let header_path = config.log_dir.join(HEADER_FILE_NAME);
        if !header_path.exists() {
            let ctx = Self::open(config)?;
            return Ok((ctx, RecoveryReport::default()));
        }
        let data = fs::read(&header_path).map_err(|e| {
            LogError::fatal("read header", LogError::flush_failed("read header", e))
        })?;
        let header: LogHeader = serde_json::from_slice(&data)?;
        let end = header.append_lsa;

        let storage = FileStorage::open(config.log_dir.join(ACTIVE_FILE_NAME), config.page_size)?;
        let archive =
            ArchiveManager::open(config.log_dir.join(ARCHIVE_DIR_NAME), config.page_size)?;
        let pool = PageBuffer::new(config.page_buffer_capacity);
        let area_size = config.area_size();
        let reader = LogReader::with_archive(&pool, &archive, area_size);

        Logger::log(Severity::Info, "recovery_start", &[("end_lsa", &end.to_string())]);
        Self::log_phase(RecoveryPhase::Analysis);
        let analysis = analyze(&reader, &storage, header.chkpt_lsa, end)?;
        let trans_analyzed = analysis.descriptors.len();

        Self::log_phase(RecoveryPhase::Redo);
        let records_redone = redo_pass(&reader, &storage, analysis.redo_lsa, end, applier)?;

        Self::log_phase(RecoveryPhase::Undo);
        let prior = PriorQueue::new(end, area_size);
        let mut descriptors = analysis.descriptors;
        let trans_undone =
            undo_transactions(&reader, &storage, &prior, &mut descriptors, applier)?;
        Self::log_phase(RecoveryPhase::Finish2Pc);
        let loose_ends = finish_2pc(&mut descriptors);

        drop(reader);
        let mut ctx = Self::build(config, header, analysis.next_mvccid)?;
        // Reuse the components that already saw the replay.
        ctx.pool = pool;
        ctx.storage = storage;
        ctx.archive = archive;
        ctx.prior = prior;
        ctx.appender = LogAppender::new(end, area_size);

        // The undo pass staged compensations and abort records; make
        // them durable before accepting new work.
        ctx.flush()?;
        ctx.finish_postponed(&mut descriptors, applier)?;
        for tdes in descriptors {
            ctx.trantable.restore(tdes)?;
        }

        let report = RecoveryReport {
            trans_analyzed,
            records_redone,
            trans_undone,
            loose_ends,
        };
        Logger::log(
            Severity::Info,
            "recovery_complete",
            &[
                ("loose_ends", &report.loose_ends.to_string()),
                ("records_redone", &report.records_redone.to_string()),
                ("trans_analyzed", &report.trans_analyzed.to_string()),
                ("trans_undone", &report.trans_undone.to_string()),
            ],
        );
        Ok((ctx, report))
    }

    /// Finish transactions that committed with postpone but crashed
    /// before replaying every deferred action. Already-executed actions
    /// are recognized by their executed-postpone records and skipped.
    fn finish_postponed(
        &self,
        descriptors: &mut Vec<TransactionDescriptor>,
        applier: &mut dyn PageApplier,
    ) -> EngineResult<()> {
        let reader = self.reader();
        let mut finished = Vec::new();
        for (i, tdes) in descriptors.iter_mut().enumerate() {
            if tdes.state != TransactionState::CommittedWithPostpone {
                continue;
            }
            let chain = reader.transaction_chain(&self.storage, tdes.tail_lsa)?;
            let mut executed = Vec::new();
            let mut postpones = Vec::new();
            for (lsa, record) in &chain {
                match record.header.rec_type {
                    RecordType::RunPostpone => {
                        if let DataHeader::RunPostpone { ref_lsa, .. } = record.data_header {
                            executed.push(ref_lsa);
                        }
                    }
                    RecordType::Postpone => postpones.push((*lsa, record.clone())),
                    _ => {}
                }
            }
            postpones.reverse();
            for (ref_lsa, record) in postpones {
                if executed.contains(&ref_lsa) {
                    continue;
                }
                if let DataHeader::Data {
                    rcv_index,
                    page_id,
                    offset,
                } = record.data_header
                {
                    let run_lsa = self.prior.push(
                        LogRecord::new(
                            RecordType::RunPostpone,
                            tdes.trid,
                            DataHeader::RunPostpone {
                                ref_lsa,
                                rcv_index,
                                page_id,
                                offset,
                            },
                        )
                        .with_rdata(&[&record.rdata]),
                        tdes,
                    );
                    applier.apply_redo(rcv_index, page_id, offset, &record.rdata, run_lsa);
                }
            }
            self.prior.push(
                LogRecord::new(RecordType::EndPostpone, tdes.trid, DataHeader::None),
                tdes,
            );
            self.prior.push(
                LogRecord::new(RecordType::Commit, tdes.trid, DataHeader::None),
                tdes,
            );
            tdes.state = TransactionState::Committed;
            finished.push(i);
        }
        if !finished.is_empty() {
            self.flush()?;
            for i in finished.into_iter().rev() {
                descriptors.remove(i);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::NoopApplier;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> EngineConfig {
        EngineConfig::new(dir.path())
    }

    #[test]
    fn test_begin_append_commit() {
        let dir = TempDir::new().unwrap();
        let ctx = LogEngineContext::open(config(&dir)).unwrap();
        let handle = ctx.begin_transaction().unwrap();
        let lsa = ctx.log_update(handle, 0, 7, 0, b"old", b"new").unwrap();
        let commit_lsa = ctx
            .commit_transaction(handle, &mut NoopApplier)
            .unwrap();
        assert!(commit_lsa > lsa);
        assert!(ctx.durability_boundary() > commit_lsa);
        assert!(ctx.enumerate_transactions().is_empty());
    }

    #[test]
    fn test_read_only_rejects_modifications() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.read_only = true;
        let ctx = LogEngineContext::open(cfg).unwrap();
        let handle = ctx.begin_transaction().unwrap();
        let err = ctx.log_update(handle, 0, 7, 0, b"old", b"new").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Txn(TxnError::ModificationsDisabled)
        ));
    }

    #[test]
    fn test_interrupted_commit_aborts_unilaterally() {
        let dir = TempDir::new().unwrap();
        let ctx = LogEngineContext::open(config(&dir)).unwrap();
        let handle = ctx.begin_transaction().unwrap();
        ctx.log_update(handle, 0, 7, 0, b"old", b"new").unwrap();
        ctx.interrupt_transaction(handle.trid).unwrap();
        let err = ctx
            .commit_transaction(handle, &mut NoopApplier)
            .unwrap_err();
        assert!(matches!(err, EngineError::Interrupted(t) if t == handle.trid));
        assert!(ctx.enumerate_transactions().is_empty());
    }

    #[test]
    fn test_readonly_transaction_commit_has_no_record() {
        let dir = TempDir::new().unwrap();
        let ctx = LogEngineContext::open(config(&dir)).unwrap();
        let before = ctx.append_lsa();
        let handle = ctx.begin_transaction().unwrap();
        let commit_lsa = ctx
            .commit_transaction(handle, &mut NoopApplier)
            .unwrap();
        assert!(commit_lsa.is_null());
        assert_eq!(ctx.append_lsa(), before);
    }

    #[test]
    fn test_checkpoint_moves_horizon() {
        let dir = TempDir::new().unwrap();
        let ctx = LogEngineContext::open(config(&dir)).unwrap();
        let handle = ctx.begin_transaction().unwrap();
        ctx.log_update(handle, 0, 7, 0, b"old", b"new").unwrap();
        ctx.commit_transaction(handle, &mut NoopApplier).unwrap();
        let marker = ctx.checkpoint().unwrap();
        assert!(!marker.is_null());
        let header = ctx.header.lock().unwrap().clone();
        assert_eq!(header.chkpt_lsa, marker);
        assert!(!header.chkpt_redo_lsa.is_null());
    }

    #[test]
    fn test_system_worker_gets_negative_trid() {
        let dir = TempDir::new().unwrap();
        let ctx = LogEngineContext::open(config(&dir)).unwrap();
        let worker = ctx.begin_system_worker().unwrap();
        assert!(worker.trid < NULL_TRID);
    }
}
