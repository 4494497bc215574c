//! Log record model
//!
//! Every record carries a fixed header (type, owning transaction,
//! per-transaction back-link and global back-link) followed by a
//! type-specific data header and optional undo / redo payloads. All
//! variable parts are 8-byte aligned so records can be walked without
//! knowing their types in advance.
//!
//! On-disk record layout:
//!
//! ```text
//! [header 40][dh_len i32][u_len i32][r_len i32][pad 4]
//! [data_header .. align8][udata .. align8][rdata .. align8]
//! ```

use serde::{Deserialize, Serialize};

use super::errors::{LogError, LogResult};
use super::lsa::{align8, Lsa};

/// Transaction identifier. Positive values are client transactions,
/// values below [`NULL_TRID`] are system workers.
pub type Trid = i32;

/// Distinguished "no transaction" identifier.
pub const NULL_TRID: Trid = -1;

/// Serialized record header size:
/// type (1) + pad (3) + trid (4) + prev_tran_lsa (16) + back_lsa (16).
pub const RECORD_HEADER_SIZE: usize = 40;

/// Size of the length prologue that follows the header:
/// dh_len (4) + u_len (4) + r_len (4) + pad (4).
pub const LENGTH_PROLOGUE_SIZE: usize = 16;

/// Kinds of log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordType {
    DataUndo = 1,
    DataRedo = 2,
    DataUndoRedo = 3,
    Compensate = 4,
    SysopStart = 5,
    SysopEnd = 6,
    Commit = 7,
    Abort = 8,
    StartPostpone = 9,
    EndPostpone = 10,
    RunPostpone = 11,
    Savepoint = 12,
    Checkpoint = 13,
    CheckpointTrans = 14,
    TwoPcStart = 15,
    TwoPcPrepare = 16,
    TwoPcCommitDecision = 17,
    TwoPcAbortDecision = 18,
    TwoPcParticipantAck = 19,
    ReplicationData = 20,
    ReplicationSchema = 21,
    /// A deferred action: executed only after commit is decided.
    Postpone = 22,
}

impl RecordType {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> LogResult<Self> {
        Ok(match value {
            1 => RecordType::DataUndo,
            2 => RecordType::DataRedo,
            3 => RecordType::DataUndoRedo,
            4 => RecordType::Compensate,
            5 => RecordType::SysopStart,
            6 => RecordType::SysopEnd,
            7 => RecordType::Commit,
            8 => RecordType::Abort,
            9 => RecordType::StartPostpone,
            10 => RecordType::EndPostpone,
            11 => RecordType::RunPostpone,
            12 => RecordType::Savepoint,
            13 => RecordType::Checkpoint,
            14 => RecordType::CheckpointTrans,
            15 => RecordType::TwoPcStart,
            16 => RecordType::TwoPcPrepare,
            17 => RecordType::TwoPcCommitDecision,
            18 => RecordType::TwoPcAbortDecision,
            19 => RecordType::TwoPcParticipantAck,
            20 => RecordType::ReplicationData,
            21 => RecordType::ReplicationSchema,
            22 => RecordType::Postpone,
            other => {
                return Err(LogError::append_failed(format!(
                    "unknown record type byte: {}",
                    other
                )))
            }
        })
    }
}

/// Fixed per-record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub rec_type: RecordType,
    pub trid: Trid,
    /// Previous record of the same transaction, [`Lsa::NULL`] for the first.
    pub prev_tran_lsa: Lsa,
    /// Immediately preceding record in the global stream.
    pub back_lsa: Lsa,
}

impl RecordHeader {
    pub fn new(rec_type: RecordType, trid: Trid) -> Self {
        Self {
            rec_type,
            trid,
            prev_tran_lsa: Lsa::NULL,
            back_lsa: Lsa::NULL,
        }
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.rec_type.as_u8());
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&self.trid.to_le_bytes());
        self.prev_tran_lsa.write_to(buf);
        self.back_lsa.write_to(buf);
    }

    pub fn read_from(data: &[u8]) -> LogResult<Self> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(LogError::append_failed("short record header"));
        }
        Ok(Self {
            rec_type: RecordType::from_u8(data[0])?,
            trid: i32::from_le_bytes(data[4..8].try_into().unwrap()),
            prev_tran_lsa: Lsa::read_from(&data[8..24]),
            back_lsa: Lsa::read_from(&data[24..40]),
        })
    }
}

/// How a system operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SysopEndKind {
    /// Nested changes survive under the parent.
    Commit,
    /// Nested changes were rolled back.
    Abort,
    /// Committed, but with a logical undo to run if the owner later aborts.
    LogicalUndo { rcv_index: u32 },
    /// Committed on behalf of a logical-undo replay; compensation target.
    LogicalCompensate { compensate_lsa: Lsa },
    /// Committed while replaying a postpone action.
    RunPostpone { postpone_lsa: Lsa, during_sysop: bool },
}

/// Data header for a [`RecordType::SysopEnd`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysopEndHeader {
    /// Where the transaction's undo chain resumes after this scope.
    pub lastparent_lsa: Lsa,
    /// Previous nested-result record of the owner.
    pub prv_topresult_lsa: Lsa,
    pub kind: SysopEndKind,
}

/// Type-specific portion of a record.
///
/// Tagged in-memory and on disk; readers match on the variant instead of
/// reinterpreting raw bytes based on the record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataHeader {
    None,
    /// Undo / redo data records: recovery routine plus the page address
    /// the payload applies to.
    Data {
        rcv_index: u32,
        page_id: i64,
        offset: i32,
    },
    /// Compensation: the page address the compensation applies to, plus
    /// where the undo walk resumes after this record.
    Compensate {
        undo_nxlsa: Lsa,
        rcv_index: u32,
        page_id: i64,
        offset: i32,
    },
    SysopEnd(SysopEndHeader),
    /// Commit-with-postpone marker: start of the postpone chain.
    StartPostpone { posp_lsa: Lsa },
    /// A postpone action being executed: its page target plus the
    /// original postpone record it replays.
    RunPostpone {
        ref_lsa: Lsa,
        rcv_index: u32,
        page_id: i64,
        offset: i32,
    },
    /// User savepoint; links to the previous savepoint of the transaction.
    Savepoint { prev_savept: Lsa },
    /// Checkpoint summary: redo horizon plus summary counts.
    Checkpoint {
        redo_lsa: Lsa,
        ntrans: u32,
        ntops: u32,
    },
    /// Start of distributed coordination for a global transaction.
    TwoPcStart { gtrid: i64, num_particps: u32 },
    /// Participant became prepared for `gtrid`.
    TwoPcPrepare { gtrid: i64 },
    /// Acknowledgement collected from one participant.
    TwoPcParticipantAck { particp_index: u32 },
}

impl DataHeader {
    /// Serialized form. Hand-coded LE like the rest of the wire format;
    /// the tag byte mirrors the enum discriminant.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            DataHeader::None => {}
            DataHeader::Data {
                rcv_index,
                page_id,
                offset,
            } => {
                buf.extend_from_slice(&rcv_index.to_le_bytes());
                buf.extend_from_slice(&[0u8; 4]);
                buf.extend_from_slice(&page_id.to_le_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(&[0u8; 4]);
            }
            DataHeader::Compensate {
                undo_nxlsa,
                rcv_index,
                page_id,
                offset,
            } => {
                undo_nxlsa.write_to(buf);
                buf.extend_from_slice(&rcv_index.to_le_bytes());
                buf.extend_from_slice(&[0u8; 4]);
                buf.extend_from_slice(&page_id.to_le_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(&[0u8; 4]);
            }
            DataHeader::SysopEnd(h) => {
                h.lastparent_lsa.write_to(buf);
                h.prv_topresult_lsa.write_to(buf);
                match h.kind {
                    SysopEndKind::Commit => {
                        buf.push(0);
                        buf.extend_from_slice(&[0u8; 7]);
                    }
                    SysopEndKind::Abort => {
                        buf.push(1);
                        buf.extend_from_slice(&[0u8; 7]);
                    }
                    SysopEndKind::LogicalUndo { rcv_index } => {
                        buf.push(2);
                        buf.extend_from_slice(&[0u8; 3]);
                        buf.extend_from_slice(&rcv_index.to_le_bytes());
                    }
                    SysopEndKind::LogicalCompensate { compensate_lsa } => {
                        buf.push(3);
                        buf.extend_from_slice(&[0u8; 7]);
                        compensate_lsa.write_to(buf);
                    }
                    SysopEndKind::RunPostpone {
                        postpone_lsa,
                        during_sysop,
                    } => {
                        buf.push(4);
                        buf.push(during_sysop as u8);
                        buf.extend_from_slice(&[0u8; 6]);
                        postpone_lsa.write_to(buf);
                    }
                }
            }
            DataHeader::StartPostpone { posp_lsa } => {
                posp_lsa.write_to(buf);
            }
            DataHeader::RunPostpone {
                ref_lsa,
                rcv_index,
                page_id,
                offset,
            } => {
                ref_lsa.write_to(buf);
                buf.extend_from_slice(&rcv_index.to_le_bytes());
                buf.extend_from_slice(&[0u8; 4]);
                buf.extend_from_slice(&page_id.to_le_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(&[0u8; 4]);
            }
            DataHeader::Savepoint { prev_savept } => {
                prev_savept.write_to(buf);
            }
            DataHeader::Checkpoint {
                redo_lsa,
                ntrans,
                ntops,
            } => {
                redo_lsa.write_to(buf);
                buf.extend_from_slice(&ntrans.to_le_bytes());
                buf.extend_from_slice(&ntops.to_le_bytes());
            }
            DataHeader::TwoPcStart {
                gtrid,
                num_particps,
            } => {
                buf.extend_from_slice(&gtrid.to_le_bytes());
                buf.extend_from_slice(&num_particps.to_le_bytes());
                buf.extend_from_slice(&[0u8; 4]);
            }
            DataHeader::TwoPcPrepare { gtrid } => {
                buf.extend_from_slice(&gtrid.to_le_bytes());
            }
            DataHeader::TwoPcParticipantAck { particp_index } => {
                buf.extend_from_slice(&particp_index.to_le_bytes());
                buf.extend_from_slice(&[0u8; 4]);
            }
        }
    }

    /// Decode the data header appropriate for `rec_type` from `data`.
    pub fn read_from(rec_type: RecordType, data: &[u8]) -> LogResult<Self> {
        let short = || LogError::append_failed("short data header");
        Ok(match rec_type {
            RecordType::DataUndo
            | RecordType::DataRedo
            | RecordType::DataUndoRedo
            | RecordType::Postpone => {
                if data.len() < 24 {
                    return Err(short());
                }
                DataHeader::Data {
                    rcv_index: u32::from_le_bytes(data[0..4].try_into().unwrap()),
                    page_id: i64::from_le_bytes(data[8..16].try_into().unwrap()),
                    offset: i32::from_le_bytes(data[16..20].try_into().unwrap()),
                }
            }
            RecordType::Compensate => {
                if data.len() < 40 {
                    return Err(short());
                }
                DataHeader::Compensate {
                    undo_nxlsa: Lsa::read_from(&data[0..16]),
                    rcv_index: u32::from_le_bytes(data[16..20].try_into().unwrap()),
                    page_id: i64::from_le_bytes(data[24..32].try_into().unwrap()),
                    offset: i32::from_le_bytes(data[32..36].try_into().unwrap()),
                }
            }
            RecordType::SysopEnd => {
                if data.len() < 40 {
                    return Err(short());
                }
                let lastparent_lsa = Lsa::read_from(&data[0..16]);
                let prv_topresult_lsa = Lsa::read_from(&data[16..32]);
                let kind = match data[32] {
                    0 => SysopEndKind::Commit,
                    1 => SysopEndKind::Abort,
                    2 => SysopEndKind::LogicalUndo {
                        rcv_index: u32::from_le_bytes(data[36..40].try_into().unwrap()),
                    },
                    3 => {
                        if data.len() < 56 {
                            return Err(short());
                        }
                        SysopEndKind::LogicalCompensate {
                            compensate_lsa: Lsa::read_from(&data[40..56]),
                        }
                    }
                    4 => {
                        if data.len() < 56 {
                            return Err(short());
                        }
                        SysopEndKind::RunPostpone {
                            postpone_lsa: Lsa::read_from(&data[40..56]),
                            during_sysop: data[33] != 0,
                        }
                    }
                    other => {
                        return Err(LogError::append_failed(format!(
                            "unknown sysop end kind: {}",
                            other
                        )))
                    }
                };
                DataHeader::SysopEnd(SysopEndHeader {
                    lastparent_lsa,
                    prv_topresult_lsa,
                    kind,
                })
            }
            RecordType::StartPostpone => {
                if data.len() < Lsa::SERIALIZED_SIZE {
                    return Err(short());
                }
                DataHeader::StartPostpone {
                    posp_lsa: Lsa::read_from(data),
                }
            }
            RecordType::RunPostpone => {
                if data.len() < 40 {
                    return Err(short());
                }
                DataHeader::RunPostpone {
                    ref_lsa: Lsa::read_from(&data[0..16]),
                    rcv_index: u32::from_le_bytes(data[16..20].try_into().unwrap()),
                    page_id: i64::from_le_bytes(data[24..32].try_into().unwrap()),
                    offset: i32::from_le_bytes(data[32..36].try_into().unwrap()),
                }
            }
            RecordType::Savepoint => {
                if data.len() < Lsa::SERIALIZED_SIZE {
                    return Err(short());
                }
                DataHeader::Savepoint {
                    prev_savept: Lsa::read_from(data),
                }
            }
            RecordType::Checkpoint => {
                if data.len() < 24 {
                    return Err(short());
                }
                DataHeader::Checkpoint {
                    redo_lsa: Lsa::read_from(&data[0..16]),
                    ntrans: u32::from_le_bytes(data[16..20].try_into().unwrap()),
                    ntops: u32::from_le_bytes(data[20..24].try_into().unwrap()),
                }
            }
            RecordType::TwoPcStart => {
                if data.len() < 16 {
                    return Err(short());
                }
                DataHeader::TwoPcStart {
                    gtrid: i64::from_le_bytes(data[0..8].try_into().unwrap()),
                    num_particps: u32::from_le_bytes(data[8..12].try_into().unwrap()),
                }
            }
            RecordType::TwoPcPrepare => {
                if data.len() < 8 {
                    return Err(short());
                }
                DataHeader::TwoPcPrepare {
                    gtrid: i64::from_le_bytes(data[0..8].try_into().unwrap()),
                }
            }
            RecordType::TwoPcParticipantAck => {
                if data.len() < 4 {
                    return Err(short());
                }
                DataHeader::TwoPcParticipantAck {
                    particp_index: u32::from_le_bytes(data[0..4].try_into().unwrap()),
                }
            }
            _ => DataHeader::None,
        })
    }
}

/// A complete in-memory log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub header: RecordHeader,
    pub data_header: DataHeader,
    pub udata: Vec<u8>,
    pub rdata: Vec<u8>,
}

impl LogRecord {
    pub fn new(rec_type: RecordType, trid: Trid, data_header: DataHeader) -> Self {
        Self {
            header: RecordHeader::new(rec_type, trid),
            data_header,
            udata: Vec::new(),
            rdata: Vec::new(),
        }
    }

    /// Attach an undo payload gathered from non-contiguous pieces.
    pub fn with_udata(mut self, crumbs: &[&[u8]]) -> Self {
        self.udata = concat_crumbs(crumbs);
        self
    }

    /// Attach a redo payload gathered from non-contiguous pieces.
    pub fn with_rdata(mut self, crumbs: &[&[u8]]) -> Self {
        self.rdata = concat_crumbs(crumbs);
        self
    }

    /// Total serialized length including alignment padding.
    pub fn serialized_len(&self) -> i32 {
        let mut dh = Vec::new();
        self.data_header.write_to(&mut dh);
        (RECORD_HEADER_SIZE + LENGTH_PROLOGUE_SIZE) as i32
            + align8(dh.len() as i32)
            + align8(self.udata.len() as i32)
            + align8(self.rdata.len() as i32)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut dh = Vec::new();
        self.data_header.write_to(&mut dh);

        let mut buf = Vec::with_capacity(self.serialized_len() as usize);
        self.header.write_to(&mut buf);
        buf.extend_from_slice(&(dh.len() as i32).to_le_bytes());
        buf.extend_from_slice(&(self.udata.len() as i32).to_le_bytes());
        buf.extend_from_slice(&(self.rdata.len() as i32).to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);

        push_aligned(&mut buf, &dh);
        push_aligned(&mut buf, &self.udata);
        push_aligned(&mut buf, &self.rdata);
        buf
    }

    /// Total serialized length derived from the header and length
    /// prologue alone. Readers use this to size the full fetch before
    /// the record body is available.
    pub fn probe_len(data: &[u8]) -> LogResult<i32> {
        if data.len() < RECORD_HEADER_SIZE + LENGTH_PROLOGUE_SIZE {
            return Err(LogError::append_failed("short record prologue"));
        }
        RecordType::from_u8(data[0])?;
        let p = RECORD_HEADER_SIZE;
        let dh_len = i32::from_le_bytes(data[p..p + 4].try_into().unwrap());
        let u_len = i32::from_le_bytes(data[p + 4..p + 8].try_into().unwrap());
        let r_len = i32::from_le_bytes(data[p + 8..p + 12].try_into().unwrap());
        if dh_len < 0 || u_len < 0 || r_len < 0 {
            return Err(LogError::append_failed("negative length in record prologue"));
        }
        Ok((RECORD_HEADER_SIZE + LENGTH_PROLOGUE_SIZE) as i32
            + align8(dh_len)
            + align8(u_len)
            + align8(r_len))
    }

    pub fn deserialize(data: &[u8]) -> LogResult<Self> {
        let header = RecordHeader::read_from(data)?;
        let prologue = RECORD_HEADER_SIZE;
        if data.len() < prologue + LENGTH_PROLOGUE_SIZE {
            return Err(LogError::append_failed("short record prologue"));
        }
        let dh_len =
            i32::from_le_bytes(data[prologue..prologue + 4].try_into().unwrap()) as usize;
        let u_len =
            i32::from_le_bytes(data[prologue + 4..prologue + 8].try_into().unwrap()) as usize;
        let r_len =
            i32::from_le_bytes(data[prologue + 8..prologue + 12].try_into().unwrap()) as usize;

        let dh_start = prologue + LENGTH_PROLOGUE_SIZE;
        let u_start = dh_start + align8(dh_len as i32) as usize;
        let r_start = u_start + align8(u_len as i32) as usize;
        if data.len() < r_start + r_len {
            return Err(LogError::append_failed("truncated record body"));
        }

        let data_header =
            DataHeader::read_from(header.rec_type, &data[dh_start..dh_start + dh_len])?;
        Ok(Self {
            header,
            data_header,
            udata: data[u_start..u_start + u_len].to_vec(),
            rdata: data[r_start..r_start + r_len].to_vec(),
        })
    }
}

fn concat_crumbs(crumbs: &[&[u8]]) -> Vec<u8> {
    let total: usize = crumbs.iter().map(|c| c.len()).sum();
    let mut out = Vec::with_capacity(total);
    for crumb in crumbs {
        out.extend_from_slice(crumb);
    }
    out
}

fn push_aligned(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(data);
    let padded = align8(data.len() as i32) as usize;
    buf.resize(buf.len() + (padded - data.len()), 0);
}
