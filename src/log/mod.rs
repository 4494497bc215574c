//! Write-ahead log
//!
//! The append path runs in three stages: records are staged on the
//! [`prior`] queue (where LSAs are assigned), the [`append`] pipeline
//! lays staged records into pages and makes them durable, and
//! [`group_commit`] batches commit-time flushes. [`reader`] serves
//! scans and back-chain walks over the pool, with [`archive`] holding
//! pages rotated out of the active file. [`remote`] keeps page
//! recycling behind every remote consumer's cursor.

pub mod append;
pub mod archive;
pub mod checksum;
pub mod errors;
pub mod group_commit;
pub mod lsa;
pub mod page;
pub mod page_buffer;
pub mod prior;
pub mod reader;
pub mod record;
pub mod remote;

pub use append::LogAppender;
pub use archive::{ArchiveEntry, ArchiveManager, LogInfoFile};
pub use checksum::compute_checksum;
pub use errors::{LogError, LogErrorCode, LogResult, Severity};
pub use group_commit::{GroupCommitConfig, GroupCommitManager};
pub use lsa::{align8, Lsa, LOG_ALIGNMENT};
pub use page::{LogPage, PAGE_HEADER_SIZE};
pub use page_buffer::{FileStorage, LogStorage, PageBuffer};
pub use prior::{PriorNode, PriorQueue};
pub use reader::LogReader;
pub use record::{
    DataHeader, LogRecord, RecordHeader, RecordType, SysopEndHeader, SysopEndKind, Trid,
    NULL_TRID,
};
pub use remote::{RemoteWriterRegistry, RemoteWriterStatus};
