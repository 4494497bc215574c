//! Multi-version concurrency control
//!
//! Writers get an MVCC id when they first modify data; readers get
//! immutable snapshots. Visibility is a pure function of the snapshot
//! and the stamped id, so reads never block writes.

pub mod status;
pub mod table;

/// MVCC identifier. Allocated serially; never reused within one
/// log lifetime.
pub type Mvccid = u64;

/// No id: data predating MVCC tracking, or a transaction that never wrote.
pub const MVCCID_NULL: Mvccid = 0;

/// First id a fresh log hands out.
pub const MVCCID_FIRST: Mvccid = 1;

pub use status::{MvccSnapshot, MvccStatus, MAX_BITAREA_WORDS};
pub use table::{MvccTable, HISTORY_SIZE};
