//! ferrolog - write-ahead logging and transaction coordination core
//!
//! This crate is the durability and ordering heart of a transactional
//! storage engine. It owns the log sequence address (LSA) total order, the
//! prior-record staging queue, the append/flush/group-commit pipeline, the
//! transaction table and its state machine, the MVCC transaction-status
//! table, checkpointing, crash recovery and two-phase commit.
//!
//! # Invariants Enforced
//!
//! - L1: `append_lsa` is monotonic; an assigned LSA is final and never reused
//! - L2: WAL rule - a page is recycled only after it is durably flushed
//! - L3: `nxio_lsa` (durability boundary) is non-decreasing and never exceeds
//!   the last successfully flushed page
//! - T1: transaction state transitions follow the state machine edges only
//! - T2: a descriptor is recycled only from a terminal state with all loose
//!   ends cleared
//! - M1: `lowest_active_mvccid` never decreases; ids below it are never
//!   reported active
//! - P1: no 2PC outcome is reported before the decision record is durable
//!
//! Physical data pages, the lock manager, access methods and the query
//! layer are external collaborators reached through narrow traits
//! (`recovery::PageApplier`, `twopc::Transport`) or cursor registries
//! (`log::RemoteWriterRegistry`).

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod errors;
pub mod log;
pub mod mvcc;
pub mod observability;
pub mod recovery;
pub mod stats;
pub mod sync;
pub mod twopc;
pub mod txn;
