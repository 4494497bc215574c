//! Engine configuration
//!
//! Explicit config structs with conservative defaults. Optimizations
//! (group commit) are disabled unless asked for; capacities are fixed at
//! startup so steady-state operation never reallocates the transaction
//! table or the page pool.

use std::path::PathBuf;
use std::time::Duration;

use crate::log::GroupCommitConfig;

/// Estimated number of concurrently active transactions, used as the
/// default transaction-table capacity.
pub const DEFAULT_MAX_TRANSACTIONS: usize = 100;

/// Top-level configuration for a [`crate::context::LogEngineContext`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size in bytes of one log page (header included).
    pub page_size: usize,
    /// Number of pages the read pool retains.
    pub page_buffer_capacity: usize,
    /// Fixed capacity of the transaction table.
    pub max_transactions: usize,
    /// Group commit batching window. Zero disables batching.
    pub group_commit: GroupCommitConfig,
    /// A checkpoint is scheduled after this many appended pages.
    pub checkpoint_every_pages: u64,
    /// Directory holding the active log, archives and the info file.
    pub log_dir: PathBuf,
    /// When set, all modifications are rejected with a policy error.
    pub read_only: bool,
}

impl EngineConfig {
    /// Configuration rooted at `log_dir` with defaults everywhere else.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            page_size: 4096,
            page_buffer_capacity: 128,
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
            group_commit: GroupCommitConfig::disabled(),
            checkpoint_every_pages: 1000,
            log_dir: log_dir.into(),
            read_only: false,
        }
    }

    /// Enable group commit with the given batching window.
    pub fn with_group_commit(mut self, interval: Duration) -> Self {
        self.group_commit = GroupCommitConfig::with_interval(interval);
        self
    }

    /// Bytes available for record data on one page.
    pub fn area_size(&self) -> usize {
        self.page_size - crate::log::PAGE_HEADER_SIZE
    }
}
