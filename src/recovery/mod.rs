//! Crash recovery
//!
//! Restart replays the log in the classic three passes, then settles
//! distributed loose ends:
//!
//! 1. [`analysis`]: rebuild the transaction table from the last
//!    checkpoint plus a forward scan.
//! 2. [`redo`]: reapply every change whose target page is older than the
//!    record, so repeating recovery is idempotent.
//! 3. [`undo`]: roll back transactions that never reached an outcome,
//!    logging a compensation record per undone change.
//! 4. [`finish`]: keep prepared and deciding 2PC transactions alive as
//!    loose ends instead of guessing their outcome.
//!
//! Recovery holds the engine exclusively; no operation runs beside it.

pub mod analysis;
pub mod finish;
pub mod redo;
pub mod undo;

use crate::log::Lsa;

/// The seam between log replay and the data pages it drives. Recovery
/// and runtime rollback never touch pages directly; they hand payloads
/// to an applier keyed by recovery routine index.
pub trait PageApplier {
    /// LSA stamped on the data page, [`Lsa::NULL`] for a page never
    /// written.
    fn page_lsa(&self, page_id: i64) -> Lsa;

    /// Apply a redo payload and stamp the page with `lsa`.
    fn apply_redo(&mut self, rcv_index: u32, page_id: i64, offset: i32, data: &[u8], lsa: Lsa);

    /// Apply an undo payload and stamp the page with `lsa`.
    fn apply_undo(&mut self, rcv_index: u32, page_id: i64, offset: i32, data: &[u8], lsa: Lsa);
}

/// Applier for callers whose records carry no page payloads (state-only
/// transactions, tests of the coordination paths).
#[derive(Debug, Default)]
pub struct NoopApplier;

impl PageApplier for NoopApplier {
    fn page_lsa(&self, _page_id: i64) -> Lsa {
        Lsa::NULL
    }

    fn apply_redo(&mut self, _rcv: u32, _page_id: i64, _offset: i32, _data: &[u8], _lsa: Lsa) {}

    fn apply_undo(&mut self, _rcv: u32, _page_id: i64, _offset: i32, _data: &[u8], _lsa: Lsa) {}
}

/// Which pass a restart is currently in. Logged at the start of each
/// pass so an interrupted restart shows how far it got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    Analysis,
    Redo,
    Undo,
    Finish2Pc,
}

impl RecoveryPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryPhase::Analysis => "analysis",
            RecoveryPhase::Redo => "redo",
            RecoveryPhase::Undo => "undo",
            RecoveryPhase::Finish2Pc => "finish_2pc",
        }
    }
}

/// What a completed restart did.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Live transactions found by analysis.
    pub trans_analyzed: usize,
    /// Redo payloads actually applied.
    pub records_redone: u64,
    /// Transactions rolled back by the undo pass.
    pub trans_undone: usize,
    /// Distributed transactions kept alive awaiting an outcome.
    pub loose_ends: usize,
}

pub use analysis::{analyze, AnalysisResult};
pub use finish::finish_2pc;
pub use redo::redo_pass;
pub use undo::{undo_one, undo_transactions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names_are_stable() {
        // These strings appear in structured log events; renaming one
        // breaks downstream log consumers.
        assert_eq!(RecoveryPhase::Analysis.as_str(), "analysis");
        assert_eq!(RecoveryPhase::Redo.as_str(), "redo");
        assert_eq!(RecoveryPhase::Undo.as_str(), "undo");
        assert_eq!(RecoveryPhase::Finish2Pc.as_str(), "finish_2pc");
    }
}
