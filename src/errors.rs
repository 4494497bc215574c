//! Engine-level errors
//!
//! Operations on the engine context surface one error type wrapping the
//! subsystem errors, so callers match on the concern rather than the
//! module that raised it.

use thiserror::Error;

use crate::log::LogError;
use crate::stats::StatsError;
use crate::twopc::TwoPcError;
use crate::txn::TxnError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Txn(#[from] TxnError),

    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error(transparent)]
    TwoPc(#[from] TwoPcError),

    #[error("checkpoint encoding failed: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error("recovery failed: {0}")]
    Recovery(String),

    #[error("transaction {0} was interrupted and unilaterally aborted")]
    Interrupted(crate::log::Trid),
}

pub type EngineResult<T> = Result<T, EngineError>;
