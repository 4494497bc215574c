//! Transaction table errors

use thiserror::Error;

use super::state::TransactionState;
use crate::log::Trid;

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("transaction table full: all slots assigned")]
    NoFreeSlot,

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: TransactionState,
        to: TransactionState,
    },

    #[error("cannot release transaction {trid} in non-terminal state {state:?}")]
    NotReleasable {
        trid: Trid,
        state: TransactionState,
    },

    #[error("engine is read-only: modifications are disabled")]
    ModificationsDisabled,

    #[error("no transaction with id {0}")]
    NotFound(Trid),
}

pub type TxnResult<T> = Result<T, TxnError>;
