//! Transactions: descriptors, the table and the state machine.

pub mod descriptor;
pub mod errors;
pub mod state;
pub mod table;

pub use descriptor::{
    ClientIdentity, CoordinatorInfo, IsolationLevel, ParticipantId, RecoveryBookmarks,
    SysopAddresses, TransactionDescriptor,
};
pub use errors::{TxnError, TxnResult};
pub use state::TransactionState;
pub use table::{TransactionSummary, TransactionTable, SYSTEM_WORKER_FIRST_TRID};
