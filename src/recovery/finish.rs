//! Finish pass: distributed loose ends
//!
//! Transactions that crashed between a prepare vote and a decision, or
//! between a decision and the last participant ack, cannot be resolved
//! locally. They keep their table slots as loose ends; the coordinator
//! protocol (or an operator) settles them later through the engine's
//! resolve operation. Committed-with-postpone transactions also stay:
//! their outcome is decided, only postpone replay remains.

use crate::txn::TransactionDescriptor;

/// Mark survivors of the undo pass as loose ends. Returns how many
/// distributed transactions are awaiting an outcome.
pub fn finish_2pc(descriptors: &mut [TransactionDescriptor]) -> usize {
    let mut loose = 0;
    for tdes in descriptors.iter_mut() {
        if tdes.state.is_loose_end() {
            tdes.is_loose_end = true;
            loose += 1;
        }
    }
    loose
}
