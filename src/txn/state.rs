//! Transaction state machine
//!
//! States move strictly along the edges below; everything else is a
//! programming error surfaced as [`TxnError::InvalidTransition`].
//!
//! ```text
//! Active -> WillCommit -> CommittedWithPostpone -> Committed
//! Active -> Aborted | UnilaterallyAborted
//! Active -> TwoPcCollectingVotes -> TwoPcPrepare
//!   -> TwoPcCommitDecision -> CommittedInformingParticipants -> Committed
//!   -> TwoPcAbortDecision  -> AbortedInformingParticipants  -> Aborted
//! Active -> TwoPcPrepare              (participant side)
//! ```

use serde::{Deserialize, Serialize};

/// Lifecycle state of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    Active,
    /// Commit requested, postpone work not yet scheduled.
    WillCommit,
    /// Commit record written, postpone actions running.
    CommittedWithPostpone,
    Committed,
    Aborted,
    /// Aborted without the client asking (deadlock, interrupt, crash).
    UnilaterallyAborted,
    /// Coordinator collecting votes from participants.
    TwoPcCollectingVotes,
    /// Prepared: vote is cast, outcome belongs to the coordinator.
    TwoPcPrepare,
    /// Coordinator decided commit; decision record not yet acknowledged.
    TwoPcCommitDecision,
    /// Coordinator decided abort.
    TwoPcAbortDecision,
    /// Commit decided and durable, collecting participant acks.
    CommittedInformingParticipants,
    /// Abort decided and durable, collecting participant acks.
    AbortedInformingParticipants,
}

impl TransactionState {
    /// Terminal states free the descriptor slot (unless loose ends remain).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed
                | TransactionState::Aborted
                | TransactionState::UnilaterallyAborted
        )
    }

    /// Commit-side states, terminal or not.
    pub fn is_committed_family(&self) -> bool {
        matches!(
            self,
            TransactionState::WillCommit
                | TransactionState::CommittedWithPostpone
                | TransactionState::Committed
                | TransactionState::TwoPcCommitDecision
                | TransactionState::CommittedInformingParticipants
        )
    }

    pub fn is_aborted_family(&self) -> bool {
        matches!(
            self,
            TransactionState::Aborted
                | TransactionState::UnilaterallyAborted
                | TransactionState::TwoPcAbortDecision
                | TransactionState::AbortedInformingParticipants
        )
    }

    /// States that survive restart as distributed loose ends.
    pub fn is_loose_end(&self) -> bool {
        matches!(
            self,
            TransactionState::TwoPcPrepare
                | TransactionState::TwoPcCommitDecision
                | TransactionState::TwoPcAbortDecision
                | TransactionState::CommittedInformingParticipants
                | TransactionState::AbortedInformingParticipants
        )
    }

    pub fn is_2pc(&self) -> bool {
        matches!(
            self,
            TransactionState::TwoPcCollectingVotes
                | TransactionState::TwoPcPrepare
                | TransactionState::TwoPcCommitDecision
                | TransactionState::TwoPcAbortDecision
                | TransactionState::CommittedInformingParticipants
                | TransactionState::AbortedInformingParticipants
        )
    }

    /// Whether `self -> to` is a legal edge.
    pub fn can_transition_to(&self, to: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (*self, to),
            (Active, WillCommit)
                | (Active, Aborted)
                | (Active, UnilaterallyAborted)
                | (Active, TwoPcCollectingVotes)
                | (Active, TwoPcPrepare)
                | (WillCommit, CommittedWithPostpone)
                | (WillCommit, Committed)
                | (CommittedWithPostpone, Committed)
                | (TwoPcCollectingVotes, TwoPcPrepare)
                | (TwoPcCollectingVotes, TwoPcAbortDecision)
                | (TwoPcPrepare, TwoPcCommitDecision)
                | (TwoPcPrepare, TwoPcAbortDecision)
                | (TwoPcCommitDecision, CommittedInformingParticipants)
                | (TwoPcAbortDecision, AbortedInformingParticipants)
                | (CommittedInformingParticipants, Committed)
                | (AbortedInformingParticipants, Aborted)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionState::*;

    #[test]
    fn test_plain_commit_path() {
        assert!(Active.can_transition_to(WillCommit));
        assert!(WillCommit.can_transition_to(CommittedWithPostpone));
        assert!(CommittedWithPostpone.can_transition_to(Committed));
        assert!(WillCommit.can_transition_to(Committed));
    }

    #[test]
    fn test_abort_paths() {
        assert!(Active.can_transition_to(Aborted));
        assert!(Active.can_transition_to(UnilaterallyAborted));
        assert!(!Aborted.can_transition_to(Active));
    }

    #[test]
    fn test_coordinator_2pc_path() {
        assert!(Active.can_transition_to(TwoPcCollectingVotes));
        assert!(TwoPcCollectingVotes.can_transition_to(TwoPcPrepare));
        assert!(TwoPcPrepare.can_transition_to(TwoPcCommitDecision));
        assert!(TwoPcCommitDecision.can_transition_to(CommittedInformingParticipants));
        assert!(CommittedInformingParticipants.can_transition_to(Committed));
    }

    #[test]
    fn test_participant_prepares_from_active() {
        assert!(Active.can_transition_to(TwoPcPrepare));
        assert!(TwoPcPrepare.can_transition_to(TwoPcAbortDecision));
    }

    #[test]
    fn test_illegal_edges_rejected() {
        assert!(!Active.can_transition_to(Committed));
        assert!(!Committed.can_transition_to(Aborted));
        assert!(!TwoPcCommitDecision.can_transition_to(Aborted));
    }

    #[test]
    fn test_loose_end_classification() {
        assert!(TwoPcPrepare.is_loose_end());
        assert!(CommittedInformingParticipants.is_loose_end());
        assert!(!Active.is_loose_end());
        assert!(!Committed.is_loose_end());
    }

    #[test]
    fn test_family_classification() {
        assert!(Committed.is_committed_family());
        assert!(WillCommit.is_committed_family());
        assert!(UnilaterallyAborted.is_aborted_family());
        assert!(!Active.is_committed_family());
        assert!(TwoPcPrepare.is_2pc());
    }
}
