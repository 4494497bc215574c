//! Two-phase commit
//!
//! The coordinator collects votes over a [`Transport`], logs a durable
//! decision record, and only then informs participants. A participant
//! that voted ready gives up the right to decide: its outcome is
//! whatever the coordinator logged. Transactions stuck between a vote
//! and a decision survive restarts as loose ends.
//!
//! The driving flows live on the engine context; this module holds the
//! vocabulary and the transport seam.

use thiserror::Error;

use crate::txn::ParticipantId;

/// A participant's answer to prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// Prepared and bound to the coordinator's decision.
    Ready,
    /// Refused; the global transaction must abort.
    Abort,
}

/// The coordinator's durable outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Commit,
    Abort,
}

/// One commit decision rule: every vote must be ready.
pub fn decide(votes: &[Vote]) -> Decision {
    if !votes.is_empty() && votes.iter().all(|v| *v == Vote::Ready) {
        Decision::Commit
    } else {
        Decision::Abort
    }
}

/// Messaging seam to participants. Implementations own addressing,
/// retries and timeouts; a timeout surfaces as [`TwoPcError::Unreachable`]
/// and counts as an abort vote.
pub trait Transport: Send + Sync {
    /// Ask one participant to prepare for `gtrid`.
    fn send_prepare(&self, participant: &ParticipantId, gtrid: i64) -> Result<Vote, TwoPcError>;

    /// Deliver the durable decision. Returns once the participant
    /// acknowledges it.
    fn send_decision(
        &self,
        participant: &ParticipantId,
        gtrid: i64,
        decision: Decision,
    ) -> Result<(), TwoPcError>;
}

#[derive(Debug, Error)]
pub enum TwoPcError {
    #[error("participant unreachable: {0}")]
    Unreachable(String),

    #[error("transaction is not part of a global transaction")]
    NotGlobal,

    #[error("no participants registered for global transaction {0}")]
    NoParticipants(i64),

    #[error("participant voted abort")]
    VotedAbort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unanimous_ready_commits() {
        assert_eq!(decide(&[Vote::Ready, Vote::Ready]), Decision::Commit);
    }

    #[test]
    fn test_any_abort_vote_aborts() {
        assert_eq!(decide(&[Vote::Ready, Vote::Abort]), Decision::Abort);
        assert_eq!(decide(&[Vote::Abort]), Decision::Abort);
    }

    #[test]
    fn test_no_votes_aborts() {
        assert_eq!(decide(&[]), Decision::Abort);
    }
}
