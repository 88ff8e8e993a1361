//! Admission of proposal messages.

use corten_consensus_roles::validator;

use super::{ProcessError, StateMachine};
use crate::processor::MalformedBlockError;

/// Errors that can occur when processing a proposal message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Proposal for a height other than the one being decided.
    #[error("proposal for height {got}, deciding height {current}")]
    WrongHeight {
        /// Height of the proposal.
        got: validator::BlockNumber,
        /// Height being decided.
        current: validator::BlockNumber,
    },
    /// The round exceeds the protocol sanity bound.
    #[error("proposal round {round} exceeds the sanity bound")]
    RoundOutOfBounds {
        /// The offending round.
        round: validator::RoundNumber,
    },
    /// The author does not own the proposal slot.
    #[error("invalid proposer (expected {expected:?}, received {received:?})")]
    InvalidProposer {
        /// The validator that owns the slot.
        expected: validator::PublicKey,
        /// The author of the message.
        received: validator::PublicKey,
    },
    /// A proposal for this round was already recorded.
    #[error("duplicate proposal for round {round}")]
    Duplicate {
        /// Round of the proposal.
        round: validator::RoundNumber,
    },
    /// The proposal fails its own validity rules.
    #[error("invalid proposal: {0:#}")]
    InvalidMessage(#[source] validator::ProposalVerifyError),
    /// A malformed block producer was detected downstream.
    #[error("malformed block: {0:#}")]
    Malformed(#[source] MalformedBlockError),
    /// Internal error. Not supposed to be easily recoverable.
    #[error(transparent)]
    Internal(anyhow::Error),
}

impl From<ProcessError> for Error {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Malformed(err) => Self::Malformed(err),
            ProcessError::Internal(err) => Self::Internal(err),
        }
    }
}

impl StateMachine {
    /// Processes a proposal message: admission checks, durable recording, and
    /// reevaluation of the affected round. The signature was already verified.
    pub(crate) async fn on_proposal(
        &mut self,
        signed: validator::Signed<validator::Proposal>,
    ) -> Result<(), Error> {
        let proposal = &signed.msg;

        if proposal.number() != self.number {
            return Err(Error::WrongHeight {
                got: proposal.number(),
                current: self.number,
            });
        }
        if proposal.round.0 > validator::MAX_ROUND {
            return Err(Error::RoundOutOfBounds {
                round: proposal.round,
            });
        }

        // Only the selected proposer may propose for this slot.
        let expected = self
            .selector
            .proposer(self.number, proposal.round, &self.committee)
            .clone();
        if signed.key != expected {
            return Err(Error::InvalidProposer {
                expected,
                received: signed.key.clone(),
            });
        }

        // Structural validity, lock-carrying rules and the lock proof.
        proposal
            .verify(&self.committee)
            .map_err(Error::InvalidMessage)?;

        let round = proposal.round;
        let slot = self.round_state_mut(round);
        if slot.proposal.is_some() {
            return Err(Error::Duplicate { round });
        }
        slot.proposal = Some(signed.clone());

        // Persist before acting on it.
        self.config
            .engine
            .save_proposals(&[signed])
            .await
            .map_err(Error::Internal)?;

        self.process_round(round).await?;
        Ok(())
    }
}
