//! Admission of prevote and precommit messages.

use corten_consensus_roles::validator;

use super::{AddVoteError, ProcessError, StateMachine};
use crate::processor::MalformedBlockError;

/// Errors that can occur when processing a vote message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Vote for a height other than the one being decided.
    #[error("vote for height {got}, deciding height {current}")]
    WrongHeight {
        /// Height of the vote.
        got: validator::BlockNumber,
        /// Height being decided.
        current: validator::BlockNumber,
    },
    /// The round exceeds the protocol sanity bound.
    #[error("vote round {round} exceeds the sanity bound")]
    RoundOutOfBounds {
        /// The offending round.
        round: validator::RoundNumber,
    },
    /// The signer is not an active validator.
    #[error("vote from non-committee member {key:?}")]
    NotACommitteeMember {
        /// The signer.
        key: Box<validator::PublicKey>,
    },
    /// The exact same vote was already recorded.
    #[error("vote already recorded")]
    Replay,
    /// The validator cast two different votes of one kind in one round.
    #[error("equivocation: conflicting {kind} from {key:?}", kind = .kind.as_str())]
    Equivocation {
        /// The equivocating validator.
        key: Box<validator::PublicKey>,
        /// Kind of the conflicting votes.
        kind: validator::VoteKind,
    },
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
    /// Processes a vote message: admission checks, durable recording, and
    /// reevaluation of the affected round. The signature was already
    /// verified.
    pub(crate) async fn on_vote(
        &mut self,
        signed: validator::Signed<validator::Vote>,
    ) -> Result<(), Error> {
        let vote = &signed.msg;

        if vote.number != self.number {
            return Err(Error::WrongHeight {
                got: vote.number,
                current: self.number,
            });
        }
        if vote.round.0 > validator::MAX_ROUND {
            return Err(Error::RoundOutOfBounds { round: vote.round });
        }
        if !self.committee.contains(&signed.key) {
            return Err(Error::NotACommitteeMember {
                key: Box::new(signed.key.clone()),
            });
        }

        let kind = vote.kind;
        let round = vote.round;
        self.round_state_mut(round)
            .add_vote(signed.clone())
            .map_err(|err| match err {
                AddVoteError::Replay => Error::Replay,
                AddVoteError::Equivocation { key, kind } => Error::Equivocation { key, kind },
            })?;

        // Persist before acting on it.
        match kind {
            validator::VoteKind::Prevote => self
                .config
                .engine
                .save_prevotes(&[signed])
                .await
                .map_err(Error::Internal)?,
            validator::VoteKind::Precommit => self
                .config
                .engine
                .save_precommits(&[signed])
                .await
                .map_err(Error::Internal)?,
        }

        self.process_round(round).await?;
        Ok(())
    }
}
