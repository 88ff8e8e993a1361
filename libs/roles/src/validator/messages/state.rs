//! The persisted consensus state record.
use std::fmt;

use crate::validator::{BlockNumber, RoundNumber};

/// Step of the consensus state machine within a round.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Step {
    /// Waiting for (or producing) the round's proposal.
    Propose,
    /// Collecting prevotes.
    Prevote,
    /// Collecting precommits.
    Precommit,
    /// Terminal step of a height; the block is being committed.
    Commit,
}

impl fmt::Display for Step {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Propose => "propose",
            Self::Prevote => "prevote",
            Self::Precommit => "precommit",
            Self::Commit => "commit",
        };
        fmt.write_str(name)
    }
}

/// Snapshot of the state machine's position, persisted after every mutation
/// so a crash mid-round resumes from storage instead of the network.
///
/// Within a height the record is monotonic: the round never decreases and the
/// step only advances (a round bump resets the step to `Propose`). Locked and
/// valid values are recovered from the persisted proposals, so only their
/// round numbers are recorded here.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConsensusState {
    /// Height being decided.
    pub number: BlockNumber,
    /// Current round within the height.
    pub round: RoundNumber,
    /// Current step within the round.
    pub step: Step,
    /// Round of the block this node is locked on, if any.
    pub locked_round: Option<RoundNumber>,
    /// Round of the newest block known to have gathered a prevote quorum.
    pub valid_round: Option<RoundNumber>,
}

impl ConsensusState {
    /// Initial state for a fresh height.
    pub fn new(number: BlockNumber) -> Self {
        Self {
            number,
            round: RoundNumber(0),
            step: Step::Propose,
            locked_round: None,
            valid_round: None,
        }
    }
}

impl fmt::Display for ConsensusState {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}/{}/{}", self.number, self.round, self.step)
    }
}
