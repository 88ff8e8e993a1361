//! Per-round message collections and weight tallies.

use std::collections::BTreeMap;

use corten_consensus_roles::validator;

/// Error returned when recording a vote.
#[derive(Debug, thiserror::Error)]
pub(crate) enum AddVoteError {
    /// The exact same vote was already recorded.
    #[error("vote already recorded")]
    Replay,
    /// The validator already cast a different vote of this kind this round.
    #[error("conflicting {kind} from {key:?} in the same round", kind = .kind.as_str())]
    Equivocation {
        /// The equivocating validator.
        key: Box<validator::PublicKey>,
        /// Kind of the conflicting vote.
        kind: validator::VoteKind,
    },
}

/// Everything seen for one `(height, round)` slot: the proposal, its pipeline
/// verdict, and at most one prevote and one precommit per validator.
/// Duplicate votes are rejected, never merged.
#[derive(Debug)]
pub(crate) struct RoundState {
    /// Height of the slot.
    pub(crate) number: validator::BlockNumber,
    /// Round of the slot.
    pub(crate) round: validator::RoundNumber,
    /// The proposal received or authored for this round, if any.
    pub(crate) proposal: Option<validator::Signed<validator::Proposal>>,
    /// Verdict of the block processor over the proposal, once computed.
    pub(crate) processor_result: Option<bool>,
    prevotes: BTreeMap<validator::PublicKey, validator::Signed<validator::Vote>>,
    precommits: BTreeMap<validator::PublicKey, validator::Signed<validator::Vote>>,
}

impl RoundState {
    /// An empty slot.
    pub(crate) fn new(number: validator::BlockNumber, round: validator::RoundNumber) -> Self {
        Self {
            number,
            round,
            proposal: None,
            processor_result: None,
            prevotes: BTreeMap::new(),
            precommits: BTreeMap::new(),
        }
    }

    fn votes(
        &self,
        kind: validator::VoteKind,
    ) -> &BTreeMap<validator::PublicKey, validator::Signed<validator::Vote>> {
        match kind {
            validator::VoteKind::Prevote => &self.prevotes,
            validator::VoteKind::Precommit => &self.precommits,
        }
    }

    /// Records a vote. At most one vote per `(validator, kind)`; an identical
    /// resend is a replay, a differing one is equivocation.
    pub(crate) fn add_vote(
        &mut self,
        signed: validator::Signed<validator::Vote>,
    ) -> Result<(), AddVoteError> {
        let kind = signed.msg.kind;
        let votes = match kind {
            validator::VoteKind::Prevote => &mut self.prevotes,
            validator::VoteKind::Precommit => &mut self.precommits,
        };
        if let Some(existing) = votes.get(&signed.key) {
            if existing.msg == signed.msg {
                return Err(AddVoteError::Replay);
            }
            return Err(AddVoteError::Equivocation {
                key: Box::new(signed.key.clone()),
                kind,
            });
        }
        votes.insert(signed.key.clone(), signed);
        Ok(())
    }

    /// Whether the given validator already voted with this kind.
    pub(crate) fn has_vote(&self, kind: validator::VoteKind, key: &validator::PublicKey) -> bool {
        self.votes(kind).contains_key(key)
    }

    /// Cumulative weight of votes of `kind` for exactly `block_id`.
    pub(crate) fn vote_weight(
        &self,
        kind: validator::VoteKind,
        block_id: &Option<validator::BlockId>,
        committee: &validator::Committee,
    ) -> validator::Weight {
        self.votes(kind)
            .values()
            .filter(|signed| &signed.msg.block_id == block_id)
            .filter_map(|signed| committee.index(&signed.key))
            .filter_map(|index| committee.get(index))
            .map(|v| v.weight)
            .sum()
    }

    /// Cumulative weight of all votes of `kind`, regardless of target.
    pub(crate) fn total_weight(
        &self,
        kind: validator::VoteKind,
        committee: &validator::Committee,
    ) -> validator::Weight {
        self.votes(kind)
            .values()
            .filter_map(|signed| committee.index(&signed.key))
            .filter_map(|index| committee.get(index))
            .map(|v| v.weight)
            .sum()
    }

    /// The vote target (a block id, or `None` for nil) that gathered quorum
    /// weight, if any.
    pub(crate) fn quorum_target(
        &self,
        kind: validator::VoteKind,
        committee: &validator::Committee,
    ) -> Option<Option<validator::BlockId>> {
        let threshold = committee.quorum_threshold();
        let mut tallies: BTreeMap<Option<validator::BlockId>, validator::Weight> = BTreeMap::new();
        for signed in self.votes(kind).values() {
            let Some(index) = committee.index(&signed.key) else {
                continue;
            };
            let weight = committee.get(index).expect("index is valid").weight;
            let tally = tallies.entry(signed.msg.block_id).or_default();
            *tally += weight;
            if *tally >= threshold {
                return Some(signed.msg.block_id);
            }
        }
        None
    }

    /// Builds a quorum certificate from the recorded votes of `kind` for
    /// `block_id`. Fails if the recorded votes don't reach quorum.
    pub(crate) fn aggregate(
        &self,
        kind: validator::VoteKind,
        block_id: Option<validator::BlockId>,
        committee: &validator::Committee,
    ) -> anyhow::Result<validator::VoteQC> {
        let message = validator::Vote {
            kind,
            number: self.number,
            round: self.round,
            block_id,
        };
        let mut qc = validator::VoteQC::new(message.clone(), committee);
        for signed in self.votes(kind).values() {
            if signed.msg != message {
                continue;
            }
            qc.add(signed, committee)
                .map_err(|err| anyhow::anyhow!("aggregating votes: {err:#}"))?;
        }
        anyhow::ensure!(
            qc.weight(committee) >= committee.quorum_threshold(),
            "recorded votes don't reach quorum"
        );
        Ok(qc)
    }

    /// Number of recorded votes of `kind`, for logging.
    pub(crate) fn vote_count(&self, kind: validator::VoteKind) -> usize {
        self.votes(kind).len()
    }
}
