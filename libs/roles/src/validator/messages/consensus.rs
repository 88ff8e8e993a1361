//! Votes, proposals and quorum certificates.
use std::fmt;

use bit_vec::BitVec;

use crate::{
    hash::Encoder,
    validator::{
        AggregateSignature, Block, BlockId, BlockNumber, BlockValidationError, Committee,
        InvalidSignatureError, PublicKey, Signed, Weight,
    },
};

/// Number of an agreement attempt within a height. Resets to 0 whenever the
/// height advances; only ever increases while the height is fixed.
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
pub struct RoundNumber(pub u64);

impl RoundNumber {
    /// The next round.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RoundNumber {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(fmt)
    }
}

/// Bitmap of committee members, indexed by committee order. Used to compactly
/// record which validators contributed to a quorum certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signers(pub BitVec);

impl Signers {
    /// An empty bitmap sized for a committee of `n` validators.
    pub fn new(n: usize) -> Self {
        Self(BitVec::from_elem(n, false))
    }

    /// Number of validators that signed.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|b| *b).count()
    }

    /// Size of the corresponding committee.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no signers.
    pub fn is_empty(&self) -> bool {
        self.0.none()
    }

    /// Cumulative weight of the signers.
    /// Panics if the bitmap size does not match the committee.
    pub fn weight(&self, committee: &Committee) -> Weight {
        assert_eq!(self.len(), committee.len());
        committee
            .iter()
            .enumerate()
            .filter(|(i, _)| self.0[*i])
            .map(|(_, v)| v.weight)
            .sum()
    }
}

impl serde::Serialize for Signers {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let record = (self.0.len() as u64, hex::encode(self.0.to_bytes()));
        serde::Serialize::serialize(&record, serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Signers {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (len, text) =
            <(u64, String) as serde::Deserialize>::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        let mut bits = BitVec::from_bytes(&bytes);
        if (len as usize) > bits.len() {
            return Err(serde::de::Error::custom("signer bitmap too short"));
        }
        bits.truncate(len as usize);
        Ok(Self(bits))
    }
}

/// The two vote kinds of the protocol. The kind is part of the signed
/// encoding, so a prevote can never be replayed as a precommit.
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
pub enum VoteKind {
    /// First voting stage; a prevote quorum locks a value.
    Prevote,
    /// Second voting stage; a precommit quorum commits a value.
    Precommit,
}

impl VoteKind {
    fn tag(self) -> u8 {
        match self {
            Self::Prevote => 0,
            Self::Precommit => 1,
        }
    }

    /// Human-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prevote => "prevote",
            Self::Precommit => "precommit",
        }
    }
}

/// A vote cast by a validator for a specific `(height, round)`. `block_id`
/// of `None` is the nil vote: a vote for "no block this round".
///
/// Each validator may cast at most one prevote and one precommit per round;
/// duplicates are rejected on receipt, never merged.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Vote {
    /// Prevote or precommit.
    pub kind: VoteKind,
    /// Height the vote applies to.
    pub number: BlockNumber,
    /// Round the vote applies to.
    pub round: RoundNumber,
    /// The block voted for, or `None` for the nil vote.
    pub block_id: Option<BlockId>,
}

impl Vote {
    pub(crate) fn encode(&self, enc: &mut Encoder) {
        enc.tag(self.kind.tag())
            .u64(self.number.0)
            .u64(self.round.0)
            .opt_digest(self.block_id.as_ref().map(BlockId::as_bytes));
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.block_id {
            Some(id) => write!(
                fmt,
                "{} {}/{} for {:?}",
                self.kind.as_str(),
                self.number,
                self.round,
                id
            ),
            None => write!(
                fmt,
                "{} {}/{} for nil",
                self.kind.as_str(),
                self.number,
                self.round
            ),
        }
    }
}

/// A quorum certificate: one vote message plus the aggregate signature of a
/// supermajority of the committee over it.
///
/// With `kind == Prevote` this is a lock proof (carried by re-proposals);
/// with `kind == Precommit` it is a commit proof (carried by committed
/// blocks).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VoteQC {
    /// The vote every signer signed.
    pub message: Vote,
    /// Which committee members signed.
    pub signers: Signers,
    /// Their signatures, in committee index order.
    pub signature: AggregateSignature,
}

/// Proof that a supermajority prevoted a block in some earlier round.
pub type LockProof = VoteQC;

/// Proof that a supermajority precommitted a block.
pub type CommitProof = VoteQC;

impl VoteQC {
    /// A certificate with no signers yet.
    pub fn new(message: Vote, committee: &Committee) -> Self {
        Self {
            message,
            signers: Signers::new(committee.len()),
            signature: AggregateSignature::default(),
        }
    }

    /// Adds a validator's signed vote. Verifies the vote before adding.
    pub fn add(
        &mut self,
        msg: &Signed<Vote>,
        committee: &Committee,
    ) -> Result<(), VoteQCAddError> {
        let Some(index) = committee.index(&msg.key) else {
            return Err(VoteQCAddError::SignerNotInCommittee {
                signer: Box::new(msg.key.clone()),
            });
        };
        if self.signers.0[index] {
            return Err(VoteQCAddError::DuplicateSigner {
                signer: Box::new(msg.key.clone()),
            });
        }
        if self.message != msg.msg {
            return Err(VoteQCAddError::InconsistentMessages);
        }
        msg.verify().map_err(VoteQCAddError::BadSignature)?;

        // Components are kept in committee index order.
        let rank = self.signers.0.iter().take(index).filter(|b| *b).count();
        self.signers.0.set(index, true);
        self.signature.0.insert(rank, msg.sig.clone());
        Ok(())
    }

    /// Cumulative weight of the signers.
    pub fn weight(&self, committee: &Committee) -> Weight {
        self.signers.weight(committee)
    }

    /// Verifies the certificate against a committee: signer-set size, quorum
    /// weight and the aggregate signature.
    pub fn verify(&self, committee: &Committee) -> Result<(), VoteQCVerifyError> {
        if self.signers.len() != committee.len() {
            return Err(VoteQCVerifyError::BadSignersSet);
        }
        let weight = self.weight(committee);
        let threshold = committee.quorum_threshold();
        if weight < threshold {
            return Err(VoteQCVerifyError::NotEnoughWeight {
                got: weight,
                want: threshold,
            });
        }
        let messages_and_keys = committee
            .keys()
            .enumerate()
            .filter(|(i, _)| self.signers.0[*i])
            .map(|(_, key)| (self.message.clone(), key));
        self.signature
            .verify_messages(messages_and_keys)
            .map_err(VoteQCVerifyError::BadSignature)
    }

    pub(crate) fn digest(&self) -> [u8; 32] {
        let mut enc = Encoder::default();
        self.message.encode(&mut enc);
        enc.bytes(&self.signers.0.to_bytes());
        for sig in &self.signature.0 {
            enc.bytes(&sig.to_bytes());
        }
        enc.finish()
    }
}

/// Error returned by [`VoteQC::add`].
#[derive(Debug, thiserror::Error)]
pub enum VoteQCAddError {
    /// Signer is not in the committee.
    #[error("signer not in committee: {signer:?}")]
    SignerNotInCommittee {
        /// Signer of the vote.
        signer: Box<PublicKey>,
    },
    /// A vote from the same signer is already present.
    #[error("duplicate signer: {signer:?}")]
    DuplicateSigner {
        /// Signer of the vote.
        signer: Box<PublicKey>,
    },
    /// The vote differs from the certificate's message.
    #[error("trying to add a signature for a different vote")]
    InconsistentMessages,
    /// The signature does not verify.
    #[error("bad signature: {0:#}")]
    BadSignature(#[source] InvalidSignatureError),
}

/// Error returned by [`VoteQC::verify`].
#[derive(Debug, thiserror::Error)]
pub enum VoteQCVerifyError {
    /// Bitmap size does not match the committee.
    #[error("signers bitmap doesn't match committee size")]
    BadSignersSet,
    /// The signers do not reach quorum weight.
    #[error("signers below quorum weight: got {got}, want {want}")]
    NotEnoughWeight {
        /// Weight of the signers.
        got: Weight,
        /// Required quorum weight.
        want: Weight,
    },
    /// The aggregate signature does not verify.
    #[error("bad signature: {0:#}")]
    BadSignature(#[source] InvalidSignatureError),
}

/// A proposal for a `(height, round)` slot, authored by that round's selected
/// proposer. Immutable once created.
///
/// A proposal either introduces a fresh block (`valid_round == None`) or
/// re-proposes a block from an earlier round of the same height that gathered
/// a prevote quorum (`valid_round == Some(r)`, `lock_proof` certifying the
/// quorum in `r`). Locks never survive a height boundary: the proof's height
/// must equal the block's height.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Proposal {
    /// The proposed block.
    pub block: Block,
    /// Round this proposal is for.
    pub round: RoundNumber,
    /// Earlier round whose locked block is being re-proposed, if any.
    pub valid_round: Option<RoundNumber>,
    /// Prevote quorum certificate for `valid_round`.
    pub lock_proof: Option<LockProof>,
}

impl Proposal {
    /// Height of the proposal.
    pub fn number(&self) -> BlockNumber {
        self.block.number()
    }

    pub(crate) fn encode(&self, enc: &mut Encoder) {
        enc.u64(self.number().0).u64(self.round.0);
        match self.valid_round {
            Some(round) => enc.tag(1).u64(round.0),
            None => enc.tag(0),
        };
        enc.bytes(self.block.id().as_bytes());
        enc.opt_digest(self.lock_proof.as_ref().map(VoteQC::digest).as_ref());
    }

    /// Verifies the proposal: block consistency, lock-carrying rules, and the
    /// lock proof itself when present.
    pub fn verify(&self, committee: &Committee) -> Result<(), ProposalVerifyError> {
        self.block.verify().map_err(ProposalVerifyError::Block)?;

        let Some(valid_round) = self.valid_round else {
            if self.lock_proof.is_some() {
                return Err(ProposalVerifyError::UnexpectedLockProof);
            }
            if self.block.header.round != self.round {
                return Err(ProposalVerifyError::BlockRoundMismatch {
                    block_round: self.block.header.round,
                    expected: self.round,
                });
            }
            return Ok(());
        };

        if valid_round >= self.round {
            return Err(ProposalVerifyError::ValidRoundNotEarlier {
                valid_round,
                round: self.round,
            });
        }
        // A re-proposed block still carries the round it was forged in.
        if self.block.header.round != valid_round {
            return Err(ProposalVerifyError::BlockRoundMismatch {
                block_round: self.block.header.round,
                expected: valid_round,
            });
        }
        let Some(proof) = &self.lock_proof else {
            return Err(ProposalVerifyError::MissingLockProof);
        };
        let want = Vote {
            kind: VoteKind::Prevote,
            number: self.number(),
            round: valid_round,
            block_id: Some(self.block.id()),
        };
        if proof.message != want {
            return Err(ProposalVerifyError::LockProofMessageMismatch);
        }
        proof
            .verify(committee)
            .map_err(ProposalVerifyError::LockProof)
    }
}

/// Error returned by [`Proposal::verify`].
#[derive(Debug, thiserror::Error)]
pub enum ProposalVerifyError {
    /// The block is internally inconsistent.
    #[error("block: {0:#}")]
    Block(#[source] BlockValidationError),
    /// A lock proof was attached to a fresh proposal.
    #[error("fresh proposal carries a lock proof")]
    UnexpectedLockProof,
    /// `valid_round` does not precede the proposal round.
    #[error("valid round {valid_round} must precede round {round}")]
    ValidRoundNotEarlier {
        /// The claimed valid round.
        valid_round: RoundNumber,
        /// The proposal round.
        round: RoundNumber,
    },
    /// The block header's round disagrees with the proposal.
    #[error("block forged in round {block_round}, expected {expected}")]
    BlockRoundMismatch {
        /// Round recorded in the block header.
        block_round: RoundNumber,
        /// Round implied by the proposal.
        expected: RoundNumber,
    },
    /// A re-proposal without its lock proof.
    #[error("re-proposal is missing its lock proof")]
    MissingLockProof,
    /// The lock proof certifies a different vote.
    #[error("lock proof certifies a different vote")]
    LockProofMessageMismatch,
    /// The lock proof fails verification.
    #[error("lock proof: {0:#}")]
    LockProof(#[source] VoteQCVerifyError),
}

/// A block plus the precommit quorum that finalized it. This is what the
/// commit step hands to the execution engine.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommittedBlock {
    /// The finalized block.
    pub block: Block,
    /// Precommit quorum certificate for the block.
    pub proof: CommitProof,
}

impl CommittedBlock {
    /// Height of the committed block.
    pub fn number(&self) -> BlockNumber {
        self.block.number()
    }

    /// Verifies proof-against-block consistency and the proof itself.
    pub fn verify(&self, committee: &Committee) -> Result<(), CommittedBlockVerifyError> {
        self.block
            .verify()
            .map_err(CommittedBlockVerifyError::Block)?;
        let msg = &self.proof.message;
        if msg.kind != VoteKind::Precommit
            || msg.number != self.block.number()
            || msg.block_id != Some(self.block.id())
        {
            return Err(CommittedBlockVerifyError::ProofMismatch);
        }
        self.proof
            .verify(committee)
            .map_err(CommittedBlockVerifyError::Proof)
    }
}

/// Error returned by [`CommittedBlock::verify`].
#[derive(Debug, thiserror::Error)]
pub enum CommittedBlockVerifyError {
    /// The block is internally inconsistent.
    #[error("block: {0:#}")]
    Block(#[source] BlockValidationError),
    /// The proof certifies something other than this block.
    #[error("commit proof doesn't certify this block")]
    ProofMismatch,
    /// The proof fails verification.
    #[error("commit proof: {0:#}")]
    Proof(#[source] VoteQCVerifyError),
}
