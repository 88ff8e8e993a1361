//! Test-only fixtures for the validator role.
use rand::{
    distributions::{Distribution, Standard},
    Rng,
};

use crate::validator::{
    Block, BlockHeader, BlockId, BlockNumber, Committee, Milestone, MilestoneSchedule, MsgHash,
    PayloadHash, Proposal, PublicKey, RoundNumber, SecretKey, Signed, Transaction, TxId, Vote,
    VoteKind, VoteQC, WeightedValidator,
};

/// A committee of freshly generated validators with their secret keys, plus a
/// default milestone schedule. Instantiated once per test.
#[derive(Clone, Debug)]
pub struct Setup {
    /// Secret keys, in committee index order.
    pub keys: Vec<SecretKey>,
    /// The committee over the corresponding public keys.
    pub committee: Committee,
    /// Milestone schedule with the default parameters.
    pub milestones: MilestoneSchedule,
}

impl Setup {
    /// A committee of `n` validators with equal weight.
    pub fn new(rng: &mut (impl Rng + rand::CryptoRng), n: usize) -> Self {
        Self::new_weighted(rng, vec![100; n])
    }

    /// A committee with the given weights.
    pub fn new_weighted(rng: &mut (impl Rng + rand::CryptoRng), weights: Vec<u64>) -> Self {
        let mut keys: Vec<SecretKey> = (0..weights.len())
            .map(|_| SecretKey::generate_from(rng))
            .collect();
        // Committee construction sorts by key; keep `keys` in the same order
        // so indices line up.
        keys.sort_by_key(|key| key.public().to_bytes());
        let committee = Committee::new(
            keys.iter()
                .zip(weights)
                .map(|(key, weight)| WeightedValidator {
                    key: key.public(),
                    weight,
                }),
        )
        .unwrap();
        Self {
            keys,
            committee,
            milestones: MilestoneSchedule::constant(Milestone::default()),
        }
    }

    /// Key of the validator at the given committee index.
    pub fn key(&self, index: usize) -> &SecretKey {
        &self.keys[index]
    }

    /// Builds a block on top of the given parent.
    pub fn make_block(
        &self,
        parent: Option<&Block>,
        round: RoundNumber,
        generator: &PublicKey,
        transactions: Vec<Transaction>,
    ) -> Block {
        let (number, previous, timestamp) = match parent {
            Some(parent) => (
                parent.number().next(),
                parent.id(),
                parent.header.timestamp + 8000,
            ),
            None => (BlockNumber(0), BlockId::zero(), 1_700_000_000_000),
        };
        let header = BlockHeader {
            number,
            round,
            previous,
            timestamp,
            generator: generator.clone(),
            payload_hash: Block::payload_hash(&transactions),
            tx_count: transactions.len() as u32,
        };
        Block {
            header,
            transactions,
        }
    }

    /// A vote signed by the validator at `index`.
    pub fn signed_vote(
        &self,
        index: usize,
        kind: VoteKind,
        number: BlockNumber,
        round: RoundNumber,
        block_id: Option<BlockId>,
    ) -> Signed<Vote> {
        self.keys[index].sign_msg(Vote {
            kind,
            number,
            round,
            block_id,
        })
    }

    /// A quorum certificate signed by the validators at `signers`.
    pub fn make_qc(&self, vote: Vote, signers: &[usize]) -> VoteQC {
        let mut qc = VoteQC::new(vote.clone(), &self.committee);
        for &index in signers {
            qc.add(&self.keys[index].sign_msg(vote.clone()), &self.committee)
                .unwrap();
        }
        qc
    }

    /// A fresh proposal for the given block, signed data left to the caller.
    pub fn make_proposal(&self, block: Block, round: RoundNumber) -> Proposal {
        Proposal {
            block,
            round,
            valid_round: None,
            lock_proof: None,
        }
    }
}

/// A transaction with the given sender and nonce.
pub fn make_tx(sender: &SecretKey, version: u8, nonce: u64) -> Transaction {
    Transaction {
        version,
        sender: sender.public(),
        nonce,
        payload: vec![0xca, 0xfe],
    }
}

impl Distribution<BlockId> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> BlockId {
        BlockId(rng.gen())
    }
}

impl Distribution<PayloadHash> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> PayloadHash {
        PayloadHash(rng.gen())
    }
}

impl Distribution<TxId> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> TxId {
        TxId(rng.gen())
    }
}

impl Distribution<MsgHash> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> MsgHash {
        MsgHash(rng.gen())
    }
}
