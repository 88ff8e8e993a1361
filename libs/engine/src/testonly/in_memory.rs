//! In-memory engine implementations.
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use corten_consensus_roles::validator;
use rand::RngCore as _;

use crate::{ChainEvent, ChainInterface, Collator as CollatorTrait, CommitKey, ConsensusStorage};

/// In-memory chain stub: a vector of applied blocks plus the account-nonce
/// table and the validator registration snapshot.
#[derive(Clone, Debug)]
pub struct Chain(Arc<ChainInner>);

#[derive(Debug)]
struct ChainInner {
    blocks: Mutex<Vec<validator::Block>>,
    nonces: Mutex<HashMap<validator::PublicKey, u64>>,
    registrations: Mutex<Vec<validator::WeightedValidator>>,
    events: Mutex<Vec<ChainEvent>>,
    synced: AtomicBool,
    reset_calls: AtomicUsize,
    fail_reads: AtomicBool,
}

impl Chain {
    /// A chain with the given genesis block applied.
    pub fn new(
        genesis: validator::Block,
        registrations: Vec<validator::WeightedValidator>,
    ) -> Self {
        Self::with_blocks(vec![genesis], registrations)
    }

    /// A chain with no blocks; the genesis is yet to be committed.
    pub fn empty(registrations: Vec<validator::WeightedValidator>) -> Self {
        Self::with_blocks(vec![], registrations)
    }

    fn with_blocks(
        blocks: Vec<validator::Block>,
        registrations: Vec<validator::WeightedValidator>,
    ) -> Self {
        Self(Arc::new(ChainInner {
            blocks: Mutex::new(blocks),
            nonces: Mutex::default(),
            registrations: Mutex::new(registrations),
            events: Mutex::default(),
            synced: AtomicBool::new(true),
            reset_calls: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
        }))
    }

    /// Makes every subsequent read fail, simulating a broken backend.
    pub fn fail_reads(&self, fail: bool) {
        self.0.fail_reads.store(fail, Ordering::Relaxed);
    }

    fn check_readable(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.0.fail_reads.load(Ordering::Relaxed),
            "chain read failed"
        );
        Ok(())
    }

    /// Overrides the last applied nonce of an account.
    pub fn set_nonce(&self, sender: &validator::PublicKey, nonce: u64) {
        self.0
            .nonces
            .lock()
            .unwrap()
            .insert(sender.clone(), nonce);
    }

    /// Marks the node as (un)synced.
    pub fn set_synced(&self, synced: bool) {
        self.0.synced.store(synced, Ordering::Relaxed);
    }

    /// All applied blocks, genesis included.
    pub fn blocks(&self) -> Vec<validator::Block> {
        self.0.blocks.lock().unwrap().clone()
    }

    /// Chain events dispatched so far.
    pub fn events(&self) -> Vec<ChainEvent> {
        self.0.events.lock().unwrap().clone()
    }

    /// Number of `reset_last_downloaded_block` calls observed.
    pub fn reset_calls(&self) -> usize {
        self.0.reset_calls.load(Ordering::Relaxed)
    }

    /// Replaces the validator registration snapshot.
    pub fn set_registrations(&self, registrations: Vec<validator::WeightedValidator>) {
        *self.0.registrations.lock().unwrap() = registrations;
    }
}

#[async_trait::async_trait]
impl ChainInterface for Chain {
    async fn last_block(&self) -> anyhow::Result<Option<validator::Block>> {
        self.check_readable()?;
        Ok(self.0.blocks.lock().unwrap().last().cloned())
    }

    async fn last_height(&self) -> anyhow::Result<Option<validator::BlockNumber>> {
        Ok(self.last_block().await?.map(|block| block.number()))
    }

    async fn is_synced(&self) -> anyhow::Result<bool> {
        Ok(self.0.synced.load(Ordering::Relaxed))
    }

    async fn dispatch(&self, event: ChainEvent) -> anyhow::Result<()> {
        self.0.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn reset_last_downloaded_block(&self) -> anyhow::Result<()> {
        self.0.reset_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn account_nonce(&self, sender: &validator::PublicKey) -> anyhow::Result<u64> {
        self.check_readable()?;
        Ok(self
            .0
            .nonces
            .lock()
            .unwrap()
            .get(sender)
            .copied()
            .unwrap_or(0))
    }

    async fn validator_registrations(
        &self,
        _number: validator::BlockNumber,
    ) -> anyhow::Result<Vec<validator::WeightedValidator>> {
        Ok(self.0.registrations.lock().unwrap().clone())
    }

    async fn apply_block(&self, block: &validator::CommittedBlock) -> anyhow::Result<()> {
        let mut blocks = self.0.blocks.lock().unwrap();
        match blocks.last() {
            Some(tip) => anyhow::ensure!(
                block.block.header.previous == tip.id(),
                "applied block doesn't chain onto the tip"
            ),
            None => anyhow::ensure!(
                block.block.number().is_genesis()
                    && block.block.header.previous == validator::BlockId::zero(),
                "first applied block must be the genesis block"
            ),
        }
        let mut nonces = self.0.nonces.lock().unwrap();
        for tx in &block.block.transactions {
            nonces.insert(tx.sender.clone(), tx.nonce);
        }
        blocks.push(block.block.clone());
        Ok(())
    }

    async fn revert_block(&self) -> anyhow::Result<Option<validator::BlockNumber>> {
        let mut blocks = self.0.blocks.lock().unwrap();
        anyhow::ensure!(blocks.pop().is_some(), "nothing to revert");
        Ok(blocks.last().map(|block| block.number()))
    }
}

/// In-memory collator stub.
#[derive(Clone, Debug, Default)]
pub struct Collator(Arc<Mutex<CollatorMode>>);

/// What the stub returns from `candidate_transactions`.
#[derive(Debug, Default)]
pub enum CollatorMode {
    /// No transactions (empty blocks).
    #[default]
    Empty,
    /// A fixed batch.
    Fixed(Vec<validator::Transaction>),
    /// `n` transactions with random payloads from a throwaway sender.
    Random(usize),
}

impl Collator {
    /// Replaces the collation mode.
    pub fn set_mode(&self, mode: CollatorMode) {
        *self.0.lock().unwrap() = mode;
    }
}

#[async_trait::async_trait]
impl CollatorTrait for Collator {
    async fn candidate_transactions(
        &self,
        _commit_key: CommitKey,
    ) -> anyhow::Result<Vec<validator::Transaction>> {
        match &*self.0.lock().unwrap() {
            CollatorMode::Empty => Ok(vec![]),
            CollatorMode::Fixed(txs) => Ok(txs.clone()),
            CollatorMode::Random(n) => {
                let sender = validator::SecretKey::generate();
                Ok((0..*n as u64)
                    .map(|nonce| {
                        let mut payload = vec![0; 32];
                        rand::thread_rng().fill_bytes(&mut payload);
                        validator::Transaction {
                            version: 1,
                            sender: sender.public(),
                            nonce: nonce + 1,
                            payload,
                        }
                    })
                    .collect())
            }
        }
    }
}

type VoteMap = BTreeMap<(u64, validator::PublicKey), validator::Signed<validator::Vote>>;

/// In-memory consensus storage with a write fail-switch for exercising the
/// infrastructure-failure path.
#[derive(Clone, Debug, Default)]
pub struct Storage(Arc<StorageInner>);

#[derive(Debug, Default)]
struct StorageInner {
    state: Mutex<Option<validator::ConsensusState>>,
    proposals:
        Mutex<BTreeMap<(u64, validator::PublicKey), validator::Signed<validator::Proposal>>>,
    prevotes: Mutex<VoteMap>,
    precommits: Mutex<VoteMap>,
    fail_writes: AtomicBool,
}

impl Storage {
    /// Makes every subsequent write fail, simulating a broken backend.
    pub fn fail_writes(&self, fail: bool) {
        self.0.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.0.fail_writes.load(Ordering::Relaxed),
            "storage write failed"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConsensusStorage for Storage {
    async fn state(&self) -> anyhow::Result<Option<validator::ConsensusState>> {
        Ok(self.0.state.lock().unwrap().clone())
    }

    async fn save_state(&self, state: &validator::ConsensusState) -> anyhow::Result<()> {
        self.check_writable()?;
        *self.0.state.lock().unwrap() = Some(state.clone());
        Ok(())
    }

    async fn proposals(&self) -> anyhow::Result<Vec<validator::Signed<validator::Proposal>>> {
        Ok(self.0.proposals.lock().unwrap().values().cloned().collect())
    }

    async fn save_proposals(
        &self,
        proposals: &[validator::Signed<validator::Proposal>],
    ) -> anyhow::Result<()> {
        self.check_writable()?;
        let mut map = self.0.proposals.lock().unwrap();
        for proposal in proposals {
            map.insert(
                (proposal.msg.round.0, proposal.key.clone()),
                proposal.clone(),
            );
        }
        Ok(())
    }

    async fn prevotes(&self) -> anyhow::Result<Vec<validator::Signed<validator::Vote>>> {
        Ok(self.0.prevotes.lock().unwrap().values().cloned().collect())
    }

    async fn save_prevotes(
        &self,
        votes: &[validator::Signed<validator::Vote>],
    ) -> anyhow::Result<()> {
        self.check_writable()?;
        let mut map = self.0.prevotes.lock().unwrap();
        for vote in votes {
            map.insert((vote.msg.round.0, vote.key.clone()), vote.clone());
        }
        Ok(())
    }

    async fn precommits(&self) -> anyhow::Result<Vec<validator::Signed<validator::Vote>>> {
        Ok(self
            .0
            .precommits
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect())
    }

    async fn save_precommits(
        &self,
        votes: &[validator::Signed<validator::Vote>],
    ) -> anyhow::Result<()> {
        self.check_writable()?;
        let mut map = self.0.precommits.lock().unwrap();
        for vote in votes {
            map.insert((vote.msg.round.0, vote.key.clone()), vote.clone());
        }
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        *self.0.state.lock().unwrap() = None;
        self.0.proposals.lock().unwrap().clear();
        self.0.prevotes.lock().unwrap().clear();
        self.0.precommits.lock().unwrap().clear();
        Ok(())
    }
}
