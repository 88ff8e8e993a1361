use std::time::Instant;

use corten_consensus_roles::validator;

use crate::{
    metrics::ENGINE, ChainEvent, ChainInterface, Collator, CommitKey, ConsensusStorage,
};

/// The one handle the consensus component holds on the outside world. Bundles
/// the chain, collator and storage contracts, and instruments the calls that
/// matter for liveness diagnostics.
///
/// The manager takes ownership of the passed implementations; callers should
/// go through it rather than keeping their own references.
#[derive(Debug)]
pub struct EngineManager {
    chain: Box<dyn ChainInterface>,
    collator: Box<dyn Collator>,
    storage: Box<dyn ConsensusStorage>,
}

impl EngineManager {
    /// Constructs an `EngineManager`.
    pub fn new(
        chain: Box<dyn ChainInterface>,
        collator: Box<dyn Collator>,
        storage: Box<dyn ConsensusStorage>,
    ) -> Self {
        Self {
            chain,
            collator,
            storage,
        }
    }

    /// The current chain tip, or `None` while the chain is empty.
    pub async fn last_block(&self) -> anyhow::Result<Option<validator::Block>> {
        self.chain.last_block().await
    }

    /// Height of the current chain tip, or `None` while the chain is empty.
    pub async fn last_height(&self) -> anyhow::Result<Option<validator::BlockNumber>> {
        self.chain.last_height().await
    }

    /// Whether the node considers itself in sync with the network.
    pub async fn is_synced(&self) -> anyhow::Result<bool> {
        self.chain.is_synced().await
    }

    /// Publishes a chain-level event.
    pub async fn dispatch(&self, event: ChainEvent) -> anyhow::Result<()> {
        tracing::debug!(?event, "dispatching chain event");
        self.chain.dispatch(event).await
    }

    /// Clears the sync layer's "last downloaded block" pointer.
    pub async fn reset_last_downloaded_block(&self) -> anyhow::Result<()> {
        self.chain.reset_last_downloaded_block().await
    }

    /// Last applied nonce of the given sender account.
    pub async fn account_nonce(&self, sender: &validator::PublicKey) -> anyhow::Result<u64> {
        self.chain.account_nonce(sender).await
    }

    /// Registered validators for the given height.
    pub async fn validator_registrations(
        &self,
        number: validator::BlockNumber,
    ) -> anyhow::Result<Vec<validator::WeightedValidator>> {
        self.chain.validator_registrations(number).await
    }

    /// Applies a committed block to chain state.
    pub async fn apply_block(&self, block: &validator::CommittedBlock) -> anyhow::Result<()> {
        let started = Instant::now();
        self.chain.apply_block(block).await?;
        ENGINE.apply_block_latency.observe(started.elapsed());
        Ok(())
    }

    /// Unwinds the current tip.
    pub async fn revert_block(&self) -> anyhow::Result<Option<validator::BlockNumber>> {
        tracing::warn!("reverting chain tip");
        self.chain.revert_block().await
    }

    /// A batch of candidate transactions for block assembly.
    pub async fn candidate_transactions(
        &self,
        commit_key: CommitKey,
    ) -> anyhow::Result<Vec<validator::Transaction>> {
        let started = Instant::now();
        let txs = self.collator.candidate_transactions(commit_key).await?;
        ENGINE.collation_latency.observe(started.elapsed());
        Ok(txs)
    }

    /// The persisted consensus state record, if any.
    pub async fn state(&self) -> anyhow::Result<Option<validator::ConsensusState>> {
        self.storage.state().await
    }

    /// Overwrites the consensus state record.
    pub async fn save_state(&self, state: &validator::ConsensusState) -> anyhow::Result<()> {
        let started = Instant::now();
        self.storage.save_state(state).await?;
        ENGINE.storage_write_latency.observe(started.elapsed());
        Ok(())
    }

    /// All persisted proposals for the current height.
    pub async fn proposals(
        &self,
    ) -> anyhow::Result<Vec<validator::Signed<validator::Proposal>>> {
        self.storage.proposals().await
    }

    /// Appends proposals to storage.
    pub async fn save_proposals(
        &self,
        proposals: &[validator::Signed<validator::Proposal>],
    ) -> anyhow::Result<()> {
        let started = Instant::now();
        self.storage.save_proposals(proposals).await?;
        ENGINE.storage_write_latency.observe(started.elapsed());
        Ok(())
    }

    /// All persisted prevotes for the current height.
    pub async fn prevotes(&self) -> anyhow::Result<Vec<validator::Signed<validator::Vote>>> {
        self.storage.prevotes().await
    }

    /// Appends prevotes to storage.
    pub async fn save_prevotes(
        &self,
        votes: &[validator::Signed<validator::Vote>],
    ) -> anyhow::Result<()> {
        let started = Instant::now();
        self.storage.save_prevotes(votes).await?;
        ENGINE.storage_write_latency.observe(started.elapsed());
        Ok(())
    }

    /// All persisted precommits for the current height.
    pub async fn precommits(&self) -> anyhow::Result<Vec<validator::Signed<validator::Vote>>> {
        self.storage.precommits().await
    }

    /// Appends precommits to storage.
    pub async fn save_precommits(
        &self,
        votes: &[validator::Signed<validator::Vote>],
    ) -> anyhow::Result<()> {
        let started = Instant::now();
        self.storage.save_precommits(votes).await?;
        ENGINE.storage_write_latency.observe(started.elapsed());
        Ok(())
    }

    /// Drops all consensus records. Called on commit of a height.
    pub async fn clear_storage(&self) -> anyhow::Result<()> {
        self.storage.clear().await
    }
}
