use std::fmt;

use corten_consensus_roles::validator;

/// Chain-level reactions published by the consensus component through
/// [`ChainInterface::dispatch`]. Downstream services (sync, API, peer layer)
/// subscribe to these; consensus does not care who listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    /// A block was committed and applied to state.
    BlockApplied {
        /// Height of the applied block.
        number: validator::BlockNumber,
        /// Id of the applied block.
        id: validator::BlockId,
    },
    /// A candidate block was rejected by the verification pipeline.
    BlockRejected {
        /// Id of the rejected block.
        id: validator::BlockId,
    },
    /// A competing heavier fork was detected; the chain is unwinding.
    ForkDetected {
        /// Height at which the fork was detected.
        number: validator::BlockNumber,
    },
}

/// Key identifying the block-assembly attempt a batch of candidate
/// transactions is collated for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommitKey {
    /// Height of the block being assembled.
    pub number: validator::BlockNumber,
    /// Round of the block being assembled.
    pub round: validator::RoundNumber,
}

/// State access and block application, implemented by the chain/execution
/// layer. Read paths never mutate chain state; `apply_block`/`revert_block`
/// are the only mutating entry points and are driven exclusively by the
/// consensus commit/rollback steps.
#[async_trait::async_trait]
pub trait ChainInterface: 'static + fmt::Debug + Send + Sync {
    /// The current chain tip, or `None` while the chain is empty (genesis not
    /// yet committed).
    async fn last_block(&self) -> anyhow::Result<Option<validator::Block>>;

    /// Height of the current chain tip, or `None` while the chain is empty.
    async fn last_height(&self) -> anyhow::Result<Option<validator::BlockNumber>>;

    /// Whether the node considers itself in sync with the network.
    async fn is_synced(&self) -> anyhow::Result<bool>;

    /// Publishes a chain-level event.
    async fn dispatch(&self, event: ChainEvent) -> anyhow::Result<()>;

    /// Clears the sync layer's "last downloaded block" pointer so a stale
    /// pointer cannot wedge block download after a rejection.
    async fn reset_last_downloaded_block(&self) -> anyhow::Result<()>;

    /// Last applied nonce of the given sender account.
    async fn account_nonce(&self, sender: &validator::PublicKey) -> anyhow::Result<u64>;

    /// The registered validators and their voting weight, per the canonical
    /// wallet/state snapshot for the given height.
    async fn validator_registrations(
        &self,
        number: validator::BlockNumber,
    ) -> anyhow::Result<Vec<validator::WeightedValidator>>;

    /// Applies a committed block to chain state.
    async fn apply_block(&self, block: &validator::CommittedBlock) -> anyhow::Result<()>;

    /// Unwinds the current tip, restoring the previous block as tip. Returns
    /// the new tip height, or `None` when the chain is empty afterwards.
    async fn revert_block(&self) -> anyhow::Result<Option<validator::BlockNumber>>;
}

/// Supplier of candidate transactions for block assembly, implemented by the
/// transaction pool. Admission and eviction policy are its own business.
#[async_trait::async_trait]
pub trait Collator: 'static + fmt::Debug + Send + Sync {
    /// A batch of transactions fit for inclusion in the block identified by
    /// `commit_key`, in execution order.
    async fn candidate_transactions(
        &self,
        commit_key: CommitKey,
    ) -> anyhow::Result<Vec<validator::Transaction>>;
}

/// Durable, height-scoped persistence of consensus progress. Every mutation
/// the state machine makes is written here synchronously before being acted
/// upon, so a crash mid-round resumes from storage instead of re-running the
/// network protocol.
///
/// The records are scoped to the height currently being decided: `clear()` is
/// invoked on a successful commit (never on a round timeout) and atomically
/// drops the state record and all three collections.
#[async_trait::async_trait]
pub trait ConsensusStorage: 'static + fmt::Debug + Send + Sync {
    /// The persisted state record, if any.
    async fn state(&self) -> anyhow::Result<Option<validator::ConsensusState>>;

    /// Overwrites the state record.
    async fn save_state(&self, state: &validator::ConsensusState) -> anyhow::Result<()>;

    /// All persisted proposals for the current height.
    async fn proposals(&self) -> anyhow::Result<Vec<validator::Signed<validator::Proposal>>>;

    /// Appends proposals. Keyed by `(round, signer)`; re-saving an existing
    /// key overwrites it.
    async fn save_proposals(
        &self,
        proposals: &[validator::Signed<validator::Proposal>],
    ) -> anyhow::Result<()>;

    /// All persisted prevotes for the current height.
    async fn prevotes(&self) -> anyhow::Result<Vec<validator::Signed<validator::Vote>>>;

    /// Appends prevotes, keyed by `(round, signer)`.
    async fn save_prevotes(
        &self,
        votes: &[validator::Signed<validator::Vote>],
    ) -> anyhow::Result<()>;

    /// All persisted precommits for the current height.
    async fn precommits(&self) -> anyhow::Result<Vec<validator::Signed<validator::Vote>>>;

    /// Appends precommits, keyed by `(round, signer)`.
    async fn save_precommits(
        &self,
        votes: &[validator::Signed<validator::Vote>],
    ) -> anyhow::Result<()>;

    /// Drops everything. Called on commit of a height, and only then.
    async fn clear(&self) -> anyhow::Result<()>;
}
