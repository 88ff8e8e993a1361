//! The block processor: runs the verification pipeline over candidate blocks
//! and reduces the outcome to a single enumerated verdict.

use std::sync::Arc;

use corten_consensus_engine::{ChainEvent, EngineManager};
use corten_consensus_roles::validator;

use crate::{
    metrics::{VerdictLabel, VerdictLabels, METRICS},
    selector::ProposerSelector,
    validator_set::ValidatorSetService,
};

mod verifiers;
#[cfg(test)]
mod tests;

pub use verifiers::minimal_timestamp;
pub(crate) use verifiers::{ProcessingUnit, Verifier, PIPELINE};

/// Verdict of the block processor. This is the single channel through which
/// the pipeline communicates; callers match on it exhaustively and never see
/// raw verifier errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockProcessorResult {
    /// The block passed every check and may drive the commit step.
    Accepted,
    /// The block is valid but stale (e.g. a duplicate at an already-committed
    /// height); safe to relay to peers, useless locally.
    DiscardedButCanBeBroadcasted,
    /// The block failed verification. The sync layer's download pointer is
    /// reset so a stale pointer cannot wedge block download.
    Rejected,
    /// A competing fork produced by the legitimate proposer was detected; the
    /// chain must unwind before retrying.
    Rollback,
    /// An internal failure occurred mid-verification. Fatal to this attempt;
    /// never silently retried.
    Corrupted,
}

/// Errors that indicate a malformed block producer rather than routine
/// disagreement. These propagate past the processor instead of being mapped
/// to a verdict.
#[derive(Debug, thiserror::Error)]
pub enum MalformedBlockError {
    /// Transactions in the block do not share a single version.
    #[error("block {id:?} mixes transaction versions")]
    IncompatibleTransactions {
        /// Id of the malformed block.
        id: validator::BlockId,
    },
    /// The round exceeds the protocol sanity bound.
    #[error("round {round} exceeds the sanity bound")]
    RoundOutOfBounds {
        /// The offending round.
        round: validator::RoundNumber,
    },
    /// The minimal-timestamp computation overflowed.
    #[error("timestamp computation overflowed at round {round}")]
    TimestampOverflow {
        /// The offending round.
        round: validator::RoundNumber,
    },
}

/// Error produced by a single verifier.
#[derive(Debug, thiserror::Error)]
pub(crate) enum VerifierError {
    /// The block producer is malformed; propagates past the processor.
    #[error(transparent)]
    Malformed(#[from] MalformedBlockError),
    /// Infrastructure failure; mapped to [`BlockProcessorResult::Corrupted`].
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Orchestrates the verifier pipeline and produces a
/// [`BlockProcessorResult`], triggering the chain-level reactions each
/// verdict implies.
#[derive(Debug)]
pub struct BlockProcessor {
    engine: Arc<EngineManager>,
    milestones: validator::MilestoneSchedule,
    validator_set: Arc<ValidatorSetService>,
    selector: ProposerSelector,
}

impl BlockProcessor {
    /// Creates a new processor.
    pub fn new(
        engine: Arc<EngineManager>,
        milestones: validator::MilestoneSchedule,
        validator_set: Arc<ValidatorSetService>,
    ) -> Self {
        Self {
            engine,
            milestones,
            validator_set,
            selector: ProposerSelector,
        }
    }

    /// Runs the pipeline over a candidate block proposed for `round` by
    /// `expected_proposer`.
    ///
    /// Protocol violations come back as verdicts; only
    /// [`MalformedBlockError`] propagates as an error.
    pub async fn process(
        &self,
        block: &validator::Block,
        round: validator::RoundNumber,
        expected_proposer: &validator::PublicKey,
    ) -> Result<BlockProcessorResult, MalformedBlockError> {
        let tip = match self.engine.last_block().await {
            Ok(tip) => tip,
            Err(err) => {
                tracing::error!("block processor: failed reading chain tip: {err:#}");
                return Ok(self.observe(BlockProcessorResult::Corrupted));
            }
        };

        if let Some(tip) = &tip {
            if block.number() <= tip.number() {
                return self.process_stale(block, tip).await;
            }
        }

        let milestone = self.milestones.milestone(block.number());
        let unit = ProcessingUnit {
            block,
            round,
            expected_proposer,
            tip: tip.as_ref(),
            milestone,
        };

        for verifier in PIPELINE {
            match self.execute(verifier, &unit).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        number = block.number().0,
                        id = ?block.id(),
                        ?verifier,
                        "block disregarded: verification failed"
                    );
                    return self.reject(block).await.map(|v| self.observe(v));
                }
                Err(VerifierError::Malformed(err)) => {
                    tracing::warn!(
                        number = block.number().0,
                        id = ?block.id(),
                        "malformed block: {err:#}"
                    );
                    return Err(err);
                }
                Err(VerifierError::Internal(err)) => {
                    tracing::error!(
                        number = block.number().0,
                        ?verifier,
                        "block processor: internal error: {err:#}"
                    );
                    return Ok(self.observe(BlockProcessorResult::Corrupted));
                }
            }
        }

        Ok(self.observe(BlockProcessorResult::Accepted))
    }

    /// Applies a committed block and publishes the chain-level reaction.
    pub async fn commit(&self, committed: &validator::CommittedBlock) -> anyhow::Result<()> {
        self.engine.apply_block(committed).await?;
        self.engine
            .dispatch(ChainEvent::BlockApplied {
                number: committed.number(),
                id: committed.block.id(),
            })
            .await
    }

    /// Handles a block at an already-committed height.
    async fn process_stale(
        &self,
        block: &validator::Block,
        tip: &validator::Block,
    ) -> Result<BlockProcessorResult, MalformedBlockError> {
        if block.number() < tip.number()
            || (block.number() == tip.number() && block.id() == tip.id())
        {
            tracing::debug!(
                number = block.number().0,
                id = ?block.id(),
                "discarding stale block"
            );
            return Ok(self.observe(BlockProcessorResult::DiscardedButCanBeBroadcasted));
        }

        // A different block at the tip height. If it comes from the proposer
        // that legitimately owned that slot, someone double-forged and the
        // chain has to unwind; anything else is a routine rejection.
        let committee = match self.validator_set.active_validators(block.number()).await {
            Ok(committee) => committee,
            Err(err) => {
                tracing::error!("block processor: failed resolving committee: {err:#}");
                return Ok(self.observe(BlockProcessorResult::Corrupted));
            }
        };
        let legitimate =
            self.selector
                .proposer(block.number(), block.header.round, &committee);
        if &block.header.generator == legitimate {
            tracing::warn!(
                number = block.number().0,
                id = ?block.id(),
                "competing block from the legitimate proposer, unwinding"
            );
            let res: anyhow::Result<()> = async {
                self.engine.revert_block().await?;
                self.engine
                    .dispatch(ChainEvent::ForkDetected {
                        number: block.number(),
                    })
                    .await
            }
            .await;
            if let Err(err) = res {
                tracing::error!("block processor: failed unwinding: {err:#}");
                return Ok(self.observe(BlockProcessorResult::Corrupted));
            }
            return Ok(self.observe(BlockProcessorResult::Rollback));
        }
        self.reject(block).await.map(|v| self.observe(v))
    }

    /// Reactions to a rejected block.
    async fn reject(
        &self,
        block: &validator::Block,
    ) -> Result<BlockProcessorResult, MalformedBlockError> {
        let res: anyhow::Result<()> = async {
            self.engine.reset_last_downloaded_block().await?;
            self.engine
                .dispatch(ChainEvent::BlockRejected { id: block.id() })
                .await
        }
        .await;
        if let Err(err) = res {
            tracing::error!("block processor: failed rejection cleanup: {err:#}");
            return Ok(BlockProcessorResult::Corrupted);
        }
        Ok(BlockProcessorResult::Rejected)
    }

    pub(crate) fn engine(&self) -> &EngineManager {
        &self.engine
    }

    fn observe(&self, verdict: BlockProcessorResult) -> BlockProcessorResult {
        let label = match verdict {
            BlockProcessorResult::Accepted => VerdictLabel::Accepted,
            BlockProcessorResult::DiscardedButCanBeBroadcasted => VerdictLabel::Discarded,
            BlockProcessorResult::Rejected => VerdictLabel::Rejected,
            BlockProcessorResult::Rollback => VerdictLabel::Rollback,
            BlockProcessorResult::Corrupted => VerdictLabel::Corrupted,
        };
        METRICS.processor_verdicts[&VerdictLabels { verdict: label }].inc();
        verdict
    }
}
