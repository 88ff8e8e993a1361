//! Proposal authoring, for rounds where a local validator owns the slot.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use corten_consensus_engine::CommitKey;
use corten_consensus_roles::validator;

use super::{ProcessError, StateMachine};
use crate::processor::minimal_timestamp;

impl StateMachine {
    /// Authors a proposal if one of the local keys is the round's proposer.
    /// Re-proposes the valid value (with a lock proof) when one is set,
    /// otherwise collates a fresh block. The proposal is persisted, then
    /// broadcast, then fed through the regular admission path.
    pub(crate) async fn propose(
        &mut self,
        proposer: &validator::PublicKey,
    ) -> Result<(), ProcessError> {
        let config = self.config.clone();
        let Some(key) = config
            .secret_keys
            .iter()
            .find(|key| &key.public() == proposer)
        else {
            return Ok(());
        };
        if self
            .round_states
            .get(&self.round)
            .is_some_and(|slot| slot.proposal.is_some())
        {
            return Ok(());
        }
        // A node that is still catching up must not author blocks.
        if !self.config.engine.is_synced().await.context("is_synced()")? {
            tracing::debug!("not synced, skipping the proposal slot");
            return Ok(());
        }

        let proposal = match self.valid.clone() {
            Some(valid) => {
                // A prevote quorum exists for this block in `valid.round`:
                // re-propose it with the aggregated proof.
                let proof = self
                    .round_states
                    .get(&valid.round)
                    .context("valid round has no recorded state")?
                    .aggregate(
                        validator::VoteKind::Prevote,
                        Some(valid.block.id()),
                        &self.committee,
                    )
                    .context("aggregate(prevotes)")?;
                tracing::info!(
                    "proposing valid block {}/{} from round {} with id: {:?}",
                    self.number,
                    self.round,
                    valid.round,
                    valid.block.id(),
                );
                validator::Proposal {
                    block: valid.block,
                    round: self.round,
                    valid_round: Some(valid.round),
                    lock_proof: Some(proof),
                }
            }
            None => {
                let block = self.prepare_block(proposer).await?;
                tracing::info!(
                    "proposing new block {}/{} with id: {:?}",
                    self.number,
                    self.round,
                    block.id(),
                );
                validator::Proposal {
                    block,
                    round: self.round,
                    valid_round: None,
                    lock_proof: None,
                }
            }
        };

        let signed = key.sign_msg(proposal);
        self.config
            .engine
            .save_proposals(&[signed.clone()])
            .await
            .context("save_proposals()")?;
        self.broadcast(signed.cast().expect("proposal is a consensus message"));
        Ok(())
    }

    /// Assembles a fresh block from collated transactions.
    async fn prepare_block(
        &mut self,
        proposer: &validator::PublicKey,
    ) -> Result<validator::Block, ProcessError> {
        let transactions = self
            .config
            .engine
            .candidate_transactions(CommitKey {
                number: self.number,
                round: self.round,
            })
            .await
            .context("candidate_transactions()")?;

        let tip = self.config.engine.last_block().await.context("last_block()")?;
        let milestone = self.config.milestone(self.number);
        let (previous, min_timestamp) = match &tip {
            Some(tip) => (
                tip.id(),
                minimal_timestamp(tip.header.timestamp, self.round, milestone)?,
            ),
            None => (validator::BlockId::zero(), 0),
        };
        let header = validator::BlockHeader {
            number: self.number,
            round: self.round,
            previous,
            timestamp: unix_now_ms().max(min_timestamp),
            generator: proposer.clone(),
            payload_hash: validator::Block::payload_hash(&transactions),
            tx_count: transactions.len() as u32,
        };
        Ok(validator::Block {
            header,
            transactions,
        })
    }
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
