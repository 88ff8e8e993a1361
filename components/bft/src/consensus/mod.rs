//! The consensus state machine. Drives the `Propose -> Prevote -> Precommit
//! -> Commit` lifecycle of every height, one serialized event at a time.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use anyhow::Context as _;
use corten_consensus_roles::validator;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};

use crate::{
    metrics::{ConsensusMsgLabel, METRICS},
    processor::{BlockProcessor, BlockProcessorResult, MalformedBlockError},
    selector::ProposerSelector,
    validator_set::ValidatorSetService,
    Config, InputMessage, OutputMessage,
};

mod proposal;
mod proposer;
mod round_state;
mod scheduler;
#[cfg(test)]
pub(crate) mod testonly;
#[cfg(test)]
mod tests;
mod timeout;
mod vote;

pub(crate) use round_state::{AddVoteError, RoundState};
pub(crate) use scheduler::{Scheduler, Timeout};

/// A value (block) bound to the round it was locked or validated in.
#[derive(Clone, Debug)]
pub(crate) struct BoundValue {
    /// Round the prevote quorum was observed in.
    pub(crate) round: validator::RoundNumber,
    /// The block the quorum was for.
    pub(crate) block: validator::Block,
}

/// Error produced while reevaluating a round. Protocol violations never reach
/// this type; they are filtered at message admission.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ProcessError {
    /// A malformed block producer was detected; propagates to the top.
    #[error("malformed block: {0:#}")]
    Malformed(#[from] MalformedBlockError),
    /// Internal error. Not supposed to be easily recoverable.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The state machine of the consensus component. All consensus state is owned
/// exclusively by this struct; external readers observe it through the watch
/// channel only.
#[derive(Debug)]
pub(crate) struct StateMachine {
    /// Consensus configuration.
    pub(crate) config: Arc<Config>,
    outbound: mpsc::UnboundedSender<OutputMessage>,
    inbound: mpsc::UnboundedReceiver<InputMessage>,
    state_sender: watch::Sender<validator::ConsensusState>,
    /// Committee resolution.
    pub(crate) validator_set: Arc<ValidatorSetService>,
    /// The verification pipeline.
    pub(crate) processor: BlockProcessor,
    /// Deterministic proposer selection.
    pub(crate) selector: ProposerSelector,

    /// Height being decided.
    pub(crate) number: validator::BlockNumber,
    /// Current round within the height.
    pub(crate) round: validator::RoundNumber,
    /// Current step within the round.
    pub(crate) step: validator::Step,
    /// The value this node is locked on, if any.
    pub(crate) locked: Option<BoundValue>,
    /// The newest value known to have gathered a prevote quorum, if any.
    pub(crate) valid: Option<BoundValue>,
    /// Active committee for the current height.
    pub(crate) committee: validator::Committee,
    /// Message collections per round of the current height.
    pub(crate) round_states: BTreeMap<validator::RoundNumber, RoundState>,
    /// Whether a prevote quorum was already acted upon this round.
    pub(crate) did_majority_prevote: bool,
    /// Whether a precommit quorum was already acted upon this height.
    pub(crate) did_majority_precommit: bool,
    /// Armed round timers.
    pub(crate) scheduler: Scheduler,

    /// Own messages awaiting processing through the regular admission path.
    self_queue: VecDeque<InputMessage>,
    /// When the current round started, for latency metrics.
    round_start: Instant,
}

impl StateMachine {
    /// Creates a state machine, recovering persisted progress from storage if
    /// the recorded height still chains onto the engine tip.
    pub(crate) async fn start(
        config: Config,
        outbound: mpsc::UnboundedSender<OutputMessage>,
        inbound: mpsc::UnboundedReceiver<InputMessage>,
        state_sender: watch::Sender<validator::ConsensusState>,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let engine = config.engine.clone();
        let validator_set = Arc::new(ValidatorSetService::new(
            engine.clone(),
            config.milestones.clone(),
        ));
        let processor = BlockProcessor::new(
            engine.clone(),
            config.milestones.clone(),
            validator_set.clone(),
        );

        let tip = engine.last_block().await.context("last_block()")?;
        let number = tip
            .as_ref()
            .map_or(validator::BlockNumber(0), |block| block.number().next());
        let committee = validator_set
            .active_validators(number)
            .await
            .context("active_validators()")?;
        validator_set
            .verify_local_keys(number, &config.secret_keys)
            .await
            .context("verify_local_keys()")?;

        let mut this = Self {
            config,
            outbound,
            inbound,
            state_sender,
            validator_set,
            processor,
            selector: ProposerSelector,
            number,
            round: validator::RoundNumber(0),
            step: validator::Step::Propose,
            locked: None,
            valid: None,
            committee,
            round_states: BTreeMap::new(),
            did_majority_prevote: false,
            did_majority_precommit: false,
            scheduler: Scheduler::default(),
            self_queue: VecDeque::new(),
            round_start: Instant::now(),
        };
        this.restore().await.context("restore()")?;
        Ok(this)
    }

    /// Loads persisted progress. State recorded for a height other than the
    /// one that chains onto the tip is discarded; the chain has moved on.
    async fn restore(&mut self) -> anyhow::Result<()> {
        let Some(state) = self.config.engine.state().await.context("state()")? else {
            return Ok(());
        };
        if state.number != self.number {
            tracing::warn!(
                "skipping state restore: stored height is {}, expected {}",
                state.number,
                self.number,
            );
            self.config.engine.clear_storage().await.context("clear()")?;
            return Ok(());
        }

        self.round = state.round;
        for signed in self.config.engine.proposals().await.context("proposals()")? {
            let round = signed.msg.round;
            let slot = self.round_state_mut(round);
            if slot.proposal.is_none() {
                slot.proposal = Some(signed);
            }
        }
        for signed in self.config.engine.prevotes().await.context("prevotes()")? {
            let _ = self.round_state_mut(signed.msg.round).add_vote(signed);
        }
        for signed in self
            .config
            .engine
            .precommits()
            .await
            .context("precommits()")?
        {
            let _ = self.round_state_mut(signed.msg.round).add_vote(signed);
        }

        self.locked = state.locked_round.and_then(|round| self.bound_value(round));
        self.valid = state.valid_round.and_then(|round| self.bound_value(round));
        tracing::info!("restored consensus state {}", self.consensus_state());
        Ok(())
    }

    /// Reconstructs a locked/valid value from the persisted proposal of the
    /// given round.
    fn bound_value(&self, round: validator::RoundNumber) -> Option<BoundValue> {
        let signed = self.round_states.get(&round)?.proposal.as_ref()?;
        Some(BoundValue {
            round,
            block: signed.msg.block.clone(),
        })
    }

    /// Runs the event loop: one proposal, vote or timeout at a time. The
    /// persisted rounds are replayed first, so a restart resumes exactly
    /// where the persisted record left off.
    pub(crate) async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!(
            "starting consensus state machine at height {} with {} local validator(s)",
            self.number,
            self.config.secret_keys.len(),
        );
        self.start_round(self.round).await.map_err(into_fatal)?;

        // Replay previously persisted rounds, in case a proposal and a
        // quorum were already received before the restart.
        let rounds: Vec<_> = self.round_states.keys().copied().collect();
        for round in rounds {
            self.process_round(round).await.map_err(into_fatal)?;
        }

        loop {
            if let Some(input) = self.self_queue.pop_front() {
                self.dispatch(input).await?;
                continue;
            }

            match self.scheduler.next() {
                Some((deadline, timeout)) => {
                    match tokio::time::timeout_at(deadline, self.inbound.recv()).await {
                        Ok(Some(input)) => self.dispatch(input).await?,
                        Ok(None) => return Ok(()),
                        Err(_) => {
                            self.scheduler.disarm(timeout);
                            self.on_timeout(timeout).await.map_err(into_fatal)?;
                        }
                    }
                }
                None => match self.inbound.recv().await {
                    Some(input) => self.dispatch(input).await?,
                    None => return Ok(()),
                },
            }
        }
    }

    /// Verifies and routes a single inbound message.
    async fn dispatch(&mut self, input: InputMessage) -> anyhow::Result<()> {
        let started = Instant::now();
        if input.message.verify().is_err() {
            tracing::warn!(key = ?input.message.key, "dropping message with invalid signature");
            return Ok(());
        }

        let label = match &input.message.msg {
            validator::ConsensusMsg::Proposal(_) => ConsensusMsgLabel::Proposal,
            validator::ConsensusMsg::Vote(vote) => match vote.kind {
                validator::VoteKind::Prevote => ConsensusMsgLabel::Prevote,
                validator::VoteKind::Precommit => ConsensusMsgLabel::Precommit,
            },
        };

        let res = match label {
            ConsensusMsgLabel::Proposal => {
                let signed = input.message.cast().expect("variant was just matched");
                match self.on_proposal(signed).await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        match &err {
                            proposal::Error::Internal(inner) => {
                                tracing::error!("on_proposal: internal error: {inner:#}");
                                return Err(err.into());
                            }
                            proposal::Error::Malformed(inner) => {
                                tracing::error!("on_proposal: malformed producer: {inner:#}");
                                return Err(err.into());
                            }
                            proposal::Error::WrongHeight { .. }
                            | proposal::Error::Duplicate { .. } => {
                                tracing::debug!("on_proposal: {err:#}");
                            }
                            _ => tracing::warn!("on_proposal: {err:#}"),
                        }
                        Err(())
                    }
                }
            }
            ConsensusMsgLabel::Prevote | ConsensusMsgLabel::Precommit => {
                let signed = input.message.cast().expect("variant was just matched");
                match self.on_vote(signed).await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        match &err {
                            vote::Error::Internal(inner) => {
                                tracing::error!("on_vote: internal error: {inner:#}");
                                return Err(err.into());
                            }
                            vote::Error::Malformed(inner) => {
                                tracing::error!("on_vote: malformed producer: {inner:#}");
                                return Err(err.into());
                            }
                            vote::Error::WrongHeight { .. } | vote::Error::Replay => {
                                tracing::debug!("on_vote: {err:#}");
                            }
                            _ => tracing::warn!("on_vote: {err:#}"),
                        }
                        Err(())
                    }
                }
            }
        };

        METRICS.message_processing_latency[&label.with_result(&res)].observe(started.elapsed());
        Ok(())
    }

    /// The message collections for a round, created on first use.
    pub(crate) fn round_state_mut(&mut self, round: validator::RoundNumber) -> &mut RoundState {
        let number = self.number;
        self.round_states
            .entry(round)
            .or_insert_with(|| RoundState::new(number, round))
    }

    /// Snapshot of the persistable state.
    pub(crate) fn consensus_state(&self) -> validator::ConsensusState {
        validator::ConsensusState {
            number: self.number,
            round: self.round,
            step: self.step,
            locked_round: self.locked.as_ref().map(|bound| bound.round),
            valid_round: self.valid.as_ref().map(|bound| bound.round),
        }
    }

    /// Persists the state record and publishes it to external readers. Every
    /// state mutation goes through here before being acted upon.
    pub(crate) async fn save_state(&mut self) -> anyhow::Result<()> {
        let state = self.consensus_state();
        self.config
            .engine
            .save_state(&state)
            .await
            .context("save_state()")?;
        self.state_sender.send_replace(state);
        Ok(())
    }

    /// Begins a round: resets the per-round flags, arms the propose timer,
    /// and authors a proposal if a local key owns the slot.
    pub(crate) async fn start_round(
        &mut self,
        round: validator::RoundNumber,
    ) -> Result<(), ProcessError> {
        METRICS.round_latency.observe(self.round_start.elapsed());
        self.round = round;
        self.step = validator::Step::Propose;
        self.did_majority_prevote = false;
        self.did_majority_precommit = false;
        self.round_start = Instant::now();
        METRICS.height.set(self.number.0);
        METRICS.round.set(round.0);

        self.scheduler.clear();
        let milestone = self.config.milestone(self.number).clone();
        self.scheduler.schedule(
            Timeout::Propose,
            tokio::time::Duration::from_millis(
                milestone.block_prepare_time + milestone.stage_timeout_for(round.0),
            ),
        );

        self.save_state().await?;

        let proposer = self
            .selector
            .proposer(self.number, round, &self.committee)
            .clone();
        tracing::info!(
            ">> starting round {}/{} with proposer {:?}",
            self.number,
            round,
            proposer,
        );
        self.propose(&proposer).await?;
        Ok(())
    }

    /// Reevaluates every transition predicate for a round. Invoked after any
    /// mutation of that round's collections.
    pub(crate) async fn process_round(
        &mut self,
        round: validator::RoundNumber,
    ) -> Result<(), ProcessError> {
        self.ensure_processor_result(round).await?;
        self.try_advance_from_proposal(round).await?;
        self.try_majority_prevote(round).await?;
        self.try_majority_prevote_any(round).await?;
        self.try_majority_prevote_nil(round).await?;
        self.try_majority_precommit_any(round).await?;
        self.try_majority_precommit(round).await?;
        self.try_minority_higher_round(round).await?;
        Ok(())
    }

    /// Runs the verification pipeline over the round's proposal, once.
    async fn ensure_processor_result(
        &mut self,
        round: validator::RoundNumber,
    ) -> Result<(), ProcessError> {
        let Some(slot) = self.round_states.get(&round) else {
            return Ok(());
        };
        if slot.processor_result.is_some() {
            return Ok(());
        }
        let Some(signed) = &slot.proposal else {
            return Ok(());
        };
        let block = signed.msg.block.clone();

        let expected = self
            .selector
            .proposer(self.number, round, &self.committee)
            .clone();
        let verdict = self.processor.process(&block, round, &expected).await?;
        let accepted = matches!(verdict, BlockProcessorResult::Accepted);
        tracing::debug!(
            number = self.number.0,
            round = round.0,
            id = ?block.id(),
            ?verdict,
            "processed round proposal"
        );
        self.round_state_mut(round).processor_result = Some(accepted);
        Ok(())
    }

    /// On the round's proposal: move to the prevote step and cast prevotes.
    /// Handles both fresh proposals and lock-carrying re-proposals.
    async fn try_advance_from_proposal(
        &mut self,
        round: validator::RoundNumber,
    ) -> Result<(), ProcessError> {
        if self.step != validator::Step::Propose || round != self.round {
            return Ok(());
        }
        let Some(slot) = self.round_states.get(&round) else {
            return Ok(());
        };
        let Some(accepted) = slot.processor_result else {
            return Ok(());
        };
        let Some(signed) = &slot.proposal else {
            return Ok(());
        };
        let block_id = signed.msg.block.id();
        let valid_round = signed.msg.valid_round;

        self.step = validator::Step::Prevote;
        self.save_state().await?;

        let vote_target = match valid_round {
            None => {
                tracing::info!(
                    "received proposal {}/{} block: {:?}",
                    self.number,
                    round,
                    block_id,
                );
                accepted.then_some(block_id)
            }
            Some(valid_round) => {
                tracing::info!(
                    "received proposal {}/{} with locked block: {:?} (valid round {})",
                    self.number,
                    round,
                    block_id,
                    valid_round,
                );
                let lock_allows = self
                    .locked
                    .as_ref()
                    .map_or(true, |locked| locked.round <= valid_round);
                (lock_allows && accepted).then_some(block_id)
            }
        };
        self.cast_votes(validator::VoteKind::Prevote, vote_target)
            .await?;
        Ok(())
    }

    /// On a prevote quorum for the round's proposal: lock the value and cast
    /// precommits (or just refresh the valid value when already past the
    /// prevote step).
    async fn try_majority_prevote(
        &mut self,
        round: validator::RoundNumber,
    ) -> Result<(), ProcessError> {
        if self.did_majority_prevote
            || self.step == validator::Step::Propose
            || round != self.round
        {
            return Ok(());
        }
        let Some(slot) = self.round_states.get(&round) else {
            return Ok(());
        };
        if slot.processor_result != Some(true) {
            return Ok(());
        }
        let Some(signed) = &slot.proposal else {
            return Ok(());
        };
        let block = signed.msg.block.clone();
        let block_id = block.id();
        if slot.vote_weight(validator::VoteKind::Prevote, &Some(block_id), &self.committee)
            < self.committee.quorum_threshold()
        {
            return Ok(());
        }

        tracing::info!(
            "received +2/3 prevotes for {}/{} block: {:?}",
            self.number,
            round,
            block_id,
        );
        self.did_majority_prevote = true;

        if self.step == validator::Step::Prevote {
            self.locked = Some(BoundValue {
                round,
                block: block.clone(),
            });
            self.valid = Some(BoundValue { round, block });
            self.step = validator::Step::Precommit;
            self.save_state().await?;
            self.cast_votes(validator::VoteKind::Precommit, Some(block_id))
                .await?;
        } else {
            self.valid = Some(BoundValue { round, block });
            self.save_state().await?;
        }
        Ok(())
    }

    /// On prevotes reaching quorum weight regardless of target: arm the
    /// prevote timer.
    async fn try_majority_prevote_any(
        &mut self,
        round: validator::RoundNumber,
    ) -> Result<(), ProcessError> {
        if self.step != validator::Step::Prevote || round != self.round {
            return Ok(());
        }
        let Some(slot) = self.round_states.get(&round) else {
            return Ok(());
        };
        if slot.total_weight(validator::VoteKind::Prevote, &self.committee)
            < self.committee.quorum_threshold()
        {
            return Ok(());
        }
        let delay = self.stage_delay();
        if self.scheduler.schedule(Timeout::Prevote, delay) {
            tracing::debug!("prevote quorum without a common target, armed prevote timer");
        }
        Ok(())
    }

    /// On a prevote quorum for nil: precommit nil.
    async fn try_majority_prevote_nil(
        &mut self,
        round: validator::RoundNumber,
    ) -> Result<(), ProcessError> {
        if self.step != validator::Step::Prevote || round != self.round {
            return Ok(());
        }
        let Some(slot) = self.round_states.get(&round) else {
            return Ok(());
        };
        if slot.vote_weight(validator::VoteKind::Prevote, &None, &self.committee)
            < self.committee.quorum_threshold()
        {
            return Ok(());
        }
        tracing::info!("received +2/3 prevotes for {}/{} block: nil", self.number, round);
        self.step = validator::Step::Precommit;
        self.save_state().await?;
        self.cast_votes(validator::VoteKind::Precommit, None).await?;
        Ok(())
    }

    /// On precommits reaching quorum weight regardless of target: arm the
    /// precommit timer.
    async fn try_majority_precommit_any(
        &mut self,
        round: validator::RoundNumber,
    ) -> Result<(), ProcessError> {
        if round != self.round {
            return Ok(());
        }
        let Some(slot) = self.round_states.get(&round) else {
            return Ok(());
        };
        if slot.total_weight(validator::VoteKind::Precommit, &self.committee)
            < self.committee.quorum_threshold()
        {
            return Ok(());
        }
        let delay = self.stage_delay();
        if self.scheduler.schedule(Timeout::Precommit, delay) {
            tracing::debug!("precommit quorum without a common target, armed precommit timer");
        }
        Ok(())
    }

    /// On a precommit quorum: commit the block (any round of the current
    /// height), or bump the round on a nil quorum.
    async fn try_majority_precommit(
        &mut self,
        round: validator::RoundNumber,
    ) -> Result<(), ProcessError> {
        if self.did_majority_precommit {
            return Ok(());
        }
        let Some(slot) = self.round_states.get(&round) else {
            return Ok(());
        };
        let Some(target) = slot.quorum_target(validator::VoteKind::Precommit, &self.committee)
        else {
            return Ok(());
        };

        let Some(block_id) = target else {
            // Nil quorum: this round cannot commit anymore.
            if round == self.round {
                tracing::info!(
                    "received +2/3 precommits for {}/{} block: nil",
                    self.number,
                    round,
                );
                self.start_round(round.next()).await?;
            }
            return Ok(());
        };

        let Some(signed) = &slot.proposal else {
            // Quorum for a block we don't hold; wait for the proposal.
            return Ok(());
        };
        if signed.msg.block.id() != block_id {
            return Ok(());
        }
        let block = signed.msg.block.clone();
        let accepted = slot.processor_result == Some(true);
        self.did_majority_precommit = true;

        if !accepted {
            tracing::info!(
                "block {:?} on height {} received +2/3 precommits but is invalid",
                block_id,
                self.number,
            );
            return Ok(());
        }

        tracing::info!(
            "received +2/3 precommits for {}/{} block: {:?}",
            self.number,
            round,
            block_id,
        );
        let proof = self
            .round_states
            .get(&round)
            .expect("slot just read")
            .aggregate(validator::VoteKind::Precommit, Some(block_id), &self.committee)
            .context("aggregate(precommits)")?;
        let committed = validator::CommittedBlock { block, proof };

        METRICS.commit_latency.observe(self.round_start.elapsed());
        self.commit(committed).await?;
        Ok(())
    }

    /// Applies the committed block and moves to the next height.
    async fn commit(&mut self, committed: validator::CommittedBlock) -> Result<(), ProcessError> {
        self.step = validator::Step::Commit;
        self.save_state().await?;

        self.processor
            .commit(&committed)
            .await
            .context("processor.commit()")?;
        // Only a successful commit clears storage; round timeouts never do.
        self.config
            .engine
            .clear_storage()
            .await
            .context("clear_storage()")?;

        self.number = self.number.next();
        self.locked = None;
        self.valid = None;
        self.did_majority_precommit = false;
        self.round_states.clear();
        self.committee = self
            .validator_set
            .active_validators(self.number)
            .await
            .context("active_validators()")?;

        self.start_round(validator::RoundNumber(0)).await
    }

    /// On votes above 1/3 weight for a higher round of the current height:
    /// skip ahead to that round.
    async fn try_minority_higher_round(
        &mut self,
        round: validator::RoundNumber,
    ) -> Result<(), ProcessError> {
        if round <= self.round {
            return Ok(());
        }
        let Some(slot) = self.round_states.get(&round) else {
            return Ok(());
        };
        let threshold = self.committee.minority_threshold();
        if slot.total_weight(validator::VoteKind::Prevote, &self.committee) < threshold
            && slot.total_weight(validator::VoteKind::Precommit, &self.committee) < threshold
        {
            return Ok(());
        }
        tracing::info!(
            "+1/3 of validators are ahead at {}/{}, catching up",
            self.number,
            round,
        );
        self.start_round(round).await
    }

    /// Casts a vote of `kind` from every local validator that has not voted
    /// this round yet. Votes are persisted before they are broadcast.
    pub(crate) async fn cast_votes(
        &mut self,
        kind: validator::VoteKind,
        block_id: Option<validator::BlockId>,
    ) -> Result<(), ProcessError> {
        let config = self.config.clone();
        let vote = validator::Vote {
            kind,
            number: self.number,
            round: self.round,
            block_id,
        };

        let mut signed_votes = Vec::new();
        for key in &config.secret_keys {
            let public = key.public();
            if !self.committee.contains(&public) {
                continue;
            }
            if self
                .round_states
                .get(&self.round)
                .is_some_and(|slot| slot.has_vote(kind, &public))
            {
                continue;
            }
            signed_votes.push(key.sign_msg(vote.clone()));
        }
        if signed_votes.is_empty() {
            return Ok(());
        }

        match kind {
            validator::VoteKind::Prevote => config
                .engine
                .save_prevotes(&signed_votes)
                .await
                .context("save_prevotes()")?,
            validator::VoteKind::Precommit => config
                .engine
                .save_precommits(&signed_votes)
                .await
                .context("save_precommits()")?,
        }
        for signed in signed_votes {
            tracing::debug!("casting {}", signed.msg);
            let message = signed.cast().expect("vote is a consensus message");
            self.broadcast(message);
        }
        Ok(())
    }

    /// Sends a message to the network and queues it for local processing
    /// through the regular admission path.
    pub(crate) fn broadcast(&mut self, message: validator::Signed<validator::ConsensusMsg>) {
        // The network layer going away only matters at shutdown.
        let _ = self.outbound.send(OutputMessage {
            message: message.clone(),
        });
        self.self_queue.push_back(InputMessage { message });
    }

    /// Pops the next self-addressed message, for tests that drive the
    /// machine without the run loop.
    #[cfg(test)]
    pub(crate) fn take_self_queued(&mut self) -> Option<InputMessage> {
        self.self_queue.pop_front()
    }

    /// Stage timeout for the current round.
    pub(crate) fn stage_delay(&self) -> tokio::time::Duration {
        let milestone = self.config.milestone(self.number);
        tokio::time::Duration::from_millis(milestone.stage_timeout_for(self.round.0))
    }
}

/// Collapses a round-processing error into the fatal error type of the run
/// loop.
fn into_fatal(err: ProcessError) -> anyhow::Error {
    match err {
        ProcessError::Malformed(err) => anyhow::Error::new(err),
        ProcessError::Internal(err) => err,
    }
}
