//! Unit-test harness for the state machine. Instantiated once per test case.

use corten_consensus_engine::testonly::TestEngine;
use corten_consensus_roles::validator::{self, testonly::Setup};
use rand::{rngs::StdRng, SeedableRng as _};
use tokio::sync::{mpsc, watch};

use super::StateMachine;
use crate::{
    processor::minimal_timestamp, testonly::fast_milestones, Config, InputMessage, OutputMessage,
};

/// Installs a test subscriber honoring `RUST_LOG`, once per process.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A state machine wired to an in-memory engine, with every validator's
/// secret key available so tests can impersonate the whole committee.
pub(crate) struct UnitTestHarness {
    pub(crate) machine: StateMachine,
    pub(crate) setup: Setup,
    pub(crate) engine: TestEngine,
    pub(crate) outbound: mpsc::UnboundedReceiver<OutputMessage>,
    pub(crate) state: watch::Receiver<validator::ConsensusState>,
    _inbound: mpsc::UnboundedSender<InputMessage>,
}

impl UnitTestHarness {
    /// A harness over `num_validators` equal-weight validators, with the
    /// genesis block already committed. The machine holds the key of
    /// validator 0.
    pub(crate) async fn new(seed: u64, num_validators: usize) -> Self {
        Self::new_at_height(seed, num_validators, 1).await
    }

    /// Same, but with the chain pre-seeded so the machine decides `height`.
    pub(crate) async fn new_at_height(seed: u64, num_validators: usize, height: u64) -> Self {
        assert!(height >= 1);
        init_tracing();
        let mut rng = StdRng::seed_from_u64(seed);
        let setup = Setup::new(&mut rng, num_validators);
        let genesis = setup.make_block(
            None,
            validator::RoundNumber(0),
            &setup.key(0).public(),
            vec![],
        );
        let engine = TestEngine::new(genesis.clone(), setup.committee.iter().cloned().collect());

        // Seed history up to `height - 1`. The in-memory chain does not
        // verify proofs, so empty certificates are fine here.
        let manager = engine.manager();
        let mut tip = genesis;
        for _ in 1..height {
            let block = setup.make_block(
                Some(&tip),
                validator::RoundNumber(0),
                &setup.key(0).public(),
                vec![],
            );
            let proof = validator::VoteQC::new(
                validator::Vote {
                    kind: validator::VoteKind::Precommit,
                    number: block.number(),
                    round: validator::RoundNumber(0),
                    block_id: Some(block.id()),
                },
                &setup.committee,
            );
            manager
                .apply_block(&validator::CommittedBlock {
                    block: block.clone(),
                    proof,
                })
                .await
                .unwrap();
            tip = block;
        }

        Self::with_engine(setup, engine).await
    }

    /// A harness over an engine prepared by the caller.
    pub(crate) async fn with_engine(setup: Setup, engine: TestEngine) -> Self {
        let config = Config {
            secret_keys: vec![setup.key(0).clone()],
            milestones: fast_milestones(setup.committee.len()),
            engine: engine.manager(),
        };
        let (outbound_send, outbound_recv) = mpsc::unbounded_channel();
        let (inbound_send, inbound_recv) = mpsc::unbounded_channel();
        let (state_send, state_recv) =
            watch::channel(validator::ConsensusState::new(validator::BlockNumber(0)));
        let machine = StateMachine::start(config, outbound_send, inbound_recv, state_send)
            .await
            .unwrap();
        Self {
            machine,
            setup,
            engine,
            outbound: outbound_recv,
            state: state_recv,
            _inbound: inbound_send,
        }
    }

    /// Starts round 0 and processes whatever the machine authored for it.
    pub(crate) async fn boot(&mut self) {
        self.machine
            .start_round(validator::RoundNumber(0))
            .await
            .unwrap();
        self.drain_self_queue().await;
    }

    /// Secret key of the proposer for the machine's current round.
    pub(crate) fn proposer_key(&self) -> &validator::SecretKey {
        let proposer = self.machine.selector.proposer(
            self.machine.number,
            self.machine.round,
            &self.machine.committee,
        );
        self.setup
            .keys
            .iter()
            .find(|key| &key.public() == proposer)
            .expect("proposer is in the committee")
    }

    /// A valid fresh proposal for the current round, signed by its proposer.
    pub(crate) async fn make_proposal(&self) -> validator::Signed<validator::Proposal> {
        self.make_proposal_with(vec![]).await
    }

    /// Same, with the given transactions embedded.
    pub(crate) async fn make_proposal_with(
        &self,
        transactions: Vec<validator::Transaction>,
    ) -> validator::Signed<validator::Proposal> {
        let tip = self
            .machine
            .config
            .engine
            .last_block()
            .await
            .unwrap()
            .expect("harness chains start at genesis");
        let round = self.machine.round;
        let milestone = self.machine.config.milestone(self.machine.number);
        let proposer = self.proposer_key();
        let mut block = self.setup.make_block(
            Some(&tip),
            round,
            &proposer.public(),
            transactions,
        );
        block.header.timestamp =
            minimal_timestamp(tip.header.timestamp, round, milestone).unwrap();
        proposer.sign_msg(validator::Proposal {
            block,
            round,
            valid_round: None,
            lock_proof: None,
        })
    }

    /// Feeds a proposal through the admission path, then the machine's own
    /// follow-up messages.
    pub(crate) async fn process_proposal(
        &mut self,
        signed: validator::Signed<validator::Proposal>,
    ) -> Result<(), super::proposal::Error> {
        let res = self.machine.on_proposal(signed).await;
        self.drain_self_queue().await;
        res
    }

    /// Feeds a vote through the admission path, then the machine's own
    /// follow-up messages.
    pub(crate) async fn process_vote(
        &mut self,
        signed: validator::Signed<validator::Vote>,
    ) -> Result<(), super::vote::Error> {
        let res = self.machine.on_vote(signed).await;
        self.drain_self_queue().await;
        res
    }

    /// Feeds votes of `kind` for `block_id` from the given validators.
    pub(crate) async fn process_votes(
        &mut self,
        kind: validator::VoteKind,
        block_id: Option<validator::BlockId>,
        validators: &[usize],
    ) {
        for &index in validators {
            let vote = self.setup.signed_vote(
                index,
                kind,
                self.machine.number,
                self.machine.round,
                block_id,
            );
            // Our own validator may have cast this vote already.
            let _ = self.machine.on_vote(vote).await;
        }
        self.drain_self_queue().await;
    }

    /// Processes messages the machine addressed to itself.
    pub(crate) async fn drain_self_queue(&mut self) {
        while let Some(input) = self.machine.take_self_queued() {
            self.machine.dispatch(input).await.unwrap();
        }
    }

    /// Timeout of the given kind, delivered as if the timer fired.
    pub(crate) async fn fire_timeout(&mut self, timeout: super::Timeout) {
        self.machine.scheduler.disarm(timeout);
        self.machine.on_timeout(timeout).await.unwrap();
        self.drain_self_queue().await;
    }

    /// Builds a machine like [`UnitTestHarness::new`] but runs its full event
    /// loop in a background task, leaving only the channels to the test.
    pub(crate) async fn spawn(seed: u64, num_validators: usize) -> (SpawnedHarness, Setup) {
        init_tracing();
        let mut rng = StdRng::seed_from_u64(seed);
        let setup = Setup::new(&mut rng, num_validators);
        let genesis = setup.make_block(
            None,
            validator::RoundNumber(0),
            &setup.key(0).public(),
            vec![],
        );
        let engine = TestEngine::new(genesis, setup.committee.iter().cloned().collect());
        let config = Config {
            secret_keys: vec![setup.key(0).clone()],
            milestones: fast_milestones(setup.committee.len()),
            engine: engine.manager(),
        };
        let (outbound_send, outbound_recv) = mpsc::unbounded_channel();
        let (inbound_send, inbound_recv) = mpsc::unbounded_channel();
        let (state_send, state_recv) =
            watch::channel(validator::ConsensusState::new(validator::BlockNumber(0)));
        let handle =
            tokio::spawn(config.run(outbound_send, inbound_recv, state_send));
        (
            SpawnedHarness {
                engine,
                outbound: outbound_recv,
                inbound: inbound_send,
                state: state_recv,
                _handle: handle,
            },
            setup,
        )
    }
}

/// Channel-level handles to a state machine running in a background task.
pub(crate) struct SpawnedHarness {
    pub(crate) engine: TestEngine,
    pub(crate) outbound: mpsc::UnboundedReceiver<OutputMessage>,
    pub(crate) inbound: mpsc::UnboundedSender<InputMessage>,
    pub(crate) state: watch::Receiver<validator::ConsensusState>,
    _handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl SpawnedHarness {
    /// Sends a vote signed by the given validator into the machine.
    pub(crate) fn send_vote(&self, setup: &Setup, index: usize, vote: validator::Vote) {
        let message = setup
            .key(index)
            .sign_msg(vote)
            .cast()
            .expect("vote is a consensus message");
        self.inbound
            .send(InputMessage { message })
            .expect("machine is running");
    }

    /// Waits until the published state satisfies the predicate.
    pub(crate) async fn wait_for_state(
        &mut self,
        pred: impl Fn(&validator::ConsensusState) -> bool,
    ) {
        loop {
            let done = pred(&self.state.borrow());
            if done {
                return;
            }
            self.state.changed().await.expect("machine is running");
        }
    }
}
