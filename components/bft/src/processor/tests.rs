use std::sync::Arc;

use assert_matches::assert_matches;
use corten_consensus_engine::{testonly::TestEngine, ChainEvent};
use corten_consensus_roles::validator::{
    self,
    testonly::{make_tx, Setup},
};
use rand::{rngs::StdRng, SeedableRng as _};
use test_casing::test_casing;

use super::{minimal_timestamp, BlockProcessor, BlockProcessorResult, MalformedBlockError};
use crate::{selector::ProposerSelector, validator_set::ValidatorSetService};

fn milestones(active_validators: usize) -> validator::MilestoneSchedule {
    validator::MilestoneSchedule::constant(validator::Milestone {
        active_validators,
        ..validator::Milestone::default()
    })
}

struct TestProcessor {
    setup: Setup,
    engine: TestEngine,
    processor: BlockProcessor,
    genesis: validator::Block,
}

impl TestProcessor {
    fn new(seed: u64, num_validators: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let setup = Setup::new(&mut rng, num_validators);
        let genesis = setup.make_block(
            None,
            validator::RoundNumber(0),
            &setup.key(0).public(),
            vec![],
        );
        let engine = TestEngine::new(genesis.clone(), setup.committee.iter().cloned().collect());
        let milestones = milestones(num_validators);
        let validator_set = Arc::new(ValidatorSetService::new(
            engine.manager(),
            milestones.clone(),
        ));
        let processor = BlockProcessor::new(engine.manager(), milestones, validator_set);
        Self {
            setup,
            engine,
            processor,
            genesis,
        }
    }

    /// The key of the validator that owns the `(height 1, round)` slot.
    fn proposer(&self, round: validator::RoundNumber) -> validator::PublicKey {
        ProposerSelector
            .proposer(validator::BlockNumber(1), round, &self.setup.committee)
            .clone()
    }

    /// A block chained onto genesis with a valid timestamp for `round`.
    fn candidate(
        &self,
        round: validator::RoundNumber,
        generator: &validator::PublicKey,
        transactions: Vec<validator::Transaction>,
    ) -> validator::Block {
        let mut block = self
            .setup
            .make_block(Some(&self.genesis), round, generator, transactions);
        block.header.timestamp = minimal_timestamp(
            self.genesis.header.timestamp,
            round,
            self.setup.milestones.milestone(validator::BlockNumber(1)),
        )
        .unwrap();
        block
    }
}

#[tokio::test]
async fn accepts_a_well_formed_block() {
    let t = TestProcessor::new(61, 4);
    let round = validator::RoundNumber(0);
    let proposer = t.proposer(round);
    let block = t.candidate(round, &proposer, vec![]);
    assert_eq!(
        t.processor.process(&block, round, &proposer).await.unwrap(),
        BlockProcessorResult::Accepted,
    );
    assert_eq!(t.engine.chain.reset_calls(), 0);
}

#[tokio::test]
async fn rejects_an_unchained_block() {
    let t = TestProcessor::new(67, 4);
    let round = validator::RoundNumber(0);
    let proposer = t.proposer(round);
    let mut block = t.candidate(round, &proposer, vec![]);
    block.header.previous = validator::BlockId::zero();

    assert_eq!(
        t.processor.process(&block, round, &proposer).await.unwrap(),
        BlockProcessorResult::Rejected,
    );
    // The rejection resets the sync layer's download pointer.
    assert_eq!(t.engine.chain.reset_calls(), 1);
    assert!(t
        .engine
        .chain
        .events()
        .iter()
        .any(|event| matches!(event, ChainEvent::BlockRejected { .. })));
}

#[tokio::test]
async fn rejects_a_height_gap() {
    let t = TestProcessor::new(71, 4);
    let round = validator::RoundNumber(0);
    let proposer = t.proposer(round);
    let mut block = t.candidate(round, &proposer, vec![]);
    block.header.number = validator::BlockNumber(5);

    assert_eq!(
        t.processor.process(&block, round, &proposer).await.unwrap(),
        BlockProcessorResult::Rejected,
    );
}

#[tokio::test]
async fn generator_mismatch_short_circuits_later_verifiers() {
    let t = TestProcessor::new(73, 4);
    let round = validator::RoundNumber(0);
    let proposer = t.proposer(round);
    let stranger = validator::SecretKey::generate().public();
    // The block also mixes transaction versions, which would be fatal if the
    // pipeline ever got that far. The generator check fires first.
    let txs = vec![
        make_tx(t.setup.key(1), 1, 1),
        make_tx(t.setup.key(1), 2, 2),
    ];
    let block = t.candidate(round, &stranger, txs);

    assert_eq!(
        t.processor.process(&block, round, &proposer).await.unwrap(),
        BlockProcessorResult::Rejected,
    );
}

#[tokio::test]
async fn rejects_a_premature_timestamp() {
    let t = TestProcessor::new(79, 4);
    let round = validator::RoundNumber(2);
    let proposer = t.proposer(round);
    let mut block = t.candidate(round, &proposer, vec![]);
    block.header.timestamp -= 1;

    assert_eq!(
        t.processor.process(&block, round, &proposer).await.unwrap(),
        BlockProcessorResult::Rejected,
    );
}

#[tokio::test]
async fn mixed_transaction_versions_are_fatal() {
    let t = TestProcessor::new(83, 4);
    let round = validator::RoundNumber(0);
    let proposer = t.proposer(round);
    let txs = vec![
        make_tx(t.setup.key(1), 1, 1),
        make_tx(t.setup.key(1), 2, 2),
    ];
    let block = t.candidate(round, &proposer, txs);

    assert_matches!(
        t.processor.process(&block, round, &proposer).await,
        Err(MalformedBlockError::IncompatibleTransactions { .. })
    );
}

#[tokio::test]
async fn oversized_rounds_are_fatal() {
    let t = TestProcessor::new(89, 4);
    let round = validator::RoundNumber(validator::MAX_ROUND + 1);
    let proposer = t.proposer(validator::RoundNumber(0));
    let block = {
        let mut block = t
            .setup
            .make_block(Some(&t.genesis), round, &proposer, vec![]);
        block.header.timestamp = u64::MAX;
        block
    };

    assert_matches!(
        t.processor.process(&block, round, &proposer).await,
        Err(MalformedBlockError::RoundOutOfBounds { .. })
    );
}

#[tokio::test]
async fn nonces_must_be_continuous() {
    let t = TestProcessor::new(97, 4);
    let round = validator::RoundNumber(0);
    let proposer = t.proposer(round);
    let sender = t.setup.key(2);
    t.engine.chain.set_nonce(&sender.public(), 7);

    // Continuous from the last applied nonce: accepted.
    let txs = vec![make_tx(sender, 1, 8), make_tx(sender, 1, 9)];
    let block = t.candidate(round, &proposer, txs);
    assert_eq!(
        t.processor.process(&block, round, &proposer).await.unwrap(),
        BlockProcessorResult::Accepted,
    );

    // A gap: rejected.
    let txs = vec![make_tx(sender, 1, 8), make_tx(sender, 1, 10)];
    let block = t.candidate(round, &proposer, txs);
    assert_eq!(
        t.processor.process(&block, round, &proposer).await.unwrap(),
        BlockProcessorResult::Rejected,
    );

    // Starting past the last applied nonce: rejected.
    let txs = vec![make_tx(sender, 1, 9)];
    let block = t.candidate(round, &proposer, txs);
    assert_eq!(
        t.processor.process(&block, round, &proposer).await.unwrap(),
        BlockProcessorResult::Rejected,
    );
}

#[tokio::test]
async fn stale_duplicates_can_still_be_broadcast() {
    let t = TestProcessor::new(101, 4);
    let round = validator::RoundNumber(0);
    let proposer = t.proposer(round);

    // The genesis block itself is a duplicate of the tip.
    assert_eq!(
        t.processor
            .process(&t.genesis.clone(), round, &proposer)
            .await
            .unwrap(),
        BlockProcessorResult::DiscardedButCanBeBroadcasted,
    );
    assert_eq!(t.engine.chain.reset_calls(), 0);
}

#[tokio::test]
async fn competing_tip_from_legitimate_proposer_triggers_rollback() {
    let t = TestProcessor::new(103, 4);
    // A competing block at the genesis height, "forged" by the validator the
    // selector would have picked for that slot.
    let slot_round = validator::RoundNumber(0);
    let legitimate = ProposerSelector
        .proposer(validator::BlockNumber(0), slot_round, &t.setup.committee)
        .clone();
    let competing = t
        .setup
        .make_block(None, slot_round, &legitimate, vec![]);
    assert_ne!(competing.id(), t.genesis.id());

    assert_eq!(
        t.processor
            .process(&competing, slot_round, &legitimate)
            .await
            .unwrap(),
        BlockProcessorResult::Rollback,
    );
    // The tip was unwound and the fork surfaced.
    assert!(t.engine.chain.blocks().is_empty());
    assert!(t
        .engine
        .chain
        .events()
        .iter()
        .any(|event| matches!(event, ChainEvent::ForkDetected { .. })));
}

#[tokio::test]
async fn competing_tip_from_anyone_else_is_rejected() {
    let t = TestProcessor::new(107, 4);
    let slot_round = validator::RoundNumber(0);
    let legitimate = ProposerSelector
        .proposer(validator::BlockNumber(0), slot_round, &t.setup.committee)
        .clone();
    let impostor = t
        .setup
        .committee
        .keys()
        .find(|key| *key != &legitimate)
        .unwrap()
        .clone();
    let competing = t.setup.make_block(None, slot_round, &impostor, vec![]);

    assert_eq!(
        t.processor
            .process(&competing, slot_round, &legitimate)
            .await
            .unwrap(),
        BlockProcessorResult::Rejected,
    );
    assert_eq!(t.engine.chain.blocks().len(), 1);
}

#[tokio::test]
async fn infrastructure_failure_is_corrupted() {
    let t = TestProcessor::new(109, 4);
    let round = validator::RoundNumber(0);
    let proposer = t.proposer(round);
    let block = t.candidate(round, &proposer, vec![]);

    t.engine.chain.fail_reads(true);
    assert_eq!(
        t.processor.process(&block, round, &proposer).await.unwrap(),
        BlockProcessorResult::Corrupted,
    );
}

#[tokio::test]
async fn genesis_bypasses_chain_and_proposer_checks() {
    let mut rng = StdRng::seed_from_u64(113);
    let setup = Setup::new(&mut rng, 4);
    // An empty chain: the genesis block is yet to be committed.
    let engine = TestEngine {
        chain: corten_consensus_engine::testonly::in_memory::Chain::empty(
            setup.committee.iter().cloned().collect(),
        ),
        collator: corten_consensus_engine::testonly::in_memory::Collator::default(),
        storage: corten_consensus_engine::testonly::in_memory::Storage::default(),
    };
    let milestones = milestones(4);
    let validator_set = Arc::new(ValidatorSetService::new(
        engine.manager(),
        milestones.clone(),
    ));
    let processor = BlockProcessor::new(engine.manager(), milestones, validator_set);

    // The generator is not any selected proposer; height 0 doesn't care.
    let stranger = validator::SecretKey::generate().public();
    let genesis = setup.make_block(None, validator::RoundNumber(0), &stranger, vec![]);
    let someone = setup.key(0).public();
    assert_eq!(
        processor
            .process(&genesis, validator::RoundNumber(0), &someone)
            .await
            .unwrap(),
        BlockProcessorResult::Accepted,
    );
}

#[test_casing(4, [(0, 1), (1, 2), (2, 10), (50, 51)])]
#[test]
fn minimal_timestamp_strictly_increases(earlier: u64, later: u64) {
    let milestone = validator::Milestone::default();
    let a = minimal_timestamp(1_000, validator::RoundNumber(earlier), &milestone).unwrap();
    let b = minimal_timestamp(1_000, validator::RoundNumber(later), &milestone).unwrap();
    assert!(b > a, "round {later} must have a later minimal timestamp");
}

#[test]
fn minimal_timestamp_shape() {
    let milestone = validator::Milestone::default();
    let prev = 1_000_000;

    // Round 0: just the block time.
    assert_eq!(
        minimal_timestamp(prev, validator::RoundNumber(0), &milestone).unwrap(),
        prev + milestone.block_time,
    );
    // Round 1 has no escalation term yet.
    assert_eq!(
        minimal_timestamp(prev, validator::RoundNumber(1), &milestone).unwrap(),
        prev + milestone.block_time + milestone.stage_timeout,
    );
    // Round 3: escalation is increase * (1 + 2).
    assert_eq!(
        minimal_timestamp(prev, validator::RoundNumber(3), &milestone).unwrap(),
        prev + milestone.block_time
            + 3 * milestone.stage_timeout
            + 3 * milestone.stage_timeout_increase,
    );

    assert_matches!(
        minimal_timestamp(prev, validator::RoundNumber(validator::MAX_ROUND + 1), &milestone),
        Err(MalformedBlockError::RoundOutOfBounds { .. })
    );
}
