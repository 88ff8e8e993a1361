use corten_consensus_roles::validator::{
    self,
    testonly::{make_tx, Setup},
};
use rand::{rngs::StdRng, SeedableRng as _};

use crate::{testonly::TestEngine, ChainEvent, CommitKey};

fn setup() -> (Setup, TestEngine) {
    let mut rng = StdRng::seed_from_u64(31);
    let setup = Setup::new(&mut rng, 4);
    let genesis = setup.make_block(
        None,
        validator::RoundNumber(0),
        &setup.key(0).public(),
        vec![],
    );
    let registrations = setup.committee.iter().cloned().collect();
    let engine = TestEngine::new(genesis, registrations);
    (setup, engine)
}

#[tokio::test]
async fn state_roundtrip() {
    let (_, engine) = setup();
    let manager = engine.manager();

    assert_eq!(manager.state().await.unwrap(), None);

    let state = validator::ConsensusState {
        number: validator::BlockNumber(10),
        round: validator::RoundNumber(2),
        step: validator::Step::Prevote,
        locked_round: None,
        valid_round: Some(validator::RoundNumber(1)),
    };
    manager.save_state(&state).await.unwrap();
    assert_eq!(manager.state().await.unwrap(), Some(state.clone()));

    // Overwrites, never merges.
    let newer = validator::ConsensusState {
        round: validator::RoundNumber(3),
        ..state
    };
    manager.save_state(&newer).await.unwrap();
    assert_eq!(manager.state().await.unwrap(), Some(newer));
}

#[tokio::test]
async fn votes_are_keyed_by_round_and_signer() {
    let (setup, engine) = setup();
    let manager = engine.manager();

    let vote = |i: usize, round: u64| {
        setup.signed_vote(
            i,
            validator::VoteKind::Prevote,
            validator::BlockNumber(1),
            validator::RoundNumber(round),
            None,
        )
    };

    manager
        .save_prevotes(&[vote(0, 0), vote(1, 0)])
        .await
        .unwrap();
    // Same signer and round again: overwrite, not append.
    manager.save_prevotes(&[vote(0, 0)]).await.unwrap();
    // Same signer, different round: separate record.
    manager.save_prevotes(&[vote(0, 1)]).await.unwrap();

    assert_eq!(manager.prevotes().await.unwrap().len(), 3);
    assert_eq!(manager.precommits().await.unwrap().len(), 0);
}

#[tokio::test]
async fn clear_drops_everything() {
    let (setup, engine) = setup();
    let manager = engine.manager();

    let state = validator::ConsensusState::new(validator::BlockNumber(5));
    manager.save_state(&state).await.unwrap();

    let block = setup.make_block(
        None,
        validator::RoundNumber(0),
        &setup.key(0).public(),
        vec![],
    );
    let proposal = setup
        .key(0)
        .sign_msg(setup.make_proposal(block, validator::RoundNumber(0)));
    manager.save_proposals(&[proposal]).await.unwrap();
    manager
        .save_prevotes(&[setup.signed_vote(
            1,
            validator::VoteKind::Prevote,
            validator::BlockNumber(5),
            validator::RoundNumber(0),
            None,
        )])
        .await
        .unwrap();
    manager
        .save_precommits(&[setup.signed_vote(
            2,
            validator::VoteKind::Precommit,
            validator::BlockNumber(5),
            validator::RoundNumber(0),
            None,
        )])
        .await
        .unwrap();

    manager.clear_storage().await.unwrap();
    assert_eq!(manager.state().await.unwrap(), None);
    assert!(manager.proposals().await.unwrap().is_empty());
    assert!(manager.prevotes().await.unwrap().is_empty());
    assert!(manager.precommits().await.unwrap().is_empty());
}

#[tokio::test]
async fn failing_writes_surface_errors() {
    let (_, engine) = setup();
    let manager = engine.manager();
    engine.storage.fail_writes(true);

    let state = validator::ConsensusState::new(validator::BlockNumber(1));
    assert!(manager.save_state(&state).await.is_err());

    engine.storage.fail_writes(false);
    manager.save_state(&state).await.unwrap();
}

#[tokio::test]
async fn chain_apply_and_revert() {
    let (setup, engine) = setup();
    let manager = engine.manager();

    let genesis = manager.last_block().await.unwrap().unwrap();
    assert_eq!(genesis.number(), validator::BlockNumber(0));

    let tx = make_tx(setup.key(1), 1, 1);
    let block = setup.make_block(
        Some(&genesis),
        validator::RoundNumber(0),
        &setup.key(0).public(),
        vec![tx.clone()],
    );
    let precommit = validator::Vote {
        kind: validator::VoteKind::Precommit,
        number: block.number(),
        round: validator::RoundNumber(0),
        block_id: Some(block.id()),
    };
    let committed = validator::CommittedBlock {
        proof: setup.make_qc(precommit, &[0, 1, 2]),
        block,
    };
    manager.apply_block(&committed).await.unwrap();
    assert_eq!(
        manager.last_height().await.unwrap(),
        Some(validator::BlockNumber(1))
    );
    assert_eq!(manager.account_nonce(&tx.sender).await.unwrap(), 1);

    manager
        .dispatch(ChainEvent::BlockApplied {
            number: committed.number(),
            id: committed.block.id(),
        })
        .await
        .unwrap();
    assert_eq!(engine.chain.events().len(), 1);

    assert_eq!(
        manager.revert_block().await.unwrap(),
        Some(validator::BlockNumber(0))
    );
    assert_eq!(
        manager.last_height().await.unwrap(),
        Some(validator::BlockNumber(0))
    );
}

#[tokio::test]
async fn collator_modes() {
    let (setup, engine) = setup();
    let manager = engine.manager();
    let key = CommitKey {
        number: validator::BlockNumber(1),
        round: validator::RoundNumber(0),
    };

    assert!(manager.candidate_transactions(key).await.unwrap().is_empty());

    let txs = vec![make_tx(setup.key(0), 1, 1)];
    engine
        .collator
        .set_mode(crate::testonly::in_memory::CollatorMode::Fixed(txs.clone()));
    assert_eq!(manager.candidate_transactions(key).await.unwrap(), txs);
}
