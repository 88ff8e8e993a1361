use assert_matches::assert_matches;
use corten_consensus_roles::validator;
use pretty_assertions::assert_eq;

use super::{testonly::UnitTestHarness, vote, Timeout};

/// The spec's happy path: height 10, round 0, four equal-weight validators;
/// three precommit the same block, quorum (3/4 > 2/3) is reached, the block
/// commits, storage is cleared and the machine moves to height 11 round 0.
#[tokio::test]
async fn precommit_quorum_commits_the_block() {
    let mut util = UnitTestHarness::new_at_height(127, 4, 10).await;
    util.boot().await;
    assert_eq!(util.machine.number, validator::BlockNumber(10));

    // Get the round's proposal in, authored by its legitimate proposer.
    let signed = match util
        .machine
        .round_states
        .get(&validator::RoundNumber(0))
        .and_then(|slot| slot.proposal.clone())
    {
        Some(signed) => signed,
        None => {
            let signed = util.make_proposal().await;
            util.process_proposal(signed.clone()).await.unwrap();
            signed
        }
    };
    let block_id = signed.msg.block.id();
    assert_eq!(util.machine.step, validator::Step::Prevote);

    util.process_votes(validator::VoteKind::Prevote, Some(block_id), &[1, 2, 3])
        .await;
    assert_eq!(util.machine.step, validator::Step::Precommit);
    assert!(util.machine.locked.is_some());

    util.process_votes(validator::VoteKind::Precommit, Some(block_id), &[1, 2, 3])
        .await;

    // Committed and moved on.
    assert_eq!(util.machine.number, validator::BlockNumber(11));
    assert_eq!(util.machine.round, validator::RoundNumber(0));
    assert!(util.machine.locked.is_none());
    let blocks = util.engine.chain.blocks();
    assert_eq!(blocks.last().unwrap().id(), block_id);
    assert_eq!(blocks.last().unwrap().number(), validator::BlockNumber(10));

    // Storage was cleared on commit; the collections are empty again.
    assert!(util.engine.manager().proposals().await.unwrap().is_empty());
    assert!(util.engine.manager().prevotes().await.unwrap().is_empty());
    assert!(util.engine.manager().precommits().await.unwrap().is_empty());

    // External readers see the new height.
    assert_eq!(util.state.borrow().number, validator::BlockNumber(11));
}

/// The spec's split-vote path: precommits split 2-for-a-block / 2-for-nil
/// among four equal-weight validators reach no quorum; the round timeout
/// fires and the round increments without a commit.
#[tokio::test]
async fn split_precommits_time_out_into_the_next_round() {
    let mut util = UnitTestHarness::new(131, 4).await;
    util.boot().await;
    let number = util.machine.number;

    let phantom: validator::BlockId = rand::random();
    for (index, target) in [(0, Some(phantom)), (1, Some(phantom)), (2, None), (3, None)] {
        let vote = util.setup.signed_vote(
            index,
            validator::VoteKind::Precommit,
            number,
            validator::RoundNumber(0),
            target,
        );
        let _ = util.machine.on_vote(vote).await;
    }
    util.drain_self_queue().await;

    // No commit; the precommit timer was armed by the any-target quorum.
    assert_eq!(util.machine.number, number);
    util.fire_timeout(Timeout::Precommit).await;

    assert_eq!(util.machine.number, number);
    assert_eq!(util.machine.round, validator::RoundNumber(1));
    // Votes survive a round timeout; only a commit clears them.
    assert_eq!(util.engine.manager().precommits().await.unwrap().len(), 4);
}

/// A precommit quorum on nil skips straight to the next round.
#[tokio::test]
async fn nil_precommit_quorum_starts_the_next_round() {
    let mut util = UnitTestHarness::new(137, 4).await;
    util.boot().await;

    util.process_votes(validator::VoteKind::Precommit, None, &[1, 2, 3])
        .await;
    assert_eq!(util.machine.round, validator::RoundNumber(1));
    assert_eq!(util.machine.number, validator::BlockNumber(1));
}

/// A prevote quorum locks the value, and the lock survives round timeouts so
/// it can be re-proposed with its proof.
#[tokio::test]
async fn locks_carry_over_into_reproposals() {
    let mut util = UnitTestHarness::new(139, 4).await;
    util.boot().await;

    let signed = match util
        .machine
        .round_states
        .get(&validator::RoundNumber(0))
        .and_then(|slot| slot.proposal.clone())
    {
        Some(signed) => signed,
        None => {
            let signed = util.make_proposal().await;
            util.process_proposal(signed.clone()).await.unwrap();
            signed
        }
    };
    let block_id = signed.msg.block.id();

    util.process_votes(validator::VoteKind::Prevote, Some(block_id), &[1, 2, 3])
        .await;
    let locked = util.machine.locked.clone().expect("value is locked");
    assert_eq!(locked.round, validator::RoundNumber(0));
    assert_eq!(locked.block.id(), block_id);

    util.fire_timeout(Timeout::Precommit).await;
    assert_eq!(util.machine.round, validator::RoundNumber(1));
    let locked = util.machine.locked.clone().expect("lock survives the timeout");
    assert_eq!(locked.round, validator::RoundNumber(0));

    // Whoever proposes now must re-propose the valid value with its proof.
    // If the machine's own key owned round 1, it already did so during the
    // round start; otherwise author it explicitly.
    let already = util
        .machine
        .round_states
        .get(&validator::RoundNumber(1))
        .and_then(|slot| slot.proposal.clone());
    let reproposal = match already {
        Some(signed) => signed.msg,
        None => {
            let local = util.setup.key(0).public();
            util.machine.propose(&local).await.unwrap();
            std::iter::from_fn(|| util.machine.take_self_queued())
                .find_map(|input| match input.message.msg {
                    validator::ConsensusMsg::Proposal(proposal) => Some(proposal),
                    validator::ConsensusMsg::Vote(_) => None,
                })
                .expect("a re-proposal was authored")
        }
    };
    assert_eq!(reproposal.valid_round, Some(validator::RoundNumber(0)));
    assert_eq!(reproposal.block.id(), block_id);
    reproposal.verify(&util.setup.committee).unwrap();
}

/// Duplicate votes are rejected, not merged; equivocation is called out.
#[tokio::test]
async fn duplicate_votes_are_rejected() {
    let mut util = UnitTestHarness::new(149, 4).await;
    util.boot().await;
    let number = util.machine.number;

    let vote = util.setup.signed_vote(
        2,
        validator::VoteKind::Prevote,
        number,
        validator::RoundNumber(0),
        None,
    );
    util.machine.on_vote(vote.clone()).await.unwrap();
    assert_matches!(
        util.machine.on_vote(vote).await,
        Err(vote::Error::Replay)
    );

    let conflicting = util.setup.signed_vote(
        2,
        validator::VoteKind::Prevote,
        number,
        validator::RoundNumber(0),
        Some(rand::random()),
    );
    assert_matches!(
        util.machine.on_vote(conflicting).await,
        Err(vote::Error::Equivocation { .. })
    );
}

/// Votes above 1/3 weight for a higher round drag the node forward.
#[tokio::test]
async fn minority_at_higher_round_skips_ahead() {
    let mut util = UnitTestHarness::new(151, 4).await;
    util.boot().await;
    let number = util.machine.number;

    for index in [1, 2] {
        let vote = util.setup.signed_vote(
            index,
            validator::VoteKind::Prevote,
            number,
            validator::RoundNumber(5),
            None,
        );
        util.machine.on_vote(vote).await.unwrap();
    }
    util.drain_self_queue().await;

    assert_eq!(util.machine.round, validator::RoundNumber(5));
    assert_eq!(util.machine.step, validator::Step::Propose);
    assert_eq!(util.machine.number, number);
}

/// Messages outside the admissible window are refused at the door.
#[tokio::test]
async fn admission_guards() {
    let mut util = UnitTestHarness::new(157, 4).await;
    util.boot().await;

    // A vote for another height.
    let vote = util.setup.signed_vote(
        1,
        validator::VoteKind::Prevote,
        validator::BlockNumber(999),
        validator::RoundNumber(0),
        None,
    );
    assert_matches!(
        util.machine.on_vote(vote).await,
        Err(vote::Error::WrongHeight { .. })
    );

    // A vote from outside the committee.
    let stranger = validator::SecretKey::generate();
    let vote = stranger.sign_msg(validator::Vote {
        kind: validator::VoteKind::Prevote,
        number: util.machine.number,
        round: validator::RoundNumber(0),
        block_id: None,
    });
    assert_matches!(
        util.machine.on_vote(vote).await,
        Err(vote::Error::NotACommitteeMember { .. })
    );

    // A vote beyond the round sanity bound.
    let vote = util.setup.signed_vote(
        1,
        validator::VoteKind::Prevote,
        util.machine.number,
        validator::RoundNumber(validator::MAX_ROUND + 1),
        None,
    );
    assert_matches!(
        util.machine.on_vote(vote).await,
        Err(vote::Error::RoundOutOfBounds { .. })
    );

    // A proposal from someone who doesn't own the slot.
    let signed = util.make_proposal().await;
    let impostor_index = (0..util.setup.keys.len())
        .find(|&i| util.setup.key(i).public() != util.proposer_key().public())
        .unwrap();
    let forged = util.setup.key(impostor_index).sign_msg(signed.msg.clone());
    assert_matches!(
        util.machine.on_proposal(forged).await,
        Err(super::proposal::Error::InvalidProposer { .. })
    );
}

/// A restart resumes from the persisted state instead of the network.
#[tokio::test]
async fn recovery_resumes_from_storage() {
    let mut util = UnitTestHarness::new(163, 4).await;
    util.boot().await;
    let number = util.machine.number;

    let signed = match util
        .machine
        .round_states
        .get(&validator::RoundNumber(0))
        .and_then(|slot| slot.proposal.clone())
    {
        Some(signed) => signed,
        None => {
            let signed = util.make_proposal().await;
            util.process_proposal(signed.clone()).await.unwrap();
            signed
        }
    };
    let block_id = signed.msg.block.id();
    // One external prevote; no quorum yet.
    util.process_votes(validator::VoteKind::Prevote, Some(block_id), &[1])
        .await;

    // "Crash" and rebuild over the same engine.
    let setup = util.setup.clone();
    let engine = util.engine.clone();
    drop(util);
    let mut revived = UnitTestHarness::with_engine(setup, engine).await;

    assert_eq!(revived.machine.number, number);
    let slot = revived
        .machine
        .round_states
        .get(&validator::RoundNumber(0))
        .expect("persisted round was reloaded");
    assert!(slot.proposal.is_some());
    assert!(slot.has_vote(
        validator::VoteKind::Prevote,
        &revived.setup.key(1).public()
    ));

    // Feeding the remaining prevotes completes the quorum after the restart.
    revived.boot().await;
    revived
        .process_votes(validator::VoteKind::Prevote, Some(block_id), &[2, 3])
        .await;
    assert!(revived.machine.locked.is_some());
}

/// Persisted state for a height the chain has moved past is discarded.
#[tokio::test]
async fn recovery_discards_stale_state() {
    let util = UnitTestHarness::new(167, 4).await;
    let manager = util.engine.manager();
    manager
        .save_state(&validator::ConsensusState::new(validator::BlockNumber(99)))
        .await
        .unwrap();

    let setup = util.setup.clone();
    let engine = util.engine.clone();
    drop(util);
    let revived = UnitTestHarness::with_engine(setup, engine).await;

    assert_eq!(revived.machine.number, validator::BlockNumber(1));
    assert_eq!(revived.engine.manager().state().await.unwrap(), None);
}

/// Full event loop over channels with simulated time: with no proposal the
/// propose timer fires, the machine votes nil, nil quorums walk it into the
/// next round.
#[tokio::test(start_paused = true)]
async fn run_loop_times_out_into_the_next_round() {
    let (mut spawned, setup) = UnitTestHarness::spawn(173, 4).await;
    let number = validator::BlockNumber(1);

    // The machine's own first vote. If its key owns the proposal slot it
    // will propose and prevote the block; everyone else prevotes nil after
    // the propose timeout.
    let first_vote = loop {
        let output = spawned.outbound.recv().await.expect("machine is running");
        if let validator::ConsensusMsg::Vote(vote) = &output.message.msg {
            break vote.clone();
        }
    };
    assert_eq!(first_vote.kind, validator::VoteKind::Prevote);
    assert_eq!(first_vote.number, number);

    // Echo matching prevotes from the rest of the committee.
    for index in [1, 2, 3] {
        spawned.send_vote(&setup, index, first_vote.clone());
    }

    // The machine precommits the prevote quorum's target.
    let precommit = loop {
        let output = spawned.outbound.recv().await.expect("machine is running");
        if let validator::ConsensusMsg::Vote(vote) = &output.message.msg {
            if vote.kind == validator::VoteKind::Precommit {
                break vote.clone();
            }
        }
    };

    match precommit.block_id {
        // Nil path: nil precommit quorum bumps the round.
        None => {
            for index in [1, 2, 3] {
                spawned.send_vote(&setup, index, precommit.clone());
            }
            spawned
                .wait_for_state(|state| state.round == validator::RoundNumber(1))
                .await;
        }
        // Block path: the machine's own proposal commits.
        Some(block_id) => {
            for index in [1, 2, 3] {
                spawned.send_vote(&setup, index, precommit.clone());
            }
            spawned
                .wait_for_state(|state| state.number == validator::BlockNumber(2))
                .await;
            let blocks = spawned.engine.chain.blocks();
            assert_eq!(blocks.last().unwrap().id(), block_id);
        }
    }
}
