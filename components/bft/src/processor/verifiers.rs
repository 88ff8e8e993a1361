//! The ordered verifier pipeline.
//!
//! Verifiers run in a fixed order and the pipeline short-circuits on the
//! first failure, so cheap structural checks shield the more expensive ones.
//! Each verifier answers `true`/`false` for the routine pass/violation cases
//! and reserves errors for malformed producers and infrastructure failures.

use std::collections::HashMap;

use corten_consensus_roles::validator;

use super::{BlockProcessor, MalformedBlockError, VerifierError};

/// The checks of the pipeline, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Verifier {
    /// The candidate must chain exactly onto the current tip.
    Chained,
    /// The declared generator must be the round's selected proposer.
    Generator,
    /// The timestamp must respect the round-escalation schedule.
    Timestamp,
    /// All transactions must share one version.
    IncompatibleTransactions,
    /// Per-sender nonces must be strictly increasing and continuous.
    Nonce,
}

/// The pipeline. Constructed once; order is part of the protocol.
pub(crate) const PIPELINE: [Verifier; 5] = [
    Verifier::Chained,
    Verifier::Generator,
    Verifier::Timestamp,
    Verifier::IncompatibleTransactions,
    Verifier::Nonce,
];

/// A candidate block bundled with the context the verifiers need.
#[derive(Debug)]
pub(crate) struct ProcessingUnit<'a> {
    /// The candidate block.
    pub(crate) block: &'a validator::Block,
    /// Round the block was proposed in.
    pub(crate) round: validator::RoundNumber,
    /// The validator that owns the proposal slot.
    pub(crate) expected_proposer: &'a validator::PublicKey,
    /// Current chain tip; `None` while the chain is empty.
    pub(crate) tip: Option<&'a validator::Block>,
    /// Protocol parameters for the candidate's height.
    pub(crate) milestone: &'a validator::Milestone,
}

impl BlockProcessor {
    /// Executes a single verifier over the unit.
    pub(crate) async fn execute(
        &self,
        verifier: Verifier,
        unit: &ProcessingUnit<'_>,
    ) -> Result<bool, VerifierError> {
        match verifier {
            Verifier::Chained => Ok(chained(unit)),
            Verifier::Generator => Ok(generator(unit)),
            Verifier::Timestamp => timestamp(unit),
            Verifier::IncompatibleTransactions => incompatible_transactions(unit),
            Verifier::Nonce => self.nonces(unit).await,
        }
    }

    /// Per-sender nonces within the block must continue the sender's last
    /// applied nonce without gaps.
    async fn nonces(&self, unit: &ProcessingUnit<'_>) -> Result<bool, VerifierError> {
        let mut last_by_sender: HashMap<validator::PublicKey, u64> = HashMap::new();
        for tx in &unit.block.transactions {
            let last = match last_by_sender.get(&tx.sender) {
                Some(last) => *last,
                None => self
                    .engine()
                    .account_nonce(&tx.sender)
                    .await
                    .map_err(VerifierError::Internal)?,
            };
            if tx.nonce != last + 1 {
                tracing::warn!(
                    number = unit.block.number().0,
                    sender = ?tx.sender,
                    preceding = last,
                    nonce = tx.nonce,
                    "block not accepted: invalid nonce order"
                );
                return Ok(false);
            }
            last_by_sender.insert(tx.sender.clone(), tx.nonce);
        }
        Ok(true)
    }
}

/// Height 0 always passes; every other block must link onto the tip.
fn chained(unit: &ProcessingUnit<'_>) -> bool {
    let Some(tip) = unit.tip else {
        return unit.block.number().is_genesis();
    };
    unit.block.number() == tip.number().next() && unit.block.header.previous == tip.id()
}

/// The declared generator must equal the selected proposer. Genesis has no
/// proposer slot and passes.
fn generator(unit: &ProcessingUnit<'_>) -> bool {
    if unit.block.number().is_genesis() {
        return true;
    }
    let ok = &unit.block.header.generator == unit.expected_proposer;
    if !ok {
        tracing::warn!(
            number = unit.block.number().0,
            generator = ?unit.block.header.generator,
            expected = ?unit.expected_proposer,
            "block not accepted: generator is not the selected proposer"
        );
    }
    ok
}

/// The timestamp must be at or past the minimal timestamp for the block's
/// round. Genesis has no predecessor and passes.
fn timestamp(unit: &ProcessingUnit<'_>) -> Result<bool, VerifierError> {
    if unit.round.0 > validator::MAX_ROUND {
        return Err(MalformedBlockError::RoundOutOfBounds { round: unit.round }.into());
    }
    let Some(tip) = unit.tip else {
        return Ok(true);
    };
    // Re-proposed blocks keep the round they were forged in, so the schedule
    // is checked against the header's round, not the proposal's.
    let min = minimal_timestamp(tip.header.timestamp, unit.block.header.round, unit.milestone)?;
    Ok(unit.block.header.timestamp >= min)
}

/// A block mixing transaction versions indicates a malformed producer.
fn incompatible_transactions(unit: &ProcessingUnit<'_>) -> Result<bool, VerifierError> {
    let txs = &unit.block.transactions;
    for tx in txs.iter().skip(1) {
        if tx.version != txs[0].version {
            return Err(MalformedBlockError::IncompatibleTransactions {
                id: unit.block.id(),
            }
            .into());
        }
    }
    Ok(true)
}

/// The minimal admissible block timestamp for a round.
///
/// Each round past the first adds a linearly growing penalty on top of the
/// base block time and the per-round stage timeouts, modelling the
/// accumulated escalation of the honest round-timeout schedule:
///
/// `min = prev + block_time + round * stage_timeout + increase * r' * (r'+1) / 2`
///
/// with `r' = max(0, round - 1)`. Rounds above [`validator::MAX_ROUND`] are
/// refused outright.
pub fn minimal_timestamp(
    prev_timestamp: u64,
    round: validator::RoundNumber,
    milestone: &validator::Milestone,
) -> Result<u64, MalformedBlockError> {
    if round.0 > validator::MAX_ROUND {
        return Err(MalformedBlockError::RoundOutOfBounds { round });
    }
    let r = u128::from(round.0);
    let r_prime = r.saturating_sub(1);
    let escalation = r_prime * (r_prime + 1) / 2 * u128::from(milestone.stage_timeout_increase);
    let min = u128::from(prev_timestamp)
        + u128::from(milestone.block_time)
        + r * u128::from(milestone.stage_timeout)
        + escalation;
    u64::try_from(min).map_err(|_| MalformedBlockError::TimestampOverflow { round })
}
