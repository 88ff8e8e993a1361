//! Height-indexed protocol parameters.
//!
//! A milestone is the set of protocol constants active at a given height.
//! Parameter changes activate at configured heights and apply from that height
//! on, so every node derives identical parameters for identical heights.

use anyhow::Context as _;

use crate::validator::BlockNumber;

/// Rounds above this bound are treated as malformed input. Far beyond any
/// plausible round count, and low enough that the timeout-penalty arithmetic
/// cannot overflow.
pub const MAX_ROUND: u64 = 100_000;

/// Protocol parameters active over a range of heights. All durations are in
/// milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Milestone {
    /// Target spacing between consecutive blocks.
    pub block_time: u64,
    /// Base timeout of a single consensus stage at round 0.
    pub stage_timeout: u64,
    /// Per-round increase of the stage timeout.
    pub stage_timeout_increase: u64,
    /// Grace period granted to the proposer for assembling a block.
    pub block_prepare_time: u64,
    /// Size of the active validator committee.
    pub active_validators: usize,
    /// Number of heights between committee snapshot rotations.
    pub epoch_length: u64,
}

impl Default for Milestone {
    fn default() -> Self {
        Self {
            block_time: 8000,
            stage_timeout: 1000,
            stage_timeout_increase: 2000,
            block_prepare_time: 4000,
            active_validators: 53,
            epoch_length: 53,
        }
    }
}

impl Milestone {
    /// Timeout of a consensus stage at the given round. Escalates linearly so
    /// that later rounds wait longer for straggling validators.
    pub fn stage_timeout_for(&self, round: u64) -> u64 {
        self.stage_timeout + round * self.stage_timeout_increase
    }
}

/// An ordered list of milestone activations. The first entry must activate at
/// height 0 so that every height has parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MilestoneSchedule(Vec<(BlockNumber, Milestone)>);

impl MilestoneSchedule {
    /// Creates a schedule from `(activation height, milestone)` pairs.
    pub fn new(
        activations: impl IntoIterator<Item = (BlockNumber, Milestone)>,
    ) -> anyhow::Result<Self> {
        let activations: Vec<_> = activations.into_iter().collect();
        let first = activations.first().context("schedule cannot be empty")?;
        anyhow::ensure!(
            first.0 == BlockNumber(0),
            "first milestone must activate at height 0"
        );
        anyhow::ensure!(
            activations.windows(2).all(|w| w[0].0 < w[1].0),
            "milestone activations must be strictly increasing"
        );
        for (_, milestone) in &activations {
            anyhow::ensure!(
                milestone.active_validators > 0,
                "milestone must allow at least one validator"
            );
            anyhow::ensure!(milestone.epoch_length > 0, "epoch length must be positive");
        }
        Ok(Self(activations))
    }

    /// A schedule with a single milestone active from genesis.
    pub fn constant(milestone: Milestone) -> Self {
        Self(vec![(BlockNumber(0), milestone)])
    }

    /// The milestone active at the given height.
    pub fn milestone(&self, number: BlockNumber) -> &Milestone {
        let idx = self
            .0
            .partition_point(|(activation, _)| *activation <= number);
        // idx >= 1 since the first activation is height 0.
        &self.0[idx - 1].1
    }
}
