//! Test-only utilities for exercising the consensus component.

use corten_consensus_roles::validator;

/// A milestone schedule with timeouts short enough for tests. The escalation
/// shape matches production parameters, scaled down.
pub fn fast_milestones(active_validators: usize) -> validator::MilestoneSchedule {
    validator::MilestoneSchedule::constant(validator::Milestone {
        block_time: 100,
        stage_timeout: 50,
        stage_timeout_increase: 100,
        block_prepare_time: 50,
        active_validators,
        epoch_length: 1000,
    })
}
