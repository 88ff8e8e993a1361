//! Configuration of the consensus component.
use std::sync::Arc;

use corten_consensus_engine::EngineManager;
use corten_consensus_roles::validator;

/// Configuration of the consensus component.
#[derive(Debug)]
pub struct Config {
    /// Secret keys of the validators hosted by this node. May be empty, in
    /// which case the node follows consensus without voting. Every key must
    /// correspond to an on-chain validator registration.
    pub secret_keys: Vec<validator::SecretKey>,
    /// Height-indexed protocol parameters.
    pub milestones: validator::MilestoneSchedule,
    /// Handle to the chain, collator and storage contracts.
    pub engine: Arc<EngineManager>,
}

impl Config {
    /// The milestone active at the given height.
    pub fn milestone(&self, number: validator::BlockNumber) -> &validator::Milestone {
        self.milestones.milestone(number)
    }
}
