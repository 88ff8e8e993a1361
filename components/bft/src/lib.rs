//! The consensus component. Drives the height/round lifecycle that decides,
//! round by round, which block becomes canonical, and gates every candidate
//! block through the verification pipeline before it can affect chain state.

use anyhow::Context as _;
use corten_consensus_roles::validator;
use tokio::sync::{mpsc, watch};

pub use crate::{
    config::Config,
    processor::{minimal_timestamp, BlockProcessor, BlockProcessorResult, MalformedBlockError},
    selector::ProposerSelector,
    validator_set::{ValidatorSetError, ValidatorSetService},
};

mod config;
mod consensus;
mod metrics;
mod processor;
mod selector;
pub mod testonly;
mod validator_set;

/// A message received from the network layer.
#[derive(Clone, Debug)]
pub struct InputMessage {
    /// The signed consensus message. The signature is verified by the state
    /// machine before the message is acted upon.
    pub message: validator::Signed<validator::ConsensusMsg>,
}

/// A message for the network layer to broadcast to all validators.
#[derive(Clone, Debug)]
pub struct OutputMessage {
    /// The signed consensus message to broadcast.
    pub message: validator::Signed<validator::ConsensusMsg>,
}

/// Creates the inbound channel pair connecting the network layer to the
/// consensus component.
pub fn create_input_channel() -> (
    mpsc::UnboundedSender<InputMessage>,
    mpsc::UnboundedReceiver<InputMessage>,
) {
    mpsc::unbounded_channel()
}

impl Config {
    /// Starts the consensus component. Processes inbound messages and round
    /// timeouts one at a time, publishing outbound messages through
    /// `outbound` and read-only state snapshots through `state`.
    ///
    /// Returns when the inbound channel closes, or with an error on the first
    /// unrecoverable failure.
    pub async fn run(
        self,
        outbound: mpsc::UnboundedSender<OutputMessage>,
        inbound: mpsc::UnboundedReceiver<InputMessage>,
        state: watch::Sender<validator::ConsensusState>,
    ) -> anyhow::Result<()> {
        let machine = consensus::StateMachine::start(self, outbound, inbound, state)
            .await
            .context("StateMachine::start()")?;
        machine.run().await
    }
}
