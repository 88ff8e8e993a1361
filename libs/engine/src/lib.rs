//! Contracts between the consensus component and its external collaborators:
//! the chain/execution layer, the transaction collator and the durable
//! consensus storage. Consensus consumes these interfaces; it never reaches
//! around them into the underlying services.

mod interface;
mod manager;
mod metrics;
pub mod testonly;
#[cfg(test)]
mod tests;

pub use crate::{
    interface::{ChainEvent, ChainInterface, Collator, CommitKey, ConsensusStorage},
    manager::EngineManager,
};
