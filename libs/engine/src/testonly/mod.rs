//! Test-only implementations of the engine contracts.
pub mod in_memory;

use std::sync::Arc;

use corten_consensus_roles::validator;

use crate::EngineManager;

/// An in-memory engine triple plus handles to poke at it from tests.
#[derive(Clone, Debug)]
pub struct TestEngine {
    /// The chain/execution stub.
    pub chain: in_memory::Chain,
    /// The collator stub.
    pub collator: in_memory::Collator,
    /// The consensus storage stub.
    pub storage: in_memory::Storage,
}

impl TestEngine {
    /// A fresh engine with the given genesis block and validator snapshot.
    pub fn new(
        genesis: validator::Block,
        registrations: Vec<validator::WeightedValidator>,
    ) -> Self {
        Self {
            chain: in_memory::Chain::new(genesis, registrations),
            collator: in_memory::Collator::default(),
            storage: in_memory::Storage::default(),
        }
    }

    /// An [`EngineManager`] over clones of the stubs. The test keeps its own
    /// handles for inspection.
    pub fn manager(&self) -> Arc<EngineManager> {
        Arc::new(EngineManager::new(
            Box::new(self.chain.clone()),
            Box::new(self.collator.clone()),
            Box::new(self.storage.clone()),
        ))
    }
}
