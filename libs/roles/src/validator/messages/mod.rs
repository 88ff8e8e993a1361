//! Messages exchanged and persisted by the consensus protocol.

mod block;
mod committee;
mod consensus;
mod msg;
mod state;
mod transaction;

pub use self::{block::*, committee::*, consensus::*, msg::*, state::*, transaction::*};
