//! Storage module - data directory, genesis and the replayed chain state

mod fs;
mod genesis;
mod state;

pub use fs::*;
pub use genesis::*;
pub use state::*;
