//! Mining module - cancellable proof-of-work search

mod miner;

pub use miner::*;
