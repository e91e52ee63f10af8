//! TALLY Ledger Core Library
//!
//! An account-based blockchain: a totally ordered chain of blocks carrying
//! signed value transfers, agreed across peers via proof-of-work mining
//! and longest-chain synchronization.

pub mod consensus;
pub mod crypto;
pub mod mining;
pub mod node;
pub mod p2p;
pub mod rpc;
pub mod storage;
pub mod validation;
pub mod wallet;

/// Protocol constants
pub mod constants {
    /// Tokens credited to the miner of every block
    pub const BLOCK_REWARD: u64 = 100;

    /// Leading zero hex nibbles a block hash must carry (24 zero bits)
    pub const MINING_DIFFICULTY: u32 = 6;

    /// Seconds between mining attempts on a non-empty mempool
    pub const MINING_INTERVAL_SECS: u64 = 10;

    /// Seconds between peer sync rounds
    pub const SYNC_INTERVAL_SECS: u64 = 45;

    /// Default HTTP listen address
    pub const DEFAULT_IP: &str = "127.0.0.1";

    /// Default HTTP listen port
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
}
