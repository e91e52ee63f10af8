//! Proof-of-work search
//!
//! The miner draws random nonces and re-hashes the candidate block until
//! its hash meets the difficulty target or the stop signal is raised. The
//! stop flag is checked every iteration, so cancellation lands within one
//! hash attempt.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::consensus::{meets_difficulty, Block};
use crate::constants::MINING_DIFFICULTY;
use crate::crypto::{Address, Hash};
use crate::validation::{unix_timestamp, SignedTx};

/// Attempts between progress log lines
const PROGRESS_INTERVAL: u64 = 100_000;

/// Mining errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MineError {
    #[error("mining cancelled")]
    Cancelled,
}

/// A block candidate awaiting a PoW witness
#[derive(Debug, Clone)]
pub struct PendingBlock {
    pub parent: Hash,
    pub number: u64,
    pub miner: Address,
    pub txs: Vec<SignedTx>,
}

impl PendingBlock {
    pub fn new(parent: Hash, number: u64, miner: Address, txs: Vec<SignedTx>) -> Self {
        Self {
            parent,
            number,
            miner,
            txs,
        }
    }
}

/// Cancellable PoW engine. Cloning shares the stop signal, so any clone
/// can preempt a search running on another thread.
#[derive(Debug, Clone)]
pub struct Miner {
    difficulty: u32,
    stop_signal: Arc<AtomicBool>,
}

impl Default for Miner {
    fn default() -> Self {
        Self::new()
    }
}

impl Miner {
    /// A miner at the default network difficulty
    pub fn new() -> Self {
        Self::with_difficulty(MINING_DIFFICULTY)
    }

    pub fn with_difficulty(difficulty: u32) -> Self {
        Self {
            difficulty,
            stop_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Abort an in-flight search
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Clear the stop signal before a new search
    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Search for a nonce that makes the block hash meet the difficulty.
    /// The timestamp is fixed once at the start; nonces come from a
    /// pseudorandom source seeded per call. Blocking; run it on a
    /// dedicated thread.
    pub fn mine(&self, pending: PendingBlock) -> Result<Block, MineError> {
        let mut rng = StdRng::from_entropy();
        let mut block = Block::new(
            pending.parent,
            pending.number,
            0,
            unix_timestamp(),
            pending.miner,
            pending.txs,
        );

        let mut attempts = 0u64;
        loop {
            if self.is_stopped() {
                info!(number = block.header.number, attempts, "mining cancelled");
                return Err(MineError::Cancelled);
            }

            block.header.nonce = rng.gen();
            let hash = block.hash();

            if meets_difficulty(&hash, self.difficulty) {
                info!(
                    number = block.header.number,
                    nonce = block.header.nonce,
                    attempts,
                    hash = %hash,
                    "mined block"
                );
                return Ok(block);
            }

            attempts += 1;
            if attempts % PROGRESS_INTERVAL == 0 {
                debug!(number = block.header.number, attempts, "still mining");
            }
        }
    }
}
