//! Block structure and the on-disk block envelope
//!
//! A block's identity is the SHA-256 of its canonical JSON encoding:
//! `{"header":{parent,number,nonce,time,miner},"payload":[signed txs]}`.
//! The chain log stores one `BlockFs` envelope per line, pairing a block
//! with its hash so replays never re-derive identities.

use serde::{Deserialize, Serialize};

use crate::crypto::{sha256, Address, Hash};
use crate::validation::SignedTx;

/// Block header containing all consensus metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the previous block; zero for block number 0
    pub parent: Hash,
    /// Height of this block in the chain
    pub number: u64,
    /// PoW witness found by the miner
    pub nonce: u64,
    /// Seconds since the Unix epoch, fixed when mining starts
    pub time: u64,
    /// Account credited with the block reward
    pub miner: Address,
}

impl BlockHeader {
    pub fn new(parent: Hash, number: u64, nonce: u64, time: u64, miner: Address) -> Self {
        Self {
            parent,
            number,
            nonce,
            time,
            miner,
        }
    }
}

/// A complete block: header plus the ordered transaction payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(rename = "payload")]
    pub txs: Vec<SignedTx>,
}

impl Block {
    pub fn new(parent: Hash, number: u64, nonce: u64, time: u64, miner: Address, txs: Vec<SignedTx>) -> Self {
        Self {
            header: BlockHeader::new(parent, number, nonce, time, miner),
            txs,
        }
    }

    /// Canonical JSON encoding
    pub fn encode(&self) -> Vec<u8> {
        // plain structs all the way down, serialization cannot fail
        serde_json::to_vec(self).expect("block encoding")
    }

    /// SHA-256 of the canonical encoding
    pub fn hash(&self) -> Hash {
        sha256(&self.encode())
    }
}

/// Persistence envelope: one per line in the chain log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFs {
    #[serde(rename = "hash")]
    pub key: Hash,
    #[serde(rename = "block")]
    pub value: Block,
}

impl BlockFs {
    pub fn new(key: Hash, value: Block) -> Self {
        Self { key, value }
    }
}
