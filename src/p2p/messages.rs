//! Wire shapes exchanged between peers over the HTTP surface

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::consensus::BlockFs;
use crate::crypto::Hash;
use crate::p2p::PeerNode;
use crate::validation::SignedTx;

/// Answer to `GET /node/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Latest block hash; zero when the chain is empty
    pub block_hash: Hash,
    /// Latest block number; 0 both for an empty chain and at height 0,
    /// disambiguated by `block_hash`
    pub block_number: u64,
    pub peers_known: HashMap<String, PeerNode>,
    pub pending_txs: Vec<SignedTx>,
}

/// Answer to `GET /node/sync` and `GET /blocks/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub blocks: Vec<BlockFs>,
}

/// Answer to `GET /node/peer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPeerResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl AddPeerResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: String::new(),
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            success: false,
            error,
        }
    }
}
