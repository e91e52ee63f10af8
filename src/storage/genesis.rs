//! Genesis balance assignment
//!
//! The genesis file seeds account balances before any block is applied.
//! Extra fields (timestamp, chain id) are tolerated and ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::crypto::Address;
use crate::storage::StateError;

/// Shipped genesis for first boot: one funded demo account
pub const DEFAULT_GENESIS_JSON: &str = r#"
{
    "genesis_time": "2025-11-03T09:00:00.000000000Z",
    "chain_id": "tally-ledger",
    "balances": {
        "0xb61e2b65e6066b0575edd91f992b8ee8dbd96481": 1000000
    }
}"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genesis {
    pub balances: HashMap<Address, u64>,
}

impl Genesis {
    pub fn new(balances: HashMap<Address, u64>) -> Self {
        Self { balances }
    }
}

/// Load and parse the genesis file
pub fn load_genesis(path: &Path) -> Result<Genesis, StateError> {
    let content = fs::read(path)?;
    let genesis = serde_json::from_slice(&content)?;
    Ok(genesis)
}
