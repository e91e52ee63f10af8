//! Peer records
//!
//! Peers are permanent once known: a failed status exchange clears the
//! `connected` flag but never evicts the record.

use serde::{Deserialize, Serialize};

use crate::crypto::Address;

/// Another node in the network, identified by host and port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNode {
    pub ip: String,
    pub port: u16,
    pub is_bootstrap: bool,
    /// The peer's miner account
    pub account: Address,
    pub is_active: bool,
    /// Local bookkeeping only; set after a successful status exchange
    #[serde(skip)]
    pub connected: bool,
}

impl PeerNode {
    pub fn new(ip: &str, port: u16, is_bootstrap: bool, account: Address, is_active: bool) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            is_bootstrap,
            account,
            is_active,
            connected: false,
        }
    }

    /// The map key and dial target for this peer
    pub fn tcp_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Base URL for this peer's HTTP surface
    pub fn api_url(&self) -> String {
        format!("http://{}", self.tcp_address())
    }
}
