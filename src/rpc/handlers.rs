//! HTTP handler implementations

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::crypto::{Address, Hash};
use crate::node::Node;
use crate::p2p::{AddPeerResponse, PeerNode, StatusResponse, SyncResponse};
use crate::storage;
use crate::validation::Tx;
use crate::wallet;

/// Uniform error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: String) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: message }),
    )
}

fn internal_error(message: String) -> HandlerError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
}

/// `GET /balances/list`
#[derive(Debug, Serialize)]
pub struct BalancesResponse {
    pub hash: Hash,
    pub balances: HashMap<Address, u64>,
}

pub async fn list_balances(State(node): State<Arc<Node>>) -> Json<BalancesResponse> {
    let state = node.state();
    Json(BalancesResponse {
        hash: state.latest_block_hash(),
        balances: state.balances().clone(),
    })
}

/// `GET /blocks/list?fromBlock=N` and `GET /node/sync?fromBlock=N`
#[derive(Debug, Deserialize)]
pub struct BlocksQuery {
    /// Blocks strictly after this number; absent means the whole chain
    #[serde(rename = "fromBlock")]
    pub from_block: Option<u64>,
}

pub async fn list_blocks(
    State(node): State<Arc<Node>>,
    Query(query): Query<BlocksQuery>,
) -> Result<Json<SyncResponse>, HandlerError> {
    let after = query.from_block.map(|n| n + 1).unwrap_or(0);
    let data_dir = node.state().data_dir().to_path_buf();

    let blocks =
        storage::blocks_after(&data_dir, after).map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(SyncResponse { blocks }))
}

/// `GET /node/status`
pub async fn node_status(State(node): State<Arc<Node>>) -> Json<StatusResponse> {
    let (block_hash, block_number) = {
        let state = node.state();
        (
            state.latest_block_hash(),
            state.latest_block().map(|b| b.header.number).unwrap_or(0),
        )
    };

    Json(StatusResponse {
        block_hash,
        block_number,
        peers_known: node.known_peers(),
        pending_txs: node.pending_txs(),
    })
}

/// `GET /node/peer?ip=&port=&account=`
#[derive(Debug, Deserialize)]
pub struct AddPeerQuery {
    pub ip: String,
    pub port: u16,
    pub account: Address,
}

pub async fn add_peer(
    State(node): State<Arc<Node>>,
    Query(query): Query<AddPeerQuery>,
) -> Json<AddPeerResponse> {
    let mut peer = PeerNode::new(&query.ip, query.port, false, query.account, true);
    peer.connected = true;
    node.add_peer(peer);

    Json(AddPeerResponse::ok())
}

/// `POST /tx/add`
#[derive(Debug, Deserialize)]
pub struct TxAddRequest {
    pub from: Address,
    pub to: Address,
    pub value: u64,
    /// Absent means the sender's next account nonce
    pub nonce: Option<u64>,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct TxAddResponse {
    pub success: bool,
    pub hash: Hash,
}

pub async fn add_tx(
    State(node): State<Arc<Node>>,
    Json(request): Json<TxAddRequest>,
) -> Result<Json<TxAddResponse>, HandlerError> {
    let (data_dir, nonce) = {
        let state = node.state();
        let nonce = request
            .nonce
            .unwrap_or_else(|| state.next_account_nonce(&request.from));
        (state.data_dir().to_path_buf(), nonce)
    };

    let tx = Tx::new(request.from, request.to, request.value, nonce, &request.data);
    let signed = wallet::sign_tx_with_keystore_account(&data_dir, tx)
        .map_err(|e| bad_request(e.to_string()))?;
    let hash = signed.hash();

    node.add_pending_tx(signed, node.info())
        .map_err(|e| bad_request(e.to_string()))?;

    Ok(Json(TxAddResponse {
        success: true,
        hash,
    }))
}
