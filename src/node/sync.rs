//! Peer synchronization
//!
//! Every round polls each known peer's status. A peer with a longer chain
//! gets its missing blocks fetched, applied, and delivered to the
//! orchestration loop so an in-flight mining attempt is preempted. The
//! peer's own peer directory and pending txs are merged in afterwards.

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::node::{Node, NodeError};
use crate::p2p::{AddPeerResponse, PeerNode, StatusResponse, SyncResponse};

const PEER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One pass over every known peer
pub async fn sync_round(node: &Arc<Node>) -> Result<(), NodeError> {
    let client = Client::builder().timeout(PEER_REQUEST_TIMEOUT).build()?;

    for peer in node.known_peers().into_values() {
        if peer.tcp_address() == node.info().tcp_address() {
            continue;
        }

        debug!(peer = %peer.tcp_address(), "querying peer status");
        let status = match fetch_peer_status(&client, &peer).await {
            Ok(status) => status,
            Err(e) => {
                warn!(peer = %peer.tcp_address(), error = %e, "peer unreachable");
                node.mark_peer_connected(&peer.tcp_address(), false);
                continue;
            }
        };

        if !peer.connected {
            introduce_self(&client, node, &peer).await;
        }
        node.mark_peer_connected(&peer.tcp_address(), true);

        if let Err(e) = sync_blocks(&client, node, &peer, &status).await {
            warn!(peer = %peer.tcp_address(), error = %e, "block sync failed");
        }

        sync_known_peers(node, &status);
        sync_pending_txs(node, &peer, status.pending_txs);
    }

    Ok(())
}

async fn fetch_peer_status(client: &Client, peer: &PeerNode) -> Result<StatusResponse, reqwest::Error> {
    client
        .get(format!("{}/node/status", peer.api_url()))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}

/// Register this node in the peer's directory so it polls us back
async fn introduce_self(client: &Client, node: &Arc<Node>, peer: &PeerNode) {
    let info = node.info();
    let url = format!(
        "{}/node/peer?ip={}&port={}&account={}",
        peer.api_url(),
        info.ip,
        info.port,
        info.account
    );

    match client.get(url).send().await {
        Ok(response) => match response.json::<AddPeerResponse>().await {
            Ok(ack) if ack.success => {
                debug!(peer = %peer.tcp_address(), "introduced self to peer")
            }
            Ok(ack) => warn!(peer = %peer.tcp_address(), error = %ack.error, "peer refused us"),
            Err(e) => warn!(peer = %peer.tcp_address(), error = %e, "bad add-peer response"),
        },
        Err(e) => warn!(peer = %peer.tcp_address(), error = %e, "could not introduce self"),
    }
}

/// Fetch and apply blocks this node is missing, delivering each applied
/// block to the orchestration loop
async fn sync_blocks(
    client: &Client,
    node: &Arc<Node>,
    peer: &PeerNode,
    status: &StatusResponse,
) -> Result<(), NodeError> {
    let (local_next, from_block) = {
        let state = node.state();
        let from = state.latest_block().map(|b| b.header.number);
        (state.next_block_number(), from)
    };

    let peer_next = if status.block_hash.is_zero() {
        0
    } else {
        status.block_number + 1
    };

    if peer_next <= local_next {
        return Ok(());
    }

    info!(
        peer = %peer.tcp_address(),
        count = peer_next - local_next,
        "found new blocks from peer"
    );

    let url = match from_block {
        Some(number) => format!("{}/node/sync?fromBlock={}", peer.api_url(), number),
        None => format!("{}/node/sync", peer.api_url()),
    };
    let response: SyncResponse = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    for envelope in response.blocks {
        let number = envelope.value.header.number;
        let result = node.state().add_block(&envelope.value);
        match result {
            Ok(_) => node.notify_synced_block(envelope.value).await,
            Err(e) => {
                warn!(peer = %peer.tcp_address(), number, error = %e, "rejected synced block");
                break;
            }
        }
    }

    Ok(())
}

/// Merge the peer's directory into ours; peers are never evicted
fn sync_known_peers(node: &Arc<Node>, status: &StatusResponse) {
    for (address, peer) in &status.peers_known {
        if *address != node.info().tcp_address() && !node.has_peer(address) {
            node.add_peer(peer.clone());
        }
    }
}

/// Run the peer's pending txs through normal mempool admission
fn sync_pending_txs(node: &Arc<Node>, peer: &PeerNode, txs: Vec<crate::validation::SignedTx>) {
    for tx in txs {
        if let Err(e) = node.add_pending_tx(tx, peer) {
            debug!(peer = %peer.tcp_address(), error = %e, "skipped peer tx");
        }
    }
}
