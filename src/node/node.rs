//! Node orchestrator
//!
//! Owns the chain state, the mempool and the peer directory, and
//! interleaves mining with peer sync. Mining runs on a blocking thread
//! with a shared stop signal; a block arriving from a peer stops the
//! search and the abandoned transactions stay in the mempool for the next
//! round.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::consensus::Block;
use crate::constants::{MINING_DIFFICULTY, MINING_INTERVAL_SECS, SYNC_INTERVAL_SECS};
use crate::crypto::Address;
use crate::mining::{MineError, Miner, PendingBlock};
use crate::node::sync_round;
use crate::p2p::PeerNode;
use crate::storage::{State, StateError};
use crate::validation::SignedTx;

/// Capacity of the synced-block delivery channel
const SYNCED_BLOCKS_CHANNEL_SIZE: usize = 16;

/// Node-level errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("tx from {0} is forged")]
    ForgedTx(Address),
    #[error("reward txs cannot be submitted")]
    RewardNotAllowed,
    #[error("stale nonce {got} for {from}: last applied nonce is {last}")]
    StaleNonce { from: Address, last: u64, got: u64 },
    #[error("node is already running")]
    AlreadyRunning,
    #[error(transparent)]
    State(#[from] StateError),
    #[error("peer request failed: {0}")]
    PeerRequest(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Node construction parameters. Difficulty and tick intervals default to
/// the network constants; lowering them is a regtest-style setup.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub ip: String,
    pub port: u16,
    /// Account credited with block rewards
    pub miner: Address,
    pub bootstrap: Option<PeerNode>,
    pub difficulty: u32,
    pub mining_interval: Duration,
    pub sync_interval: Duration,
}

impl NodeConfig {
    pub fn new(data_dir: &Path, ip: &str, port: u16, miner: Address) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            ip: ip.to_string(),
            port,
            miner,
            bootstrap: None,
            difficulty: MINING_DIFFICULTY,
            mining_interval: Duration::from_secs(MINING_INTERVAL_SECS),
            sync_interval: Duration::from_secs(SYNC_INTERVAL_SECS),
        }
    }

    pub fn with_bootstrap(mut self, bootstrap: PeerNode) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }
}

/// The single long-lived object of the process
pub struct Node {
    info: PeerNode,
    mining_interval: Duration,
    sync_interval: Duration,
    state: Mutex<State>,
    /// Mempool, keyed by tx hash hex
    pending_txs: Mutex<HashMap<String, SignedTx>>,
    /// Recently mined or relayed txs, used to deduplicate gossip
    archived_txs: Mutex<HashMap<String, SignedTx>>,
    known_peers: Mutex<HashMap<String, PeerNode>>,
    pow: Miner,
    is_mining: AtomicBool,
    synced_blocks_tx: mpsc::Sender<Block>,
    synced_blocks_rx: Mutex<Option<mpsc::Receiver<Block>>>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        let state = State::with_difficulty(&config.data_dir, config.difficulty)?;

        let mut info = PeerNode::new(&config.ip, config.port, false, config.miner, true);
        info.connected = true;

        let mut known_peers = HashMap::new();
        known_peers.insert(info.tcp_address(), info.clone());
        if let Some(bootstrap) = config.bootstrap {
            known_peers.insert(bootstrap.tcp_address(), bootstrap);
        }

        let (synced_blocks_tx, synced_blocks_rx) = mpsc::channel(SYNCED_BLOCKS_CHANNEL_SIZE);

        Ok(Arc::new(Self {
            info,
            mining_interval: config.mining_interval,
            sync_interval: config.sync_interval,
            state: Mutex::new(state),
            pending_txs: Mutex::new(HashMap::new()),
            archived_txs: Mutex::new(HashMap::new()),
            known_peers: Mutex::new(known_peers),
            pow: Miner::with_difficulty(config.difficulty),
            is_mining: AtomicBool::new(false),
            synced_blocks_tx,
            synced_blocks_rx: Mutex::new(Some(synced_blocks_rx)),
        }))
    }

    /// This node's own peer record; its account is the mining beneficiary
    pub fn info(&self) -> &PeerNode {
        &self.info
    }

    /// Lock the authoritative state
    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn is_mining(&self) -> bool {
        self.is_mining.load(Ordering::SeqCst)
    }

    /// Snapshot of the mempool, ordered so that same-second txs from one
    /// sender still assemble in nonce order
    pub fn pending_txs(&self) -> Vec<SignedTx> {
        let mut txs: Vec<SignedTx> = self.pending_txs.lock().unwrap().values().cloned().collect();
        txs.sort_by_key(|tx| (tx.time, tx.from, tx.nonce));
        txs
    }

    pub fn pending_tx_count(&self) -> usize {
        self.pending_txs.lock().unwrap().len()
    }

    /// Snapshot of the peer directory
    pub fn known_peers(&self) -> HashMap<String, PeerNode> {
        self.known_peers.lock().unwrap().clone()
    }

    pub fn add_peer(&self, peer: PeerNode) {
        let mut peers = self.known_peers.lock().unwrap();
        let addr = peer.tcp_address();
        if !peers.contains_key(&addr) {
            info!(peer = %addr, "found new peer");
            peers.insert(addr, peer);
        }
    }

    pub fn has_peer(&self, tcp_address: &str) -> bool {
        self.known_peers.lock().unwrap().contains_key(tcp_address)
    }

    /// Flip a peer's `connected` flag; unreachable peers are kept
    pub fn mark_peer_connected(&self, tcp_address: &str, connected: bool) {
        if let Some(peer) = self.known_peers.lock().unwrap().get_mut(tcp_address) {
            peer.connected = connected;
        }
    }

    /// Test hook: forget every archived tx, as if the node restarted its
    /// gossip dedup memory
    pub fn clear_archived_txs(&self) {
        self.archived_txs.lock().unwrap().clear();
    }

    /// Admit a signed tx to the mempool.
    ///
    /// Duplicates of anything pending or archived are dropped silently.
    /// Reward-marked txs, forged signatures and nonces at or below the
    /// sender's last applied nonce are rejected.
    pub fn add_pending_tx(&self, tx: SignedTx, from_peer: &PeerNode) -> Result<(), NodeError> {
        let hash_hex = tx.hash().to_hex();

        if self.pending_txs.lock().unwrap().contains_key(&hash_hex)
            || self.archived_txs.lock().unwrap().contains_key(&hash_hex)
        {
            debug!(tx = %hash_hex, "dropping already known tx");
            return Ok(());
        }

        if tx.is_reward() {
            return Err(NodeError::RewardNotAllowed);
        }

        if !tx.is_authentic().unwrap_or(false) {
            return Err(NodeError::ForgedTx(tx.from));
        }

        let last_nonce = self.state().account_nonce(&tx.from);
        if tx.nonce <= last_nonce {
            return Err(NodeError::StaleNonce {
                from: tx.from,
                last: last_nonce,
                got: tx.nonce,
            });
        }

        info!(tx = %hash_hex, from_peer = %from_peer.tcp_address(), "added tx to mempool");
        self.pending_txs.lock().unwrap().insert(hash_hex, tx);

        Ok(())
    }

    /// Deliver a block fetched from a peer to the orchestration loop
    pub async fn notify_synced_block(&self, block: Block) {
        if self.synced_blocks_tx.send(block).await.is_err() {
            warn!("synced block dropped: node is not running");
        }
    }

    /// Block until the shutdown signal fires. Spawns the HTTP surface and
    /// the sync loop, and drives the mining tick and synced-block
    /// preemption.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), NodeError> {
        let mut synced_rx = self
            .synced_blocks_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(NodeError::AlreadyRunning)?;

        info!(
            addr = %self.info.tcp_address(),
            miner = %self.info.account,
            "starting node"
        );

        let mut http = tokio::spawn(crate::rpc::serve(Arc::clone(&self), shutdown.clone()));

        let sync_node = Arc::clone(&self);
        let mut sync_shutdown = shutdown.clone();
        let sync_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync_node.sync_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = sync_round(&sync_node).await {
                            warn!(error = %e, "sync round failed");
                        }
                    }
                    _ = sync_shutdown.changed() => break,
                }
            }
        });

        let mut mine_ticker = tokio::time::interval(self.mining_interval);
        mine_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Delivered blocks take priority over starting new local work
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = &mut http => {
                    // The surface died on its own; the node cannot serve
                    warn!("http surface exited early");
                    self.pow.stop();
                    let _ = sync_task.await;
                    return result
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                }
                Some(block) = synced_rx.recv() => self.handle_synced_block(block),
                _ = mine_ticker.tick() => Arc::clone(&self).maybe_start_mining(),
            }
        }

        self.pow.stop();
        let _ = sync_task.await;
        http.await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

        info!("node stopped");
        Ok(())
    }

    /// Kick off a mining round if none is active and the mempool has work
    fn maybe_start_mining(self: Arc<Self>) {
        if self.is_mining.load(Ordering::SeqCst) {
            return;
        }

        let txs = self.pending_txs();
        if txs.is_empty() {
            return;
        }

        let (parent, number) = {
            let state = self.state();
            (state.latest_block_hash(), state.next_block_number())
        };
        let pending = PendingBlock::new(parent, number, self.info.account, txs);

        info!(number, tx_count = pending.txs.len(), "starting mining");
        self.is_mining.store(true, Ordering::SeqCst);
        self.pow.reset();

        let node = self;
        tokio::spawn(async move {
            let pow = node.pow.clone();
            let result = tokio::task::spawn_blocking(move || pow.mine(pending)).await;

            match result {
                Ok(Ok(block)) => node.commit_mined_block(block),
                Ok(Err(MineError::Cancelled)) => {
                    info!("mining preempted; mempool kept for the next round")
                }
                Err(e) => error!(error = %e, "mining task panicked"),
            }

            node.is_mining.store(false, Ordering::SeqCst);
        });
    }

    /// Apply a locally mined block and retire its txs from the mempool
    fn commit_mined_block(&self, block: Block) {
        let result = self.state().add_block(&block);
        match result {
            Ok(hash) => {
                info!(number = block.header.number, hash = %hash, "mined block applied");
                self.remove_mined_txs(&block);
            }
            // A synced block may have won this height in the meantime
            Err(e) => warn!(error = %e, "mined block rejected; mempool kept"),
        }
    }

    /// Preempt any in-flight mining, apply the block if it is still new,
    /// and drop its txs from the mempool
    fn handle_synced_block(&self, block: Block) {
        if self.is_mining.load(Ordering::SeqCst) {
            info!(
                number = block.header.number,
                "peer block arrived; stopping local mining"
            );
            self.pow.stop();
        }

        let in_chain = {
            let mut state = self.state();
            match state.add_block(&block) {
                Ok(hash) => {
                    info!(number = block.header.number, hash = %hash, "synced block applied");
                    true
                }
                Err(e) => {
                    // Usually the sync loop applied it before delivery; a
                    // block at an already-filled height is not an error here
                    let already_filled = block.header.number < state.next_block_number();
                    debug!(error = %e, already_filled, "synced block not applied");
                    already_filled
                }
            }
        };

        if in_chain {
            self.remove_mined_txs(&block);
        }
    }

    /// Move every tx included in `block` from pending to archived
    fn remove_mined_txs(&self, block: &Block) {
        let mut pending = self.pending_txs.lock().unwrap();
        let mut archived = self.archived_txs.lock().unwrap();

        for tx in &block.txs {
            let hash_hex = tx.hash().to_hex();
            if let Some(tx) = pending.remove(&hash_hex) {
                debug!(tx = %hash_hex, "archiving mined tx");
                archived.insert(hash_hex, tx);
            }
        }
    }
}
