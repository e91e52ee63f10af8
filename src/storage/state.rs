//! Authoritative chain state
//!
//! Balances and per-account nonces are only ever mutated by applying
//! blocks. `add_block` validates against a copied snapshot and commits the
//! copy back on success, so a rejected block never leaves a trace. Opening
//! the state replays the whole chain log; replaying the same log always
//! reconstructs identical maps.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::consensus::{meets_difficulty, Block, BlockFs};
use crate::constants::{BLOCK_REWARD, MINING_DIFFICULTY};
use crate::crypto::{Address, Hash, SignatureError};
use crate::storage::{self, load_genesis};
use crate::validation::SignedTx;

/// Errors from state construction and block application
#[derive(Debug, Error)]
pub enum StateError {
    #[error("tx from {0} is forged")]
    ForgedTx(Address),
    #[error("wrong nonce for {from}: next must be {expected}, got {got}")]
    WrongNonce {
        from: Address,
        expected: u64,
        got: u64,
    },
    #[error("insufficient funds: {from} has {balance}, tx costs {cost}")]
    InsufficientFunds {
        from: Address,
        balance: u64,
        cost: u64,
    },
    #[error("next block parent must be {expected}, got {got}")]
    BadParent { expected: Hash, got: Hash },
    #[error("next block number must be {expected}, got {got}")]
    BadNumber { expected: u64, got: u64 },
    #[error("block hash {0} does not meet the difficulty target")]
    InvalidPow(Hash),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// The mutable portion of the state, cloned for validation and committed
/// back only when a whole block applies cleanly.
#[derive(Debug, Clone)]
struct Snapshot {
    balances: HashMap<Address, u64>,
    account2nonce: HashMap<Address, u64>,
    latest_block: Option<Block>,
    latest_block_hash: Hash,
}

/// Single source of truth for balances, nonces and the chain tip
#[derive(Debug)]
pub struct State {
    data_dir: PathBuf,
    db_file: File,
    difficulty: u32,
    balances: HashMap<Address, u64>,
    account2nonce: HashMap<Address, u64>,
    latest_block: Option<Block>,
    latest_block_hash: Hash,
}

impl State {
    /// Open the data directory (initializing it with the default genesis if
    /// absent) and replay the chain log at the default network difficulty.
    pub fn new_from_disk(data_dir: &Path) -> Result<Self, StateError> {
        Self::with_difficulty(data_dir, MINING_DIFFICULTY)
    }

    /// Open with an explicit difficulty. Anything below the default is a
    /// regtest-style configuration.
    pub fn with_difficulty(data_dir: &Path, difficulty: u32) -> Result<Self, StateError> {
        storage::init_data_dir_if_not_exists(
            data_dir,
            storage::DEFAULT_GENESIS_JSON.as_bytes(),
        )?;

        let genesis = load_genesis(&storage::genesis_file_path(data_dir))?;

        let mut state = Self {
            data_dir: data_dir.to_path_buf(),
            db_file: storage::open_blocks_db(data_dir)?,
            difficulty,
            balances: genesis.balances,
            account2nonce: HashMap::new(),
            latest_block: None,
            latest_block_hash: Hash::zero(),
        };

        state.replay()?;

        Ok(state)
    }

    /// Stream the chain log line by line, applying every block. An empty
    /// line terminates iteration. Any error aborts the open.
    fn replay(&mut self) -> Result<(), StateError> {
        self.db_file.seek(SeekFrom::Start(0))?;
        let reader = BufReader::new(self.db_file.try_clone()?);

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                break;
            }

            let envelope: BlockFs = serde_json::from_str(&line)?;

            let mut pending = self.snapshot();
            apply_block(&mut pending, &envelope.value, self.difficulty)?;
            self.commit(pending);
        }

        self.db_file.seek(SeekFrom::End(0))?;

        Ok(())
    }

    /// Validate a block against a copied state; on success append it to the
    /// log and commit the copy. A rejected block mutates nothing.
    pub fn add_block(&mut self, block: &Block) -> Result<Hash, StateError> {
        let mut pending = self.snapshot();
        let hash = apply_block(&mut pending, block, self.difficulty)?;

        let envelope = BlockFs::new(hash, block.clone());
        info!(number = block.header.number, hash = %hash, "persisting block");
        storage::append_block_fs(&mut self.db_file, &envelope)?;

        self.commit(pending);

        Ok(hash)
    }

    /// Apply a batch of blocks, stopping at the first error
    pub fn add_blocks(&mut self, blocks: &[Block]) -> Result<(), StateError> {
        for block in blocks {
            self.add_block(block)?;
        }
        Ok(())
    }

    /// Height the next mined block must carry; 0 before any block exists
    pub fn next_block_number(&self) -> u64 {
        match &self.latest_block {
            Some(block) => block.header.number + 1,
            None => 0,
        }
    }

    /// Nonce the next tx from `account` must carry; the first is 1
    pub fn next_account_nonce(&self, account: &Address) -> u64 {
        self.account2nonce.get(account).copied().unwrap_or(0) + 1
    }

    /// Last applied nonce for `account`, 0 if none
    pub fn account_nonce(&self, account: &Address) -> u64 {
        self.account2nonce.get(account).copied().unwrap_or(0)
    }

    pub fn balance(&self, account: &Address) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> &HashMap<Address, u64> {
        &self.balances
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.latest_block.as_ref()
    }

    pub fn latest_block_hash(&self) -> Hash {
        self.latest_block_hash
    }

    pub fn has_blocks(&self) -> bool {
        self.latest_block.is_some()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            balances: self.balances.clone(),
            account2nonce: self.account2nonce.clone(),
            latest_block: self.latest_block.clone(),
            latest_block_hash: self.latest_block_hash,
        }
    }

    fn commit(&mut self, snapshot: Snapshot) {
        self.balances = snapshot.balances;
        self.account2nonce = snapshot.account2nonce;
        self.latest_block = snapshot.latest_block;
        self.latest_block_hash = snapshot.latest_block_hash;
    }
}

/// Validate and apply one block to a snapshot:
/// number linkage, parent linkage, PoW, every tx in time order, reward.
fn apply_block(snapshot: &mut Snapshot, block: &Block, difficulty: u32) -> Result<Hash, StateError> {
    if let Some(latest) = &snapshot.latest_block {
        let expected = latest.header.number + 1;
        if block.header.number != expected {
            return Err(StateError::BadNumber {
                expected,
                got: block.header.number,
            });
        }

        if latest.header.number > 0 && block.header.parent != snapshot.latest_block_hash {
            return Err(StateError::BadParent {
                expected: snapshot.latest_block_hash,
                got: block.header.parent,
            });
        }
    }

    let hash = block.hash();
    if !meets_difficulty(&hash, difficulty) {
        return Err(StateError::InvalidPow(hash));
    }

    // Stable sort: equal timestamps keep submission order
    let mut txs = block.txs.clone();
    txs.sort_by_key(|tx| tx.time);

    for tx in &txs {
        apply_tx(snapshot, tx)?;
    }

    *snapshot.balances.entry(block.header.miner).or_insert(0) += BLOCK_REWARD;

    snapshot.latest_block = Some(block.clone());
    snapshot.latest_block_hash = hash;

    Ok(hash)
}

fn apply_tx(snapshot: &mut Snapshot, tx: &SignedTx) -> Result<(), StateError> {
    if tx.is_reward() {
        *snapshot.balances.entry(tx.to).or_insert(0) += tx.value;
        return Ok(());
    }

    if !tx.is_authentic()? {
        return Err(StateError::ForgedTx(tx.from));
    }

    let expected = snapshot.account2nonce.get(&tx.from).copied().unwrap_or(0) + 1;
    if tx.nonce != expected {
        return Err(StateError::WrongNonce {
            from: tx.from,
            expected,
            got: tx.nonce,
        });
    }

    let balance = snapshot.balances.get(&tx.from).copied().unwrap_or(0);
    if balance < tx.value {
        return Err(StateError::InsufficientFunds {
            from: tx.from,
            balance,
            cost: tx.value,
        });
    }

    *snapshot.balances.entry(tx.from).or_insert(0) -= tx.value;
    *snapshot.balances.entry(tx.to).or_insert(0) += tx.value;
    snapshot.account2nonce.insert(tx.from, tx.nonce);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::storage::Genesis;
    use crate::validation::Tx;

    // Difficulty 0 accepts every hash, so blocks need no mining here
    const TEST_DIFFICULTY: u32 = 0;

    fn open_with_genesis(
        dir: &Path,
        balances: &[(Address, u64)],
    ) -> State {
        let genesis = Genesis::new(balances.iter().cloned().collect());
        storage::init_data_dir_if_not_exists(
            dir,
            &serde_json::to_vec(&genesis).unwrap(),
        )
        .unwrap();
        State::with_difficulty(dir, TEST_DIFFICULTY).unwrap()
    }

    fn signed(tx: Tx, key: &PrivateKey) -> SignedTx {
        let sig = key.sign_digest(&tx.hash()).unwrap();
        SignedTx::new(tx, sig)
    }

    #[test]
    fn test_genesis_seeds_balances() {
        let dir = tempfile::tempdir().unwrap();
        let account = PrivateKey::generate().address();
        let state = open_with_genesis(dir.path(), &[(account, 1_000_000)]);

        assert_eq!(state.balance(&account), 1_000_000);
        assert_eq!(state.next_block_number(), 0);
        assert!(!state.has_blocks());
        assert!(state.latest_block_hash().is_zero());
    }

    #[test]
    fn test_apply_block_transfers_and_rewards() {
        let dir = tempfile::tempdir().unwrap();
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate().address();
        let miner = PrivateKey::generate().address();
        let mut state = open_with_genesis(dir.path(), &[(sender.address(), 1_000)]);

        let tx = signed(Tx::new(sender.address(), recipient, 100, 1, ""), &sender);
        let block = Block::new(Hash::zero(), 0, 0, 1600000000, miner, vec![tx]);

        let hash = state.add_block(&block).unwrap();

        assert_eq!(state.balance(&sender.address()), 900);
        assert_eq!(state.balance(&recipient), 100);
        assert_eq!(state.balance(&miner), BLOCK_REWARD);
        assert_eq!(state.account_nonce(&sender.address()), 1);
        assert_eq!(state.next_block_number(), 1);
        assert_eq!(state.latest_block_hash(), hash);
    }

    #[test]
    fn test_reward_credited_once_regardless_of_tx_count() {
        let dir = tempfile::tempdir().unwrap();
        let sender = PrivateKey::generate();
        let miner = PrivateKey::generate().address();
        let mut state = open_with_genesis(dir.path(), &[(sender.address(), 1_000)]);

        let txs = (1..=3u64)
            .map(|nonce| {
                signed(
                    Tx::new(sender.address(), miner, 10, nonce, ""),
                    &sender,
                )
            })
            .collect();
        let block = Block::new(Hash::zero(), 0, 0, 1600000000, miner, txs);
        state.add_block(&block).unwrap();

        assert_eq!(state.balance(&miner), 30 + BLOCK_REWARD);
    }

    #[test]
    fn test_rejected_block_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate().address();
        let mut state = open_with_genesis(dir.path(), &[(sender.address(), 1_000)]);

        let good = signed(Tx::new(sender.address(), recipient, 100, 1, ""), &sender);
        let bad_nonce = signed(Tx::new(sender.address(), recipient, 100, 5, ""), &sender);
        let block = Block::new(
            Hash::zero(),
            0,
            0,
            1600000000,
            recipient,
            vec![good, bad_nonce],
        );

        let err = state.add_block(&block).unwrap_err();
        assert!(matches!(err, StateError::WrongNonce { got: 5, .. }));

        // First tx in the block must not have leaked through
        assert_eq!(state.balance(&sender.address()), 1_000);
        assert_eq!(state.balance(&recipient), 0);
        assert_eq!(state.account_nonce(&sender.address()), 0);
        assert_eq!(state.next_block_number(), 0);
        assert!(state.latest_block_hash().is_zero());
    }

    #[test]
    fn test_wrong_number_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let miner = PrivateKey::generate().address();
        let mut state = open_with_genesis(dir.path(), &[]);

        let block0 = Block::new(Hash::zero(), 0, 0, 1600000000, miner, vec![]);
        state.add_block(&block0).unwrap();

        let skipped = Block::new(state.latest_block_hash(), 2, 0, 1600000001, miner, vec![]);
        assert!(matches!(
            state.add_block(&skipped),
            Err(StateError::BadNumber {
                expected: 1,
                got: 2
            })
        ));
    }

    #[test]
    fn test_wrong_parent_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let miner = PrivateKey::generate().address();
        let mut state = open_with_genesis(dir.path(), &[]);

        let block0 = Block::new(Hash::zero(), 0, 0, 1600000000, miner, vec![]);
        state.add_block(&block0).unwrap();
        let block1 = Block::new(state.latest_block_hash(), 1, 0, 1600000001, miner, vec![]);
        state.add_block(&block1).unwrap();

        // Parent linkage is enforced from the second block on
        let orphan = Block::new(Hash::zero(), 2, 0, 1600000002, miner, vec![]);
        assert!(matches!(
            state.add_block(&orphan),
            Err(StateError::BadParent { .. })
        ));
    }

    #[test]
    fn test_pow_checked_on_every_block() {
        let dir = tempfile::tempdir().unwrap();
        let miner = PrivateKey::generate().address();

        let genesis = Genesis::new(HashMap::new());
        storage::init_data_dir_if_not_exists(
            dir.path(),
            &serde_json::to_vec(&genesis).unwrap(),
        )
        .unwrap();
        let mut state = State::new_from_disk(dir.path()).unwrap();

        // An unmined block will not begin with six zero nibbles
        let block = Block::new(Hash::zero(), 0, 0, 1600000000, miner, vec![]);
        assert!(matches!(
            state.add_block(&block),
            Err(StateError::InvalidPow(_))
        ));
    }

    #[test]
    fn test_insufficient_funds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate().address();
        let mut state = open_with_genesis(dir.path(), &[(sender.address(), 10)]);

        let tx = signed(Tx::new(sender.address(), recipient, 11, 1, ""), &sender);
        let block = Block::new(Hash::zero(), 0, 0, 1600000000, recipient, vec![tx]);

        assert!(matches!(
            state.add_block(&block),
            Err(StateError::InsufficientFunds { balance: 10, .. })
        ));
    }

    #[test]
    fn test_forged_tx_rejected_in_block() {
        let dir = tempfile::tempdir().unwrap();
        let sender = PrivateKey::generate();
        let attacker = PrivateKey::generate();
        let mut state = open_with_genesis(dir.path(), &[(sender.address(), 1_000)]);

        // Signed by the attacker but claiming to be from the funded account
        let tx = Tx::new(sender.address(), attacker.address(), 500, 1, "");
        let sig = attacker.sign_digest(&tx.hash()).unwrap();
        let block = Block::new(
            Hash::zero(),
            0,
            0,
            1600000000,
            attacker.address(),
            vec![SignedTx::new(tx, sig)],
        );

        assert!(matches!(
            state.add_block(&block),
            Err(StateError::ForgedTx(_))
        ));
    }

    #[test]
    fn test_txs_apply_in_time_order() {
        let dir = tempfile::tempdir().unwrap();
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate().address();
        let mut state = open_with_genesis(dir.path(), &[(sender.address(), 1_000)]);

        let mut first = Tx::new(sender.address(), recipient, 1, 1, "");
        first.time = 1600000000;
        let mut second = Tx::new(sender.address(), recipient, 2, 2, "");
        second.time = 1600000005;

        // Payload deliberately out of order; the time sort must fix it
        let block = Block::new(
            Hash::zero(),
            0,
            0,
            1600000010,
            recipient,
            vec![signed(second, &sender), signed(first, &sender)],
        );
        state.add_block(&block).unwrap();

        assert_eq!(state.account_nonce(&sender.address()), 2);
        assert_eq!(state.balance(&recipient), 3 + BLOCK_REWARD);
    }

    #[test]
    fn test_replay_reconstructs_identical_state() {
        let dir = tempfile::tempdir().unwrap();
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate().address();
        let miner = PrivateKey::generate().address();

        let (balances, nonces, tip) = {
            let mut state = open_with_genesis(dir.path(), &[(sender.address(), 1_000)]);

            let tx1 = signed(Tx::new(sender.address(), recipient, 100, 1, ""), &sender);
            let block0 = Block::new(Hash::zero(), 0, 7, 1600000000, miner, vec![tx1]);
            state.add_block(&block0).unwrap();

            let tx2 = signed(Tx::new(sender.address(), recipient, 50, 2, ""), &sender);
            let block1 = Block::new(state.latest_block_hash(), 1, 9, 1600000010, miner, vec![tx2]);
            state.add_block(&block1).unwrap();

            (
                state.balances().clone(),
                state.account2nonce.clone(),
                state.latest_block_hash(),
            )
        };

        let reopened = State::with_difficulty(dir.path(), TEST_DIFFICULTY).unwrap();
        assert_eq!(reopened.balances(), &balances);
        assert_eq!(reopened.account2nonce, nonces);
        assert_eq!(reopened.latest_block_hash(), tip);
        assert_eq!(reopened.next_block_number(), 2);
    }

    #[test]
    fn test_add_blocks_stops_at_first_error() {
        let dir = tempfile::tempdir().unwrap();
        let miner = PrivateKey::generate().address();
        let mut state = open_with_genesis(dir.path(), &[]);

        let block0 = Block::new(Hash::zero(), 0, 0, 1600000000, miner, vec![]);
        let bad = Block::new(Hash::zero(), 5, 0, 1600000001, miner, vec![]);

        assert!(state.add_blocks(&[block0.clone(), bad]).is_err());

        // The first block in the batch stays applied
        assert_eq!(state.next_block_number(), 1);
        assert_eq!(state.balance(&miner), BLOCK_REWARD);
    }
}
