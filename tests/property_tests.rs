//! Property-based and adversarial tests for the TALLY ledger
//!
//! These verify the state-machine invariants under random inputs: replay
//! determinism, nonce monotonicity, signature coverage and the reward
//! rule.

use proptest::prelude::*;

use tally_core::consensus::{leading_zero_nibbles, Block};
use tally_core::constants::BLOCK_REWARD;
use tally_core::crypto::{Address, Hash, PrivateKey};
use tally_core::storage::{self, Genesis, State};
use tally_core::validation::{SignedTx, Tx};

const TEST_DIFFICULTY: u32 = 0;

fn open_state(dir: &std::path::Path, funded: Address, balance: u64) -> State {
    let genesis = Genesis::new([(funded, balance)].into_iter().collect());
    storage::init_data_dir_if_not_exists(dir, &serde_json::to_vec(&genesis).unwrap()).unwrap();
    State::with_difficulty(dir, TEST_DIFFICULTY).unwrap()
}

fn signed(tx: Tx, key: &PrivateKey) -> SignedTx {
    let sig = key.sign_digest(&tx.hash()).unwrap();
    SignedTx::new(tx, sig)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Replaying the chain log reconstructs identical balances and nonces
    #[test]
    fn prop_replay_is_deterministic(values in prop::collection::vec(1u64..500, 1..6)) {
        let dir = tempfile::tempdir().unwrap();
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate().address();
        let miner = PrivateKey::generate().address();

        let (balances, tip) = {
            let mut state = open_state(dir.path(), sender.address(), 1_000_000);

            for (i, value) in values.iter().enumerate() {
                let nonce = i as u64 + 1;
                let tx = signed(
                    Tx::new(sender.address(), recipient, *value, nonce, ""),
                    &sender,
                );
                let block = Block::new(
                    state.latest_block_hash(),
                    state.next_block_number(),
                    nonce,
                    1_600_000_000 + nonce,
                    miner,
                    vec![tx],
                );
                state.add_block(&block).unwrap();
            }

            (state.balances().clone(), state.latest_block_hash())
        };

        let reopened = State::with_difficulty(dir.path(), TEST_DIFFICULTY).unwrap();
        prop_assert_eq!(reopened.balances(), &balances);
        prop_assert_eq!(reopened.latest_block_hash(), tip);
    }

    /// Applied nonces are consecutive from 1; any gap rejects the block
    #[test]
    fn prop_nonce_gaps_rejected(gap in 2u64..10) {
        let dir = tempfile::tempdir().unwrap();
        let sender = PrivateKey::generate();
        let recipient = PrivateKey::generate().address();
        let mut state = open_state(dir.path(), sender.address(), 1_000_000);

        let ok = signed(Tx::new(sender.address(), recipient, 1, 1, ""), &sender);
        let block = Block::new(Hash::zero(), 0, 0, 1_600_000_000, recipient, vec![ok]);
        state.add_block(&block).unwrap();
        prop_assert_eq!(state.account_nonce(&sender.address()), 1);

        let skipping = signed(
            Tx::new(sender.address(), recipient, 1, 1 + gap, ""),
            &sender,
        );
        let block = Block::new(
            state.latest_block_hash(),
            1,
            0,
            1_600_000_001,
            recipient,
            vec![skipping],
        );
        prop_assert!(state.add_block(&block).is_err());
        prop_assert_eq!(state.account_nonce(&sender.address()), 1);
    }

    /// Mutating any covered byte of a signed tx breaks authenticity
    #[test]
    fn prop_any_mutation_forges_tx(
        value in 1u64..1_000_000,
        nonce in 1u64..1_000,
        mutation in 0usize..4,
    ) {
        let key = PrivateKey::generate();
        let recipient = PrivateKey::generate().address();

        let tx = Tx::new(key.address(), recipient, value, nonce, "memo");
        let mut stx = signed(tx, &key);
        prop_assert!(stx.is_authentic().unwrap());

        match mutation {
            0 => stx.tx.from = PrivateKey::generate().address(),
            1 => stx.tx.time += 1,
            2 => stx.tx.value += 1,
            _ => stx.sig[10] ^= 0xff,
        }

        prop_assert!(!stx.is_authentic().unwrap_or(false));
    }

    /// The miner earns exactly one reward per block plus any tx credits
    #[test]
    fn prop_single_reward_per_block(tx_count in 1usize..5) {
        let dir = tempfile::tempdir().unwrap();
        let sender = PrivateKey::generate();
        let miner = PrivateKey::generate().address();
        let mut state = open_state(dir.path(), sender.address(), 1_000_000);

        let txs: Vec<SignedTx> = (1..=tx_count as u64)
            .map(|nonce| signed(Tx::new(sender.address(), miner, 10, nonce, ""), &sender))
            .collect();
        let block = Block::new(Hash::zero(), 0, 0, 1_600_000_000, miner, txs);
        state.add_block(&block).unwrap();

        prop_assert_eq!(
            state.balance(&miner),
            BLOCK_REWARD + 10 * tx_count as u64
        );
    }

    /// The nibble counter agrees with the hex representation
    #[test]
    fn prop_nibbles_match_hex(bytes in prop::array::uniform32(any::<u8>())) {
        let hash = Hash::from_bytes(bytes);
        let hex = hash.to_hex();
        let counted = hex
            .trim_start_matches("0x")
            .chars()
            .take_while(|c| *c == '0')
            .count() as u32;

        prop_assert_eq!(leading_zero_nibbles(&hash), counted);
    }
}

/// A block rejected mid-application must leave no partial effects
#[test]
fn test_rejected_block_is_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let sender = PrivateKey::generate();
    let recipient = PrivateKey::generate().address();
    let mut state = open_state(dir.path(), sender.address(), 1_000);

    // First tx fine, second overdraws: the whole block must vanish
    let ok = signed(Tx::new(sender.address(), recipient, 900, 1, ""), &sender);
    let overdraw = signed(Tx::new(sender.address(), recipient, 500, 2, ""), &sender);
    let block = Block::new(
        Hash::zero(),
        0,
        0,
        1_600_000_000,
        recipient,
        vec![ok, overdraw],
    );

    assert!(state.add_block(&block).is_err());
    assert_eq!(state.balance(&sender.address()), 1_000);
    assert_eq!(state.balance(&recipient), 0);
    assert_eq!(state.account_nonce(&sender.address()), 0);
    assert!(!state.has_blocks());
}

/// An attacker reusing a signature on a re-timestamped tx gets caught
#[test]
fn test_replayed_signature_with_fresh_time_is_forged() {
    let key = PrivateKey::generate();
    let recipient = PrivateKey::generate().address();

    let original = Tx::new(key.address(), recipient, 5, 1, "");
    let sig = key.sign_digest(&original.hash()).unwrap();

    let mut replayed = original;
    replayed.time += 60;
    let forged = SignedTx::new(replayed, sig);

    assert!(!forged.is_authentic().unwrap_or(false));
}
