//! Wallet module - keystore files and transaction signing
//!
//! Keys live under `<dataDir>/keystore/`, one JSON file per account named
//! by the 0x-hex address. Signing never touches consensus; a wallet bug
//! cannot corrupt the chain.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::crypto::{Address, PrivateKey, SignatureError};
use crate::validation::{SignedTx, Tx};

const KEYSTORE_DIR_NAME: &str = "keystore";

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("no keystore entry for {0}")]
    KeyNotFound(Address),
    #[error("invalid key file: {0}")]
    InvalidKeyFile(String),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// On-disk key file contents
#[derive(Debug, Serialize, Deserialize)]
struct StoredKey {
    address: Address,
    private_key: String,
}

pub fn keystore_dir_path(data_dir: &Path) -> PathBuf {
    data_dir.join(KEYSTORE_DIR_NAME)
}

fn key_file_path(data_dir: &Path, account: &Address) -> PathBuf {
    keystore_dir_path(data_dir).join(account.to_hex())
}

/// Generate a key, persist it, and return its address
pub fn new_keystore_account(data_dir: &Path) -> Result<Address, WalletError> {
    let key = PrivateKey::generate();
    save_key(data_dir, &key)?;
    Ok(key.address())
}

/// Persist an existing key into the keystore
pub fn save_key(data_dir: &Path, key: &PrivateKey) -> Result<PathBuf, WalletError> {
    fs::create_dir_all(keystore_dir_path(data_dir))?;

    let stored = StoredKey {
        address: key.address(),
        private_key: hex::encode(key.to_bytes()),
    };
    let path = key_file_path(data_dir, &stored.address);
    fs::write(&path, serde_json::to_vec_pretty(&stored)?)?;

    Ok(path)
}

/// Load the private key for an account from the keystore
pub fn load_key(data_dir: &Path, account: &Address) -> Result<PrivateKey, WalletError> {
    let path = key_file_path(data_dir, account);
    let content = fs::read(&path).map_err(|_| WalletError::KeyNotFound(*account))?;

    let stored: StoredKey = serde_json::from_slice(&content)?;
    let raw = hex::decode(&stored.private_key)
        .map_err(|e| WalletError::InvalidKeyFile(e.to_string()))?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| WalletError::InvalidKeyFile("key must be 32 bytes".to_string()))?;

    let key = PrivateKey::from_bytes(&bytes)?;
    if key.address() != *account {
        return Err(WalletError::InvalidKeyFile(
            "key does not match file name".to_string(),
        ));
    }

    Ok(key)
}

/// Sign a transaction's digest, producing the signed form peers accept
pub fn sign_tx(tx: Tx, key: &PrivateKey) -> Result<SignedTx, WalletError> {
    let sig = key.sign_digest(&tx.hash())?;
    Ok(SignedTx::new(tx, sig))
}

/// Look up the sender's key in the keystore and sign with it
pub fn sign_tx_with_keystore_account(data_dir: &Path, tx: Tx) -> Result<SignedTx, WalletError> {
    let key = load_key(data_dir, &tx.from)?;
    sign_tx(tx, &key)
}
