//! Signed value-transfer transactions
//!
//! The canonical encoding of a transaction is its JSON object with fields
//! in declaration order: from, to, value, nonce, data, time. The SHA-256 of
//! that encoding is the digest the sender signs. A signed transaction
//! appends the 65-byte recoverable signature and is identified by the
//! SHA-256 of the full encoding, signature included.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto::{recover_address, sha256, Address, Hash, SignatureError, SIGNATURE_LENGTH};

/// Data sentinel marking a coinbase-style reward credit
pub const REWARD_DATA: &str = "reward";

/// A value transfer from one account to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub from: Address,
    pub to: Address,
    pub value: u64,
    /// Per-sender monotonic counter; the first transaction carries 1
    pub nonce: u64,
    pub data: String,
    /// Seconds since the Unix epoch, fixed at creation
    pub time: u64,
}

impl Tx {
    pub fn new(from: Address, to: Address, value: u64, nonce: u64, data: &str) -> Self {
        Self {
            from,
            to,
            value,
            nonce,
            data: data.to_string(),
            time: unix_timestamp(),
        }
    }

    pub fn is_reward(&self) -> bool {
        self.data == REWARD_DATA
    }

    /// Canonical JSON encoding
    pub fn encode(&self) -> Vec<u8> {
        // plain struct with string/integer fields, serialization cannot fail
        serde_json::to_vec(self).expect("tx encoding")
    }

    /// SHA-256 of the canonical encoding; the digest covered by the signature
    pub fn hash(&self) -> Hash {
        sha256(&self.encode())
    }
}

/// A transaction plus the sender's recoverable signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    #[serde(flatten)]
    pub tx: Tx,
    #[serde(rename = "signature", with = "sig_serde")]
    pub sig: [u8; SIGNATURE_LENGTH],
}

impl SignedTx {
    pub fn new(tx: Tx, sig: [u8; SIGNATURE_LENGTH]) -> Self {
        Self { tx, sig }
    }

    /// Canonical JSON encoding including the signature
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("signed tx encoding")
    }

    /// SHA-256 of the full encoding; identifies the tx in the mempool
    pub fn hash(&self) -> Hash {
        sha256(&self.encode())
    }

    /// Recover the signer from the signature and require it to match `from`
    pub fn is_authentic(&self) -> Result<bool, SignatureError> {
        let digest = self.tx.hash();
        let recovered = recover_address(&digest, &self.sig)?;
        Ok(recovered == self.tx.from)
    }
}

impl std::ops::Deref for SignedTx {
    type Target = Tx;

    fn deref(&self) -> &Tx {
        &self.tx
    }
}

/// Current wall-clock time in whole seconds
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

mod sig_serde {
    use super::SIGNATURE_LENGTH;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        sig: &[u8; SIGNATURE_LENGTH],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(sig)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; SIGNATURE_LENGTH], D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(raw).map_err(de::Error::custom)?;
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(de::Error::custom(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_LENGTH,
                bytes.len()
            )));
        }
        let mut out = [0u8; SIGNATURE_LENGTH];
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;

    fn signed(tx: Tx, key: &PrivateKey) -> SignedTx {
        let sig = key.sign_digest(&tx.hash()).unwrap();
        SignedTx::new(tx, sig)
    }

    #[test]
    fn test_canonical_field_order() {
        let tx = Tx {
            from: Address::zero(),
            to: Address::zero(),
            value: 7,
            nonce: 1,
            data: String::new(),
            time: 1600000000,
        };
        let json = String::from_utf8(tx.encode()).unwrap();
        assert_eq!(
            json,
            "{\"from\":\"0x0000000000000000000000000000000000000000\",\
             \"to\":\"0x0000000000000000000000000000000000000000\",\
             \"value\":7,\"nonce\":1,\"data\":\"\",\"time\":1600000000}"
        );
    }

    #[test]
    fn test_signed_encoding_appends_signature() {
        let key = PrivateKey::generate();
        let tx = Tx::new(key.address(), Address::zero(), 1, 1, "");
        let stx = signed(tx, &key);

        let json = String::from_utf8(stx.encode()).unwrap();
        assert!(json.starts_with("{\"from\":"));
        assert!(json.contains("\"signature\":\"0x"));
    }

    #[test]
    fn test_authentic_signature() {
        let key = PrivateKey::generate();
        let tx = Tx::new(key.address(), Address::zero(), 10, 1, "");
        let stx = signed(tx, &key);

        assert!(stx.is_authentic().unwrap());
    }

    #[test]
    fn test_forged_sender_rejected() {
        let key = PrivateKey::generate();
        let other = PrivateKey::generate();

        let mut tx = Tx::new(key.address(), Address::zero(), 10, 1, "");
        let sig = key.sign_digest(&tx.hash()).unwrap();
        tx.from = other.address();

        assert!(!SignedTx::new(tx, sig).is_authentic().unwrap_or(false));
    }

    #[test]
    fn test_mutated_time_breaks_signature() {
        let key = PrivateKey::generate();
        let tx = Tx::new(key.address(), Address::zero(), 10, 1, "");
        let mut stx = signed(tx, &key);
        stx.tx.time += 1;

        assert!(!stx.is_authentic().unwrap_or(false));
    }

    #[test]
    fn test_mutated_value_breaks_signature() {
        let key = PrivateKey::generate();
        let tx = Tx::new(key.address(), Address::zero(), 10, 1, "");
        let mut stx = signed(tx, &key);
        stx.tx.value = 1_000_000;

        assert!(!stx.is_authentic().unwrap_or(false));
    }

    #[test]
    fn test_reward_sentinel() {
        let tx = Tx::new(Address::zero(), Address::zero(), 1, 1, REWARD_DATA);
        assert!(tx.is_reward());
        let tx = Tx::new(Address::zero(), Address::zero(), 1, 1, "coffee");
        assert!(!tx.is_reward());
    }

    #[test]
    fn test_signed_tx_json_roundtrip() {
        let key = PrivateKey::generate();
        let tx = Tx::new(key.address(), Address::zero(), 3, 2, "memo");
        let stx = signed(tx, &key);

        let json = serde_json::to_string(&stx).unwrap();
        let back: SignedTx = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stx);
        assert_eq!(back.hash(), stx.hash());
    }
}
