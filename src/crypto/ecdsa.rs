//! secp256k1 ECDSA with public-key recovery
//!
//! Signatures are the 65-byte r‖s‖v layout: 64 bytes of signature plus a
//! one-byte recovery id (0 or 1). A signer's address is recovered from the
//! signature and the signed digest, never carried alongside it.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use super::{keccak256, Address, Hash};

/// Length of a recoverable signature: r (32) + s (32) + v (1)
pub const SIGNATURE_LENGTH: usize = 65;

/// Signature errors
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),
    #[error("public key recovery failed")]
    RecoveryFailed,
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// secp256k1 private key
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        PrivateKey(SigningKey::random(&mut OsRng))
    }

    /// Create from 32 raw bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        SigningKey::from_slice(bytes)
            .map(PrivateKey)
            .map_err(|_| SignatureError::InvalidPrivateKey)
    }

    /// Export to 32 raw bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }

    /// The address derived from the corresponding public key
    pub fn address(&self) -> Address {
        public_key_to_address(self.0.verifying_key())
    }

    /// Sign a 32-byte digest, producing a recoverable r‖s‖v signature
    pub fn sign_digest(&self, digest: &Hash) -> Result<[u8; SIGNATURE_LENGTH], SignatureError> {
        let (sig, recovery_id) = self
            .0
            .sign_prehash_recoverable(digest.as_bytes())
            .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;

        let mut out = [0u8; SIGNATURE_LENGTH];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }
}

/// Derive the account address from a public key: Keccak-256 over the
/// uncompressed point without its 0x04 prefix, last 20 bytes.
pub fn public_key_to_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address(out)
}

/// Recover the signer's address from a digest and a 65-byte signature
pub fn recover_address(
    digest: &Hash,
    signature: &[u8; SIGNATURE_LENGTH],
) -> Result<Address, SignatureError> {
    let recovery_id = RecoveryId::from_byte(signature[64])
        .ok_or(SignatureError::InvalidRecoveryId(signature[64]))?;
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|_| SignatureError::InvalidSignature)?;
    let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recovery_id)
        .map_err(|_| SignatureError::RecoveryFailed)?;

    Ok(public_key_to_address(&key))
}
