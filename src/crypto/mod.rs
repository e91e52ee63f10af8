//! Cryptography module - SHA-256/Keccak-256 hashing and recoverable ECDSA

mod ecdsa;
mod hash;

pub use ecdsa::*;
pub use hash::*;
