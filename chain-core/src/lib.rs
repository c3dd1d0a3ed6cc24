//! Core chain data model shared by the Stratum mining server and its callers.
//!
//! This crate owns the types the mining core reads and writes — blocks,
//! mempool transactions, and the `ChainStore` capability set (see §4.1 of
//! the design) — but not the HTTP API, wallet key management, or P2P
//! gossip that surround them in the full system. Those are external
//! collaborators; only the interface they present to the mining core
//! lives here.

use thiserror::Error;

/// 256-bit hash, stored internally as raw bytes, displayed as lower-case hex.
pub type Hash256 = [u8; 32];

/// Amount in whole satoshis (1e-8 coin).
pub type Satoshis = u64;

pub mod block;
pub mod reward;
pub mod store;
pub mod transaction;

pub use block::Block;
pub use store::{ChainStore, InMemoryChainStore, InsertOutcome, ShareRecord};
pub use transaction::Transaction;

/// Errors surfaced by the chain data model and its in-memory reference store.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("hash must be 32 bytes, got {0}")]
    BadHashLength(usize),
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// Encode/decode helpers for the 32-byte hash type used throughout.
pub trait Hash256Ext: Sized {
    fn to_hex(&self) -> String;
    fn from_hex(hex: &str) -> Result<Self>;
}

impl Hash256Ext for Hash256 {
    fn to_hex(&self) -> String {
        hex::encode(self)
    }

    fn from_hex(hex: &str) -> Result<Self> {
        let bytes = hex::decode(hex)?;
        let len = bytes.len();
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChainError::BadHashLength(len))?;
        Ok(array)
    }
}

/// Double SHA-256, used for the Merkle tree and the block header hash.
pub fn double_sha256(data: &[u8]) -> Hash256 {
    use sha2::{Digest, Sha256};
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Current wall-clock time as Unix epoch seconds.
pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
