//! Stored blocks (§3 Data Model).
//!
//! A `Block` is immutable once accepted by the `ChainStore`; the mining
//! core never mutates one after `insert_block` succeeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;
use crate::Hash256;

/// A stored block. `transactions[0]` is always the coinbase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
    pub previous_hash: Hash256,
    pub nonce: u32,
    pub difficulty: u64,
    pub hash: Hash256,
}

impl Block {
    pub fn genesis() -> Self {
        let coinbase = Transaction::coinbase(0, "GENESIS", 0, Utc::now());
        Self {
            height: 0,
            timestamp: Utc::now(),
            transactions: vec![coinbase],
            previous_hash: [0u8; 32],
            nonce: 0,
            difficulty: 1,
            hash: [0u8; 32],
        }
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_has_coinbase_first() {
        let g = Block::genesis();
        assert_eq!(g.height, 0);
        assert_eq!(g.coinbase().unwrap().sender, "COINBASE");
    }
}
