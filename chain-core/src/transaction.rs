//! Mempool-view transactions (§3 Data Model).
//!
//! Amounts cross this boundary as decimal coin units; the mining core
//! itself works in integer satoshis and converts only when it builds or
//! reads a `Transaction` (§9 "Floating point").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Satoshis;

/// Satoshis per whole coin.
pub const COIN: u64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Regular,
    MiningReward,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub confirmed: bool,
    pub block_index: Option<u64>,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
}

impl Transaction {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, amount: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            timestamp: Utc::now(),
            confirmed: false,
            block_index: None,
            tx_type: TransactionType::Regular,
        }
    }

    /// Build the coinbase transaction for a mined block. `reward_sats` is
    /// converted to decimal coin units at this boundary only.
    pub fn coinbase(_height: u64, recipient: impl Into<String>, reward_sats: Satoshis, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: "COINBASE".to_string(),
            recipient: recipient.into(),
            amount: reward_sats as f64 / COIN as f64,
            timestamp: now,
            confirmed: true,
            block_index: None,
            tx_type: TransactionType::MiningReward,
        }
    }

    pub fn confirm(&mut self, block_index: u64) {
        self.confirmed = true;
        self.block_index = Some(block_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coinbase_converts_satoshis_to_coin_units() {
        let tx = Transaction::coinbase(1, "BRICSwallet", 50 * COIN, Utc::now());
        assert_eq!(tx.sender, "COINBASE");
        assert!((tx.amount - 50.0).abs() < 1e-9);
        assert_eq!(tx.tx_type, TransactionType::MiningReward);
    }
}
