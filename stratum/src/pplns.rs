//! PPLNS payout (§4.7 "On block acceptance").
//!
//! Distributes a found block's reward across the last N shares weighted by
//! each share's difficulty, regardless of which connection found the block.

use std::collections::HashMap;

use chain_core::store::ShareRecord;
use chain_core::Satoshis;

use crate::constants::PPLNS_WINDOW;

/// Credit, in satoshis, owed to each miner address for one block's reward.
/// Values never sum to more than `reward_sats`; any remainder from integer
/// division is left unassigned rather than guessed at (§8 invariant: no
/// negative or over-allocated balances).
pub fn distribute_reward(
    shares: &[ShareRecord],
    reward_sats: Satoshis,
) -> HashMap<String, Satoshis> {
    let window = window(shares);
    let total_weight: f64 = window.iter().map(|s| s.share_difficulty).sum();
    let mut credits = HashMap::new();
    if total_weight <= 0.0 {
        return credits;
    }

    for share in &window {
        let portion = share.share_difficulty / total_weight;
        let credit = (reward_sats as f64 * portion).floor() as Satoshis;
        *credits.entry(share.miner.clone()).or_insert(0) += credit;
    }
    credits
}

/// The last [`PPLNS_WINDOW`] shares, oldest first, as `record_share` appends
/// them in time order.
fn window(shares: &[ShareRecord]) -> Vec<&ShareRecord> {
    let start = shares.len().saturating_sub(PPLNS_WINDOW);
    shares[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(miner: &str, difficulty: f64) -> ShareRecord {
        ShareRecord {
            miner: miner.to_string(),
            worker: format!("{miner}.worker1"),
            timestamp: Utc::now(),
            share_difficulty: difficulty,
            job_id: "0".to_string(),
            is_block: false,
        }
    }

    #[test]
    fn splits_reward_proportionally_to_difficulty() {
        let shares = vec![record("alice", 1.0), record("bob", 3.0)];
        let credits = distribute_reward(&shares, 1000);
        assert_eq!(credits["alice"], 250);
        assert_eq!(credits["bob"], 750);
    }

    #[test]
    fn never_allocates_more_than_the_reward() {
        let shares = vec![record("alice", 1.0), record("bob", 1.0), record("carol", 1.0)];
        let credits = distribute_reward(&shares, 100);
        let total: Satoshis = credits.values().sum();
        assert!(total <= 100);
    }

    #[test]
    fn empty_share_history_yields_no_credits() {
        let credits = distribute_reward(&[], 5000);
        assert!(credits.is_empty());
    }
}
