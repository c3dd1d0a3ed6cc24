//! Block Template Builder (C3, §4.3).

use chain_core::{reward::reward_at_height, transaction::Transaction, ChainStore, Satoshis};

const MAX_TEMPLATE_TRANSACTIONS: usize = 100;

/// Ephemeral descriptor for the next block, superseded by a fresh one on
/// every rotation (§3 "Block Template").
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub height: u64,
    pub timestamp: u32,
    pub transactions: Vec<Transaction>,
    pub previous_hash: [u8; 32],
    pub difficulty: u64,
    pub reward: Satoshis,
    pub pending_tx_ids: Vec<String>,
}

pub async fn build_template(store: &dyn ChainStore) -> BlockTemplate {
    let latest = store.latest_block().await;
    let height = latest.as_ref().map(|b| b.height + 1).unwrap_or(0);
    let previous_hash = latest.as_ref().map(|b| b.hash).unwrap_or([0u8; 32]);

    let transactions = store.pending_transactions(MAX_TEMPLATE_TRANSACTIONS).await;
    let pending_tx_ids = transactions.iter().map(|tx| tx.id.clone()).collect();

    let difficulty = crate::difficulty::next_difficulty(store).await;
    let reward = reward_at_height(height);
    let timestamp = chain_core::now_unix() as u32;

    BlockTemplate {
        height,
        timestamp,
        transactions,
        previous_hash,
        difficulty,
        reward,
        pending_tx_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::InMemoryChainStore;

    #[tokio::test]
    async fn template_targets_height_after_tip() {
        let store = InMemoryChainStore::default();
        let template = build_template(&store).await;
        assert_eq!(template.height, 1);
        assert_eq!(template.reward, 50 * chain_core::transaction::COIN);
    }

    #[tokio::test]
    async fn template_caps_pending_transactions() {
        let store = InMemoryChainStore::default();
        for i in 0..150 {
            store
                .submit_transaction(Transaction::new("alice", "bob", i as f64))
                .await;
        }
        let template = build_template(&store).await;
        assert_eq!(template.transactions.len(), MAX_TEMPLATE_TRANSACTIONS);
    }
}
