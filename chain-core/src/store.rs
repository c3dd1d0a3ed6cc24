//! The chain store capability set (§4.1, §9 "Polymorphism without inheritance").
//!
//! The mining core never depends on a concrete storage engine — only on
//! this trait. `InMemoryChainStore` is the reference implementation used
//! by tests and the bundled binary; a real deployment could swap in a
//! document database or an embedded store without the Stratum server
//! noticing, as long as the atomicity guarantees in §4.1/§5 hold.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::block::Block;
use crate::transaction::Transaction;
use crate::{Hash256, Satoshis};

/// Outcome of `insert_block`: duplicate heights are rejected without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// An accepted or rejected share, appended by the Share Validator (§4.7).
#[derive(Debug, Clone)]
pub struct ShareRecord {
    pub miner: String,
    pub worker: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub share_difficulty: f64,
    pub job_id: String,
    pub is_block: bool,
}

/// The six operations the mining core needs from chain storage, plus the
/// wallet-block hook used by `mining.authorize` (§6).
#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn latest_block(&self) -> Option<Block>;
    async fn block_count(&self) -> u64;
    async fn last_n_blocks(&self, n: u64) -> Vec<Block>;
    async fn pending_transactions(&self, limit: usize) -> Vec<Transaction>;
    async fn insert_block(&self, block: Block) -> InsertOutcome;
    async fn confirm_transactions(&self, tx_ids: &[String], block_height: u64);
    async fn insert_coinbase_transaction(&self, tx: Transaction);
    async fn record_share(&self, record: ShareRecord);
    async fn purge_shares_older_than(&self, age: Duration);
    async fn is_wallet_blocked(&self, address: &str) -> bool;

    /// Full transactions matching `tx_ids`, in the same order, for
    /// assembling a block's stored transaction list (§3 "Block").
    async fn transactions_by_ids(&self, tx_ids: &[String]) -> Vec<Transaction>;

    /// Add `amount` to a worker's PPLNS payout balance (§4.7, §9 "a
    /// per-worker balance"). Additive only; balances never go negative.
    async fn credit_balance(&self, worker: &str, amount: Satoshis);

    /// A worker's current PPLNS payout balance.
    async fn balance(&self, worker: &str) -> Satoshis;

    /// Shares recorded within the PPLNS window, most recent last. Default
    /// implementation returns none; `InMemoryChainStore` overrides it.
    async fn recent_shares(&self, _limit: usize) -> Vec<ShareRecord> {
        Vec::new()
    }
}

struct Inner {
    blocks: Vec<Block>,
    heights: HashSet<u64>,
    pending: Vec<Transaction>,
    shares: Vec<ShareRecord>,
    blocked_wallets: HashSet<String>,
    balances: HashMap<String, Satoshis>,
}

/// Reference `ChainStore` implementation backed by in-process `Vec`s behind
/// an `RwLock`. Good enough for the bundled binary and for tests; not
/// durable across restarts.
pub struct InMemoryChainStore {
    inner: RwLock<Inner>,
}

impl InMemoryChainStore {
    pub fn new(blocked_wallets: impl IntoIterator<Item = String>) -> Self {
        let genesis = Block::genesis();
        let mut heights = HashSet::new();
        heights.insert(genesis.height);
        Self {
            inner: RwLock::new(Inner {
                blocks: vec![genesis],
                heights,
                pending: Vec::new(),
                shares: Vec::new(),
                blocked_wallets: blocked_wallets.into_iter().collect(),
                balances: HashMap::new(),
            }),
        }
    }

    /// Add an unconfirmed transaction to the mempool view (used by tests
    /// and by whatever external component accepts client-submitted
    /// transactions — out of scope here, but the store must expose a way
    /// to seed pending transactions for the template builder to pick up).
    pub async fn submit_transaction(&self, tx: Transaction) {
        self.inner.write().await.pending.push(tx);
    }
}

impl Default for InMemoryChainStore {
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}

#[async_trait]
impl ChainStore for InMemoryChainStore {
    async fn latest_block(&self) -> Option<Block> {
        self.inner.read().await.blocks.last().cloned()
    }

    async fn block_count(&self) -> u64 {
        self.inner.read().await.blocks.len() as u64
    }

    async fn last_n_blocks(&self, n: u64) -> Vec<Block> {
        let inner = self.inner.read().await;
        let mut blocks: Vec<Block> = inner.blocks.clone();
        blocks.sort_by(|a, b| b.height.cmp(&a.height));
        blocks.truncate(n as usize);
        blocks
    }

    async fn pending_transactions(&self, limit: usize) -> Vec<Transaction> {
        let inner = self.inner.read().await;
        inner
            .pending
            .iter()
            .filter(|tx| !tx.confirmed)
            .take(limit)
            .cloned()
            .collect()
    }

    async fn insert_block(&self, block: Block) -> InsertOutcome {
        let mut inner = self.inner.write().await;
        if inner.heights.contains(&block.height) {
            return InsertOutcome::AlreadyExists;
        }
        inner.heights.insert(block.height);
        inner.blocks.push(block);
        InsertOutcome::Inserted
    }

    async fn confirm_transactions(&self, tx_ids: &[String], block_height: u64) {
        let ids: HashSet<&str> = tx_ids.iter().map(String::as_str).collect();
        let mut inner = self.inner.write().await;
        for tx in inner.pending.iter_mut() {
            if ids.contains(tx.id.as_str()) {
                tx.confirm(block_height);
            }
        }
    }

    async fn insert_coinbase_transaction(&self, tx: Transaction) {
        self.inner.write().await.pending.push(tx);
    }

    async fn record_share(&self, record: ShareRecord) {
        self.inner.write().await.shares.push(record);
    }

    async fn purge_shares_older_than(&self, age: Duration) {
        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(age).unwrap_or_default();
        let mut inner = self.inner.write().await;
        let before = inner.shares.len();
        inner.shares.retain(|s| s.timestamp >= cutoff);
        let purged = before - inner.shares.len();
        if purged > 0 {
            debug!(purged, "purged stale shares");
        }
    }

    async fn is_wallet_blocked(&self, address: &str) -> bool {
        self.inner.read().await.blocked_wallets.contains(address)
    }

    async fn transactions_by_ids(&self, tx_ids: &[String]) -> Vec<Transaction> {
        let inner = self.inner.read().await;
        let by_id: HashMap<&str, &Transaction> =
            inner.pending.iter().map(|tx| (tx.id.as_str(), tx)).collect();
        tx_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|tx| (*tx).clone()))
            .collect()
    }

    async fn credit_balance(&self, worker: &str, amount: Satoshis) {
        let mut inner = self.inner.write().await;
        *inner.balances.entry(worker.to_string()).or_insert(0) += amount;
    }

    async fn balance(&self, worker: &str) -> Satoshis {
        self.inner.read().await.balances.get(worker).copied().unwrap_or(0)
    }

    async fn recent_shares(&self, limit: usize) -> Vec<ShareRecord> {
        let inner = self.inner.read().await;
        let len = inner.shares.len();
        let start = len.saturating_sub(limit);
        inner.shares[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_height_is_idempotent() {
        let store = InMemoryChainStore::default();
        let mut block = Block::genesis();
        block.height = 1;
        block.previous_hash = [1u8; 32];
        assert_eq!(store.insert_block(block.clone()).await, InsertOutcome::Inserted);
        assert_eq!(store.insert_block(block).await, InsertOutcome::AlreadyExists);
        assert_eq!(store.block_count().await, 2);
    }

    #[tokio::test]
    async fn wallet_block_list() {
        let store = InMemoryChainStore::new(["BLOCKED".to_string()]);
        assert!(store.is_wallet_blocked("BLOCKED").await);
        assert!(!store.is_wallet_blocked("OK").await);
    }

    #[tokio::test]
    async fn credit_balance_accumulates_across_calls() {
        let store = InMemoryChainStore::default();
        store.credit_balance("alice", 100).await;
        store.credit_balance("alice", 50).await;
        store.credit_balance("bob", 10).await;
        assert_eq!(store.balance("alice").await, 150);
        assert_eq!(store.balance("bob").await, 10);
        assert_eq!(store.balance("nobody").await, 0);
    }

    #[tokio::test]
    async fn transactions_by_ids_filters_and_preserves_order() {
        let store = InMemoryChainStore::default();
        let a = Transaction::new("alice", "bob", 1.0);
        let b = Transaction::new("bob", "carol", 2.0);
        let a_id = a.id.clone();
        let b_id = b.id.clone();
        store.submit_transaction(a).await;
        store.submit_transaction(b).await;

        let found = store
            .transactions_by_ids(&[b_id.clone(), a_id.clone(), "missing".to_string()])
            .await;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, b_id);
        assert_eq!(found[1].id, a_id);
    }
}
