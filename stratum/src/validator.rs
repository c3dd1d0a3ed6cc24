//! Share Validator (C7, §4.7).
//!
//! Runs the seven-step `mining.submit` pipeline: job lookup (the
//! connection's own personalized map first, then the process-wide
//! fallback), duplicate rejection, coinbase/header reassembly, share-target
//! check, and finally the block-target check that decides whether this
//! share is also a block — in which case the block is written through,
//! PPLNS credits are applied, and C6 is asked to rotate jobs.

use std::collections::HashSet;
use std::sync::Arc;

use chain_core::store::ShareRecord;
use chain_core::transaction::Transaction;
use chain_core::{Block, ChainStore, InsertOutcome};
use num_bigint::BigUint;
use tracing::info;

use crate::connection::ConnectionContext;
use crate::constants::PPLNS_WINDOW;
use crate::header::{
    assemble_header, bits_to_target, header_hash_display, header_hash_internal,
    hash_meets_target, reverse_bytes, HeaderFields,
};
use crate::job::Job;
use crate::pplns;
use crate::StratumError;

/// One `mining.submit` payload (§6), already parsed out of the JSON-RPC params.
#[derive(Debug, Clone)]
pub struct ShareSubmission {
    pub miner: String,
    pub worker: String,
    pub job_id: String,
    pub extranonce2: String,
    pub ntime: u32,
    pub nonce: u32,
}

/// Result of validating one share.
#[derive(Debug)]
pub enum ShareOutcome {
    Accepted { is_block: bool },
    Rejected(StratumError),
}

/// Per-connection dedup state plus a handle to the shared job tables, chain
/// store, and broadcast feed. One `ShareValidator` lives per connection (§5
/// "per-connection state"); everything reached through `ctx` is shared.
pub struct ShareValidator {
    ctx: Arc<ConnectionContext>,
    extranonce1: String,
    seen: HashSet<(String, String, u32, u32)>,
}

impl ShareValidator {
    pub fn new(ctx: Arc<ConnectionContext>, extranonce1: String) -> Self {
        Self {
            ctx,
            extranonce1,
            seen: HashSet::new(),
        }
    }

    pub async fn validate(
        &mut self,
        submission: ShareSubmission,
        share_difficulty: f64,
    ) -> ShareOutcome {
        let triple = (
            submission.job_id.clone(),
            submission.extranonce2.clone(),
            submission.ntime,
            submission.nonce,
        );
        if self.seen.contains(&triple) {
            return ShareOutcome::Rejected(StratumError::DuplicateShare);
        }

        let lookup = match self.ctx.jobs.get(&submission.job_id, &self.extranonce1).await {
            Some(lookup) => lookup,
            None => return ShareOutcome::Rejected(StratumError::JobNotFound(submission.job_id)),
        };
        let job = lookup.job;
        let from_fallback = lookup.from_fallback;

        let header = match self.assemble(&job, &submission) {
            Ok(header) => header,
            Err(e) => return ShareOutcome::Rejected(e),
        };

        self.seen.insert(triple);

        let hash = header_hash_internal(&header);
        let share_target = share_difficulty_to_target(share_difficulty);
        if !hash_meets_target(&hash, &share_target) {
            return ShareOutcome::Rejected(StratumError::LowDifficultyShare);
        }

        let block_target = bits_to_target(job.nbits);
        let is_block = hash_meets_target(&hash, &block_target);

        self.ctx
            .store
            .record_share(ShareRecord {
                miner: submission.miner.clone(),
                worker: submission.worker.clone(),
                timestamp: chrono::Utc::now(),
                share_difficulty,
                job_id: job.job_id.clone(),
                is_block,
            })
            .await;

        if is_block {
            // The fallback job's coinbase paid the pool's own address; the
            // stored block must still credit the submitting worker (§3
            // "Ownership", §4.6, §8 invariant 5).
            let recipient = if from_fallback {
                submission.miner.clone()
            } else {
                job.recipient.clone()
            };
            self.accept_block(&job, &submission, &header, &recipient).await;
        }

        ShareOutcome::Accepted { is_block }
    }

    fn assemble(&self, job: &Job, submission: &ShareSubmission) -> Result<[u8; 80], StratumError> {
        let coinbase_hex = format!(
            "{}{}{}{}",
            job.coinb1, self.extranonce1, submission.extranonce2, job.coinb2
        );
        let coinbase_bytes = hex::decode(&coinbase_hex)?;
        let coinbase_hash = chain_core::double_sha256(&coinbase_bytes);

        let merkle_root = crate::header::merkle_root(coinbase_hash, &job.merkle_branch);
        let previous_hash_internal = reverse_bytes(&job.previous_hash_display);

        let fields = HeaderFields {
            version: job.version,
            previous_hash_internal,
            merkle_root_internal: merkle_root,
            ntime: submission.ntime,
            nbits: job.nbits,
            nonce: submission.nonce,
        };
        Ok(assemble_header(&fields))
    }

    async fn accept_block(
        &self,
        job: &Job,
        submission: &ShareSubmission,
        header: &[u8; 80],
        recipient: &str,
    ) {
        let reward = chain_core::reward::reward_at_height(job.height);
        let coinbase_tx = Transaction::coinbase(job.height, recipient, reward, chrono::Utc::now());

        // The job's own committed transactions, coinbase first (§3 "Block").
        let included = self.ctx.store.transactions_by_ids(&job.pending_tx_ids).await;
        let mut transactions = Vec::with_capacity(included.len() + 1);
        transactions.push(coinbase_tx.clone());
        transactions.extend(included);

        let block = Block {
            height: job.height,
            timestamp: chrono::Utc::now(),
            transactions,
            previous_hash: job.previous_hash_display,
            nonce: submission.nonce,
            difficulty: job.difficulty,
            hash: header_hash_display(header),
        };

        if self.ctx.store.insert_block(block).await != InsertOutcome::Inserted {
            // Another connection already won this height (§5 idempotent insert); don't double-pay.
            return;
        }

        self.ctx.store.insert_coinbase_transaction(coinbase_tx).await;
        if !job.pending_tx_ids.is_empty() {
            self.ctx
                .store
                .confirm_transactions(&job.pending_tx_ids, job.height)
                .await;
        }

        let recent_shares = self.ctx.store.recent_shares(PPLNS_WINDOW).await;
        for (contributor, credit) in pplns::distribute_reward(&recent_shares, reward) {
            self.ctx.store.credit_balance(&contributor, credit).await;
        }

        crate::server::rebuild_and_broadcast(&self.ctx, true).await;

        info!(height = job.height, recipient, "block found");
    }
}

/// Fixed-point scale used to approximate `1 / difficulty` without losing
/// precision to `BigUint`'s integer-only arithmetic.
const TARGET_SCALE_PRECISION: u128 = 1_000_000;

/// Difficulty-1 target, used to scale a share difficulty into a 256-bit
/// target (§4.5/§4.8): `target = DIFF_1_TARGET / difficulty`.
fn share_difficulty_to_target(difficulty: f64) -> BigUint {
    let diff_1 = bits_to_target(0x1d00_ffff);
    if difficulty <= 0.0 {
        return diff_1;
    }
    let scaled_inverse = ((1.0 / difficulty) * TARGET_SCALE_PRECISION as f64)
        .round()
        .max(1.0);
    let scaled_inverse = scaled_inverse.min(u128::MAX as f64) as u128;
    (diff_1 * BigUint::from(scaled_inverse)) / BigUint::from(TARGET_SCALE_PRECISION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinbase::{build_coinbase, CoinbaseHalves};
    use crate::job::{Job, JobManager};
    use chain_core::transaction::COIN;
    use chain_core::InMemoryChainStore;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::{broadcast, RwLock};

    /// Share difficulty tiny enough that the resulting target dwarfs the
    /// full 256-bit hash space, so acceptance never depends on grinding a
    /// winning nonce.
    const TRIVIAL_DIFFICULTY: f64 = 1e-30;

    fn test_ctx(store: Arc<dyn ChainStore>) -> Arc<ConnectionContext> {
        let (job_feed, _rx) = broadcast::channel(32);
        Arc::new(ConnectionContext {
            jobs: Arc::new(JobManager::new()),
            store,
            online_miners: Arc::new(RwLock::new(HashMap::new())),
            extranonce1_counter: AtomicU32::new(0),
            job_feed,
            latest_template: RwLock::new(None),
        })
    }

    fn make_job(extranonce1_len: usize) -> Job {
        let halves: CoinbaseHalves = build_coinbase(1, 50 * COIN, "miner-address", extranonce1_len, 4);
        Job::new(
            "0".to_string(),
            1,
            [0u8; 32],
            halves,
            vec![],
            1,
            0x217f_ffff, // target exceeds the full 256-bit hash space: every hash is a block
            0,
            1,
            true,
            vec![],
            "miner-address".to_string(),
        )
    }

    #[tokio::test]
    async fn unknown_job_id_is_rejected() {
        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::default());
        let ctx = test_ctx(store);
        let mut validator = ShareValidator::new(ctx, "aabbccdd".to_string());

        let submission = ShareSubmission {
            miner: "miner-address".to_string(),
            worker: "miner-address.rig1".to_string(),
            job_id: "missing".to_string(),
            extranonce2: "00000000".to_string(),
            ntime: 0,
            nonce: 0,
        };
        let outcome = validator.validate(submission, TRIVIAL_DIFFICULTY).await;
        assert!(matches!(
            outcome,
            ShareOutcome::Rejected(StratumError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected() {
        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::default());
        let ctx = test_ctx(store);
        ctx.jobs.publish_fallback(make_job(4)).await;
        let mut validator = ShareValidator::new(ctx, "aabbccdd".to_string());

        let submission = ShareSubmission {
            miner: "miner-address".to_string(),
            worker: "miner-address.rig1".to_string(),
            job_id: "0".to_string(),
            extranonce2: "00000000".to_string(),
            ntime: 0,
            nonce: 0,
        };
        let first = validator.validate(submission.clone(), TRIVIAL_DIFFICULTY).await;
        assert!(matches!(first, ShareOutcome::Accepted { .. }));
        let second = validator.validate(submission, TRIVIAL_DIFFICULTY).await;
        assert!(matches!(
            second,
            ShareOutcome::Rejected(StratumError::DuplicateShare)
        ));
    }

    #[tokio::test]
    async fn share_meeting_easy_target_is_also_a_block() {
        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::default());
        let ctx = test_ctx(store.clone());
        ctx.jobs.publish_fallback(make_job(4)).await;
        let mut validator = ShareValidator::new(ctx, "aabbccdd".to_string());

        let submission = ShareSubmission {
            miner: "miner-address".to_string(),
            worker: "miner-address.rig1".to_string(),
            job_id: "0".to_string(),
            extranonce2: "00000000".to_string(),
            ntime: 0,
            nonce: 1,
        };
        let outcome = validator.validate(submission, TRIVIAL_DIFFICULTY).await;
        match outcome {
            ShareOutcome::Accepted { is_block } => assert!(is_block),
            other => panic!("expected accepted block, got {other:?}"),
        }
        assert_eq!(store.block_count().await, 2);

        let block = store.last_n_blocks(1).await.remove(0);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].recipient, "miner-address");
    }

    #[tokio::test]
    async fn block_acceptance_credits_pplns_balances() {
        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::default());
        let ctx = test_ctx(store.clone());
        ctx.jobs.publish_fallback(make_job(4)).await;
        let mut validator = ShareValidator::new(ctx, "aabbccdd".to_string());

        let submission = ShareSubmission {
            miner: "miner-address".to_string(),
            worker: "miner-address.rig1".to_string(),
            job_id: "0".to_string(),
            extranonce2: "00000000".to_string(),
            ntime: 0,
            nonce: 1,
        };
        validator.validate(submission, TRIVIAL_DIFFICULTY).await;

        let balance = store.balance("miner-address").await;
        assert_eq!(balance, 50 * COIN);
    }

    #[tokio::test]
    async fn block_acceptance_rotates_jobs() {
        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::default());
        let ctx = test_ctx(store.clone());
        ctx.jobs.publish_fallback(make_job(4)).await;
        let mut validator = ShareValidator::new(ctx.clone(), "aabbccdd".to_string());

        let submission = ShareSubmission {
            miner: "miner-address".to_string(),
            worker: "miner-address.rig1".to_string(),
            job_id: "0".to_string(),
            extranonce2: "00000000".to_string(),
            ntime: 0,
            nonce: 1,
        };
        validator.validate(submission, TRIVIAL_DIFFICULTY).await;

        // A fresh fallback job for height 2 replaced the one for height 1.
        let fresh = ctx.jobs.latest_fallback_job().await.unwrap();
        assert_eq!(fresh.height, 2);
    }
}
