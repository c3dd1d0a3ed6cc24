//! Job Manager (C6, §4.6).
//!
//! Owns the monotonic job-id counter and the table of live jobs so the
//! Share Validator can look up the template a submitted share refers to,
//! even after a newer job has been broadcast. Jobs are personalized per
//! connection: each authorized connection gets its own coinbase-bearing
//! job built from a shared [`JobTemplate`], looked up first in that
//! connection's own map and, failing that, in a process-wide fallback map
//! (§3 "Stratum Job"/"Miner Connection", §4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chain_core::{Hash256, Satoshis};
use tokio::sync::RwLock;

use crate::coinbase::{build_coinbase, CoinbaseHalves};

/// A job offered to miners via `mining.notify` (§3 "Stratum Job").
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub height: u64,
    pub previous_hash_display: Hash256,
    pub coinb1: String,
    pub coinb2: String,
    pub merkle_branch: Vec<Hash256>,
    pub version: u32,
    pub nbits: u32,
    pub ntime: u32,
    pub difficulty: u64,
    pub clean_jobs: bool,
    pub pending_tx_ids: Vec<String>,
    /// Address the job's coinbase actually pays (§3).
    pub recipient: String,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: String,
        height: u64,
        previous_hash_display: Hash256,
        coinbase: CoinbaseHalves,
        merkle_branch: Vec<Hash256>,
        version: u32,
        nbits: u32,
        ntime: u32,
        difficulty: u64,
        clean_jobs: bool,
        pending_tx_ids: Vec<String>,
        recipient: String,
    ) -> Self {
        Self {
            job_id,
            height,
            previous_hash_display,
            coinb1: coinbase.coinb1,
            coinb2: coinbase.coinb2,
            merkle_branch,
            version,
            nbits,
            ntime,
            difficulty,
            clean_jobs,
            pending_tx_ids,
            recipient,
        }
    }
}

/// The rotation inputs shared by every job built from one template — the
/// block template plus header parameters that don't vary per miner.
/// Connections personalize it with their own worker address; the
/// process-wide fallback job personalizes it with the pool's own payout
/// address (§4.6).
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub height: u64,
    pub previous_hash_display: Hash256,
    pub merkle_branch: Vec<Hash256>,
    pub version: u32,
    pub nbits: u32,
    pub ntime: u32,
    pub difficulty: u64,
    pub pending_tx_ids: Vec<String>,
    pub reward: Satoshis,
    pub clean_jobs: bool,
    pub extranonce2_size: usize,
}

impl JobTemplate {
    /// Build a job paying `recipient`, as the Job Manager does once per
    /// authorized connection (or once for the fallback job).
    pub fn personalize(&self, job_id: String, recipient: &str, extranonce1_len: usize) -> Job {
        let coinbase = build_coinbase(
            self.height,
            self.reward,
            recipient,
            extranonce1_len,
            self.extranonce2_size,
        );
        Job::new(
            job_id,
            self.height,
            self.previous_hash_display,
            coinbase,
            self.merkle_branch.clone(),
            self.version,
            self.nbits,
            self.ntime,
            self.difficulty,
            self.clean_jobs,
            self.pending_tx_ids.clone(),
            recipient.to_string(),
        )
    }
}

/// Monotonic, process-wide job id generator. Lower-case hex, per §6.
#[derive(Default)]
pub struct JobIdGenerator {
    counter: AtomicU64,
}

impl JobIdGenerator {
    pub fn next(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{:x}", id)
    }
}

/// Bound on how many superseded jobs each map keeps around so a share for
/// a just-replaced job still validates (§4.6, §8).
const MAX_RETAINED_JOBS: usize = 8;

/// Result of a job lookup, flagging which map it came from so the Share
/// Validator knows whether the recipient needs overriding (§4.6, §4.7).
pub struct JobLookup {
    pub job: Job,
    pub from_fallback: bool,
}

/// Live and recently-superseded jobs. The personalized map is the
/// authoritative, per-connection source (keyed by owner, e.g. the
/// connection's `extranonce1`); the fallback map is the process-wide
/// table consulted when a job isn't in the submitting connection's own
/// map (§3 "Ownership", §4.6).
pub struct JobManager {
    ids: JobIdGenerator,
    fallback_jobs: RwLock<HashMap<String, Job>>,
    fallback_order: RwLock<Vec<String>>,
    personalized_jobs: RwLock<HashMap<String, HashMap<String, Job>>>,
    personalized_order: RwLock<HashMap<String, Vec<String>>>,
}

impl Default for JobManager {
    fn default() -> Self {
        Self {
            ids: JobIdGenerator::default(),
            fallback_jobs: RwLock::new(HashMap::new()),
            fallback_order: RwLock::new(Vec::new()),
            personalized_jobs: RwLock::new(HashMap::new()),
            personalized_order: RwLock::new(HashMap::new()),
        }
    }
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_job_id(&self) -> String {
        self.ids.next()
    }

    /// Publish a new fallback job, evicting the oldest once
    /// `MAX_RETAINED_JOBS` is exceeded.
    pub async fn publish_fallback(&self, job: Job) {
        let mut jobs = self.fallback_jobs.write().await;
        let mut order = self.fallback_order.write().await;
        order.push(job.job_id.clone());
        jobs.insert(job.job_id.clone(), job);
        while order.len() > MAX_RETAINED_JOBS {
            let oldest = order.remove(0);
            jobs.remove(&oldest);
        }
    }

    /// The most recently published fallback job, if any (pushed to
    /// connections that haven't authorized yet).
    pub async fn latest_fallback_job(&self) -> Option<Job> {
        let id = self.fallback_order.read().await.last().cloned()?;
        self.fallback_jobs.read().await.get(&id).cloned()
    }

    pub async fn latest_fallback_job_id(&self) -> Option<String> {
        self.fallback_order.read().await.last().cloned()
    }

    /// Record a connection's own personalized job, the authoritative map
    /// for that connection (§3 "per-connection job map", §4.6).
    pub async fn publish_personalized(&self, owner: &str, job: Job) {
        let mut jobs = self.personalized_jobs.write().await;
        let mut order = self.personalized_order.write().await;
        let owner_jobs = jobs.entry(owner.to_string()).or_default();
        let owner_order = order.entry(owner.to_string()).or_default();
        owner_order.push(job.job_id.clone());
        owner_jobs.insert(job.job_id.clone(), job);
        while owner_order.len() > MAX_RETAINED_JOBS {
            let oldest = owner_order.remove(0);
            owner_jobs.remove(&oldest);
        }
    }

    /// Discard a connection's personalized job map (§4.6 cache discipline:
    /// per-connection maps are discarded on disconnect).
    pub async fn drop_connection(&self, owner: &str) {
        self.personalized_jobs.write().await.remove(owner);
        self.personalized_order.write().await.remove(owner);
    }

    /// Resolve a submitted job id: the connection's own map first, then
    /// the process-wide fallback (§4.7 step 2).
    pub async fn get(&self, job_id: &str, owner: &str) -> Option<JobLookup> {
        if let Some(job) = self
            .personalized_jobs
            .read()
            .await
            .get(owner)
            .and_then(|m| m.get(job_id))
            .cloned()
        {
            return Some(JobLookup {
                job,
                from_fallback: false,
            });
        }
        self.fallback_jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .map(|job| JobLookup {
                job,
                from_fallback: true,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(id: &str) -> Job {
        Job::new(
            id.to_string(),
            1,
            [0u8; 32],
            CoinbaseHalves {
                coinb1: "aa".into(),
                coinb2: "bb".into(),
            },
            vec![],
            1,
            0x1d00_ffff,
            0,
            1,
            true,
            vec![],
            "pool-address".to_string(),
        )
    }

    #[test]
    fn job_ids_are_monotonic_lowercase_hex() {
        let gen = JobIdGenerator::default();
        assert_eq!(gen.next(), "0");
        assert_eq!(gen.next(), "1");
        assert_eq!(gen.next(), "2");
    }

    #[tokio::test]
    async fn retains_recent_fallback_jobs_for_late_submits() {
        let mgr = JobManager::new();
        for i in 0..MAX_RETAINED_JOBS + 3 {
            mgr.publish_fallback(sample_job(&i.to_string())).await;
        }
        assert!(mgr.get("0", "owner").await.is_none());
        assert!(mgr
            .get(&(MAX_RETAINED_JOBS + 2).to_string(), "owner")
            .await
            .is_some());
        assert_eq!(
            mgr.latest_fallback_job_id().await,
            Some((MAX_RETAINED_JOBS + 2).to_string())
        );
    }

    #[tokio::test]
    async fn personalized_job_is_authoritative_over_a_same_id_fallback_job() {
        let mgr = JobManager::new();
        mgr.publish_fallback(sample_job("0")).await;
        let mut personal = sample_job("0");
        personal.recipient = "miner-address".to_string();
        mgr.publish_personalized("owner-1", personal).await;

        let lookup = mgr.get("0", "owner-1").await.unwrap();
        assert!(!lookup.from_fallback);
        assert_eq!(lookup.job.recipient, "miner-address");

        // A different connection without its own copy falls back.
        let fallback_lookup = mgr.get("0", "owner-2").await.unwrap();
        assert!(fallback_lookup.from_fallback);
        assert_eq!(fallback_lookup.job.recipient, "pool-address");
    }

    #[tokio::test]
    async fn dropping_a_connection_clears_its_personalized_jobs() {
        let mgr = JobManager::new();
        mgr.publish_personalized("owner-1", sample_job("0")).await;
        mgr.drop_connection("owner-1").await;
        assert!(mgr.get("0", "owner-1").await.is_none());
    }
}
