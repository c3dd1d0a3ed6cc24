//! Server & Broadcast Loop (C10, §4.10).
//!
//! Owns the TCP accept loop, the periodic job-rebuild broadcast, and the
//! share-retention purge. Each accepted connection runs as its own task
//! under [`crate::connection::handle_connection`]. The same rebuild-and-
//! broadcast routine also runs out of cycle when the Share Validator
//! accepts a block, so miners aren't left hashing a stale template (§4.6,
//! §4.10).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

use chain_core::Hash256;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use chain_core::ChainStore;

use crate::connection::{handle_connection, ConnectionContext};
use crate::constants::{
    EXTRANONCE1_BYTES, EXTRANONCE2_SIZE, JOB_REFRESH_SECS, SHARE_PURGE_INTERVAL_SECS, STRATUM_VERSION,
};
use crate::header::merkle_branch;
use crate::job::{JobManager, JobTemplate};
use crate::template::build_template;

const NOTIFY_CHANNEL_CAPACITY: usize = 32;

/// Address the fallback job's coinbase pays when a connection hasn't
/// personalized its own job yet (pre-authorize, or a job lookup miss).
const POOL_FALLBACK_RECIPIENT: &str = "BRICSpoolPayoutWallet";

/// A running Stratum server bound to one TCP listener.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
}

impl Server {
    pub async fn bind(addr: SocketAddr, store: Arc<dyn ChainStore>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (job_feed, _rx) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        let ctx = Arc::new(ConnectionContext {
            jobs: Arc::new(JobManager::new()),
            store,
            online_miners: Arc::new(RwLock::new(HashMap::new())),
            extranonce1_counter: AtomicU32::new(0),
            job_feed,
            latest_template: RwLock::new(None),
        });
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run forever: accept connections, rotate jobs every
    /// [`JOB_REFRESH_SECS`], and purge stale shares every
    /// [`SHARE_PURGE_INTERVAL_SECS`].
    pub async fn run(self) -> std::io::Result<()> {
        let ctx = self.ctx;
        rebuild_and_broadcast(&ctx, true).await;

        let rotation_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(JOB_REFRESH_SECS));
            ticker.tick().await; // first tick fires immediately, skip it
            loop {
                ticker.tick().await;
                rebuild_and_broadcast(&rotation_ctx, true).await;
            }
        });

        let purge_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(SHARE_PURGE_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                purge_ctx
                    .store
                    .purge_shares_older_than(Duration::from_secs(
                        crate::constants::SHARE_RETENTION_SECS,
                    ))
                    .await;
            }
        });

        loop {
            let (stream, peer) = self.listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                warn!(%peer, error = %e, "failed to set TCP_NODELAY");
            }
            let conn_ctx = ctx.clone();
            tokio::spawn(async move {
                handle_connection(stream, peer, conn_ctx).await;
            });
        }
    }
}

/// Rebuild the block template, publish a fresh fallback job from it, and
/// broadcast the template so every subscribed+authorized connection
/// personalizes and pushes its own job (§4.6, §4.10). Called on the
/// periodic rotation tick and immediately on block acceptance, both with
/// `clean_jobs=true`.
pub(crate) async fn rebuild_and_broadcast(ctx: &Arc<ConnectionContext>, clean_jobs: bool) {
    let block_template = build_template(ctx.store.as_ref()).await;

    let other_tx_hashes: Vec<Hash256> = block_template
        .transactions
        .iter()
        .map(|tx| chain_core::double_sha256(tx.id.as_bytes()))
        .collect();
    let branch = merkle_branch(&other_tx_hashes);

    let version = u32::from_str_radix(STRATUM_VERSION, 16).unwrap_or(0x2000_0000);

    let template = Arc::new(JobTemplate {
        height: block_template.height,
        previous_hash_display: block_template.previous_hash,
        merkle_branch: branch,
        version,
        nbits: compact_bits_for(block_template.difficulty),
        ntime: block_template.timestamp,
        difficulty: block_template.difficulty,
        pending_tx_ids: block_template.pending_tx_ids.clone(),
        reward: block_template.reward,
        clean_jobs,
        extranonce2_size: EXTRANONCE2_SIZE,
    });

    *ctx.latest_template.write().await = Some(template.clone());

    let fallback_job = template.personalize(
        ctx.jobs.next_job_id(),
        POOL_FALLBACK_RECIPIENT,
        EXTRANONCE1_BYTES,
    );
    let fallback_job_id = fallback_job.job_id.clone();
    ctx.jobs.publish_fallback(fallback_job).await;

    // No receivers yet (no connections) is not an error, just nobody to tell.
    let _ = ctx.job_feed.send(template.clone());

    info!(
        job_id = fallback_job_id,
        height = block_template.height,
        prevhash = %hex::encode(block_template.previous_hash),
        "published job template"
    );
}

/// Map an integer pool difficulty to compact `nbits`. `difficulty` here is
/// chain difficulty (§4.2), distinct from per-share vardiff.
fn compact_bits_for(difficulty: u64) -> u32 {
    use num_bigint::BigUint;
    let diff_1 = crate::header::bits_to_target(0x1d00_ffff);
    if difficulty <= 1 {
        return 0x1d00_ffff;
    }
    let target = diff_1 / BigUint::from(difficulty);
    crate::header::target_to_bits(&target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::InMemoryChainStore;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn bind_publishes_an_initial_job() {
        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::default());
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let server = Server::bind(addr, store).await.unwrap();
        rebuild_and_broadcast(&server.ctx, true).await;
        assert!(server.ctx.jobs.latest_fallback_job_id().await.is_some());
        assert!(server.ctx.latest_template.read().await.is_some());
    }

    #[test]
    fn compact_bits_round_trip_for_difficulty_one() {
        assert_eq!(compact_bits_for(1), 0x1d00_ffff);
    }
}
