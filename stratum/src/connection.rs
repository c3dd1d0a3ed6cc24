//! Connection State Machine (C9, §4.9).
//!
//! One task per TCP connection. Reads newline-delimited JSON-RPC requests,
//! dispatches `mining.*` methods against the connection's own vardiff/
//! validator state, and listens on a broadcast channel for fresh job
//! templates, personalizing each one with its own worker address before
//! forwarding it as `mining.notify`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use chain_core::ChainStore;

use crate::constants::{EXTRANONCE1_BYTES, INITIAL_SHARE_DIFFICULTY};
use crate::job::{Job, JobManager, JobTemplate};
use crate::protocol::{encode_line, notify_params, ClientMessage, Notification, Response, RpcError};
use crate::validator::{ShareOutcome, ShareSubmission, ShareValidator};
use crate::vardiff::VardiffController;
use crate::{error_code, StratumError};

/// State of one connection's miner identity (§4.9, §5).
#[derive(Debug, Clone)]
pub enum AuthState {
    Unauthorized,
    Authorized { miner: String, worker: String },
}

/// A miner known to be connected right now, keyed by wallet address (§9
/// "online-miners table"). Multiple connections/workers can share an entry.
#[derive(Debug, Clone)]
pub struct OnlineMiner {
    pub workers: Vec<String>,
    pub connected_since: DateTime<Utc>,
}

pub type OnlineMiners = RwLock<HashMap<String, OnlineMiner>>;

/// Shared state every connection task needs a handle to.
pub struct ConnectionContext {
    pub jobs: Arc<JobManager>,
    pub store: Arc<dyn ChainStore>,
    pub online_miners: Arc<OnlineMiners>,
    pub extranonce1_counter: AtomicU32,
    pub job_feed: broadcast::Sender<Arc<JobTemplate>>,
    /// The template behind the most recent broadcast, consulted so a
    /// freshly subscribed/authorized connection can get a job immediately
    /// instead of waiting for the next rotation tick (§4.9).
    pub latest_template: RwLock<Option<Arc<JobTemplate>>>,
}

impl ConnectionContext {
    fn next_extranonce1(&self) -> String {
        let id = self.extranonce1_counter.fetch_add(1, Ordering::Relaxed);
        format!("{:08x}", id)
    }
}

/// Run one connection to completion. Errors from the socket itself end the
/// loop; protocol-level errors are reported to the miner and the loop
/// continues.
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnectionContext>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut job_feed = ctx.job_feed.subscribe();

    let extranonce1 = ctx.next_extranonce1();
    let mut validator = ShareValidator::new(ctx.clone(), extranonce1.clone());
    let mut vardiff = VardiffController::new(INITIAL_SHARE_DIFFICULTY);
    let mut auth = AuthState::Unauthorized;
    let start = std::time::Instant::now();

    info!(%peer, extranonce1, "connection opened");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%peer, error = %e, "read error");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let message: ClientMessage = match serde_json::from_str(&line) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(%peer, error = %e, "unparsable line");
                        continue;
                    }
                };
                if let Err(e) = dispatch(
                    &message,
                    &mut write_half,
                    &ctx,
                    &extranonce1,
                    &mut validator,
                    &mut vardiff,
                    &mut auth,
                    start,
                )
                .await
                {
                    warn!(%peer, error = %e, "connection write failed");
                    break;
                }
            }
            received = job_feed.recv() => {
                match received {
                    Ok(template) => {
                        if let AuthState::Authorized { miner, .. } = &auth {
                            let job = personalize_and_publish(&ctx, &extranonce1, &template, miner).await;
                            if let Err(e) = send_notify(&mut write_half, &job).await {
                                warn!(%peer, error = %e, "failed to push job");
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(%peer, skipped, "job feed lagged, miner will pick up latest notify");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    if let AuthState::Authorized { miner, worker } = &auth {
        deregister_worker(&ctx.online_miners, miner, worker).await;
    }
    ctx.jobs.drop_connection(&extranonce1).await;
    info!(%peer, "connection closed");
}

/// Build this connection's own job from the shared template and register
/// it in the per-connection map (§4.6).
async fn personalize_and_publish(
    ctx: &Arc<ConnectionContext>,
    extranonce1: &str,
    template: &JobTemplate,
    recipient: &str,
) -> Job {
    let job = template.personalize(ctx.jobs.next_job_id(), recipient, EXTRANONCE1_BYTES);
    ctx.jobs.publish_personalized(extranonce1, job.clone()).await;
    job
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    message: &ClientMessage,
    write_half: &mut (impl AsyncWriteExt + Unpin),
    ctx: &Arc<ConnectionContext>,
    extranonce1: &str,
    validator: &mut ShareValidator,
    vardiff: &mut VardiffController,
    auth: &mut AuthState,
    connected_at: std::time::Instant,
) -> std::io::Result<()> {
    let id = message.id.clone().unwrap_or(Value::Null);

    match message.method.as_str() {
        "mining.subscribe" => {
            let result = json!([
                [["mining.set_difficulty", "1"], ["mining.notify", "1"]],
                extranonce1,
                crate::constants::EXTRANONCE2_SIZE,
            ]);
            send(write_half, &Response::ok(id, result)).await?;
            send_set_difficulty(write_half, vardiff.difficulty()).await?;
            if let Some(job) = ctx.jobs.latest_fallback_job().await {
                send_notify(write_half, &job).await?;
            }
            Ok(())
        }

        "mining.authorize" => {
            let worker_name = message
                .params
                .first()
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let miner = worker_name
                .split('.')
                .next()
                .unwrap_or(&worker_name)
                .to_string();

            if ctx.store.is_wallet_blocked(&miner).await {
                let resp = Response::err(
                    id,
                    Value::Bool(false),
                    RpcError::new(error_code::UNAUTHORIZED_WORKER, "Wallet blocked"),
                );
                return send(write_half, &resp).await;
            }

            register_worker(&ctx.online_miners, &miner, &worker_name).await;
            *auth = AuthState::Authorized {
                miner: miner.clone(),
                worker: worker_name,
            };
            send(write_half, &Response::ok(id, Value::Bool(true))).await?;
            send_set_difficulty(write_half, vardiff.difficulty()).await?;

            if let Some(template) = ctx.latest_template.read().await.clone() {
                let job = personalize_and_publish(ctx, extranonce1, &template, &miner).await;
                send_notify(write_half, &job).await?;
            }
            Ok(())
        }

        "mining.configure" => {
            // No vendor extensions are supported; acknowledge with an empty result (§6).
            send(write_half, &Response::ok(id, json!({}))).await
        }

        "mining.suggest_difficulty" => {
            let requested = message
                .params
                .first()
                .and_then(Value::as_f64)
                .unwrap_or(INITIAL_SHARE_DIFFICULTY);
            let applied = vardiff.suggest(requested);
            send_set_difficulty(write_half, applied).await
        }

        "mining.extranonce.subscribe" => send(write_half, &Response::ok(id, Value::Bool(true))).await,

        "mining.submit" => {
            let (miner, worker) = match auth {
                AuthState::Authorized { miner, worker } => (miner.clone(), worker.clone()),
                AuthState::Unauthorized => {
                    return send(
                        write_half,
                        &Response::err(
                            id,
                            Value::Bool(false),
                            RpcError::new(error_code::UNAUTHORIZED_WORKER, "Unauthorized worker"),
                        ),
                    )
                    .await;
                }
            };

            let submission = match parse_submit(&message.params, &miner, &worker) {
                Some(s) => s,
                None => {
                    return send(
                        write_half,
                        &Response::err(id, Value::Bool(false), RpcError::new(-1, "malformed submit params")),
                    )
                    .await
                }
            };

            let outcome = validator.validate(submission, vardiff.difficulty()).await;
            match outcome {
                ShareOutcome::Accepted { .. } => {
                    send(write_half, &Response::ok(id, Value::Bool(true))).await?;
                    let now = connected_at.elapsed().as_secs_f64();
                    if let Some(new_difficulty) = vardiff.record_accepted_share(now) {
                        send_set_difficulty(write_half, new_difficulty).await?;
                    }
                    Ok(())
                }
                ShareOutcome::Rejected(err) => {
                    let code = match err {
                        StratumError::DuplicateShare => error_code::DUPLICATE_SHARE,
                        StratumError::LowDifficultyShare => error_code::LOW_DIFFICULTY_SHARE,
                        StratumError::JobNotFound(_) => error_code::JOB_NOT_FOUND,
                        _ => -1,
                    };
                    send(
                        write_half,
                        &Response::err(id, Value::Bool(false), RpcError::new(code, err.to_string())),
                    )
                    .await
                }
            }
        }

        // Unknown methods reply `true` to maximize client compatibility (§4.9, §7).
        other => {
            debug!(method = other, "unrecognized method");
            send(write_half, &Response::ok(id, Value::Bool(true))).await
        }
    }
}

fn parse_submit(params: &[Value], miner: &str, worker: &str) -> Option<ShareSubmission> {
    let job_id = params.first()?.as_str()?.to_string();
    let extranonce2 = params.get(1)?.as_str()?.to_string();
    let ntime = u32::from_str_radix(params.get(2)?.as_str()?, 16).ok()?;
    let nonce = u32::from_str_radix(params.get(3)?.as_str()?, 16).ok()?;
    Some(ShareSubmission {
        miner: miner.to_string(),
        worker: worker.to_string(),
        job_id,
        extranonce2,
        ntime,
        nonce,
    })
}

async fn send(write_half: &mut (impl AsyncWriteExt + Unpin), response: &Response) -> std::io::Result<()> {
    let line = encode_line(response)?;
    write_half.write_all(line.as_bytes()).await
}

async fn send_set_difficulty(
    write_half: &mut (impl AsyncWriteExt + Unpin),
    difficulty: f64,
) -> std::io::Result<()> {
    let notification = Notification::new("mining.set_difficulty", vec![json!(difficulty)]);
    let line = encode_line(&notification)?;
    write_half.write_all(line.as_bytes()).await
}

async fn send_notify(write_half: &mut (impl AsyncWriteExt + Unpin), job: &Job) -> std::io::Result<()> {
    let wire_prevhash = hex::encode(crate::header::wire_prevhash(&job.previous_hash_display));
    let params = notify_params(job, &wire_prevhash);
    let notification = Notification::new("mining.notify", params);
    let line = encode_line(&notification)?;
    write_half.write_all(line.as_bytes()).await
}

async fn register_worker(table: &OnlineMiners, miner: &str, worker: &str) {
    let mut table = table.write().await;
    let entry = table.entry(miner.to_string()).or_insert_with(|| OnlineMiner {
        workers: Vec::new(),
        connected_since: Utc::now(),
    });
    if !entry.workers.iter().any(|w| w == worker) {
        entry.workers.push(worker.to_string());
    }
}

async fn deregister_worker(table: &OnlineMiners, miner: &str, worker: &str) {
    let mut table = table.write().await;
    if let std::collections::hash_map::Entry::Occupied(mut entry) = table.entry(miner.to_string()) {
        entry.get_mut().workers.retain(|w| w != worker);
        if entry.get().workers.is_empty() {
            entry.remove();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_deregister_clears_entry() {
        let table: Arc<OnlineMiners> = Arc::new(RwLock::new(HashMap::new()));
        register_worker(&table, "alice", "alice.rig1").await;
        register_worker(&table, "alice", "alice.rig2").await;
        {
            let guard = table.read().await;
            assert_eq!(guard.get("alice").unwrap().workers.len(), 2);
        }
        deregister_worker(&table, "alice", "alice.rig1").await;
        deregister_worker(&table, "alice", "alice.rig2").await;
        assert!(table.read().await.get("alice").is_none());
    }

    #[test]
    fn parse_submit_reads_hex_fields() {
        let params = vec![
            json!("1"),
            json!("00000000"),
            json!("5f5e100"),
            json!("deadbeef"),
        ];
        let submission = parse_submit(&params, "alice", "alice.rig1").unwrap();
        assert_eq!(submission.job_id, "1");
        assert_eq!(submission.nonce, 0xdead_beef);
        assert_eq!(submission.ntime, 0x05f5_e100);
    }
}
