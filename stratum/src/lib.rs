//! Stratum v1 mining server: the block-assembly pipeline described by
//! components C1–C10. This crate owns everything downstream of the chain
//! store — difficulty, templates, coinbase/header construction, job
//! lifecycle, share validation, vardiff, the per-connection protocol state
//! machine, and the TCP accept/broadcast loop.

use thiserror::Error;

pub mod coinbase;
pub mod connection;
pub mod difficulty;
pub mod header;
pub mod job;
pub mod pplns;
pub mod protocol;
pub mod server;
pub mod template;
pub mod validator;
pub mod vardiff;

/// Errors produced while assembling or validating Stratum jobs and shares.
/// These never cross a connection boundary as-is — §7's error taxonomy maps
/// them to either a Stratum rejection code or a silent log line.
#[derive(Debug, Error)]
pub enum StratumError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("header must be exactly 80 bytes, got {0}")]
    BadHeaderLength(usize),

    #[error("Job not found")]
    JobNotFound(String),

    #[error("Duplicate share")]
    DuplicateShare,

    #[error("Low difficulty share")]
    LowDifficultyShare,

    #[error("Unauthorized worker")]
    UnauthorizedWorker,
}

/// Stratum JSON-RPC error codes used by the Share Validator (§6).
pub mod error_code {
    pub const DUPLICATE_SHARE: i64 = 22;
    pub const LOW_DIFFICULTY_SHARE: i64 = 23;
    pub const UNAUTHORIZED_WORKER: i64 = 24;
    #[allow(dead_code)]
    pub const JOB_NOT_FOUND: i64 = 21;
}

/// Constants pinned by §4/§6/§9.
pub mod constants {
    pub const INITIAL_SHARE_DIFFICULTY: f64 = 1.0;
    pub const MAX_SHARE_DIFFICULTY: f64 = 1_000_000.0;
    pub const MIN_SHARE_DIFFICULTY: f64 = 1.0;
    pub const VARDIFF_WINDOW: usize = 20;
    pub const VARDIFF_SAMPLE_EVERY: u64 = 15;
    pub const VARDIFF_LOW_SECS: f64 = 8.0;
    pub const VARDIFF_HIGH_SECS: f64 = 30.0;
    pub const SHARE_RETENTION_SECS: u64 = 3600;
    pub const PPLNS_WINDOW: usize = 1000;
    pub const JOB_REFRESH_SECS: u64 = 30;
    pub const SHARE_PURGE_INTERVAL_SECS: u64 = 300;
    pub const EXTRANONCE2_SIZE: usize = 4;
    pub const EXTRANONCE1_BYTES: usize = 4;
    pub const STRATUM_VERSION: &str = "20000000";
}
