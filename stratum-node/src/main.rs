//! Stratum mining pool node.
//!
//! Binds a TCP listener, serves the Stratum v1 protocol to connecting
//! miners, builds block templates against an in-memory chain store, and
//! rotates jobs on a timer. This is what a pool operator runs.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use chain_core::InMemoryChainStore;
use stratum::server::Server;

/// Stratum mining pool node CLI. Flags override the matching environment
/// variable; both fall back to the defaults below.
#[derive(Parser)]
#[command(name = "stratum-node")]
#[command(about = "Stratum v1 mining pool server", long_about = None)]
struct Cli {
    /// Address the Stratum server listens on.
    #[arg(long, env = "STRATUM_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port the Stratum server listens on.
    #[arg(long, env = "STRATUM_PORT", default_value_t = 3333)]
    port: u16,

    /// Wallet addresses that are never credited for submitted shares,
    /// comma-separated (§4.1 "Wallet blocked").
    #[arg(long, env = "STRATUM_BLOCKED_WALLETS", value_delimiter = ',')]
    blocked_wallets: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(
            "stratum_node=info,stratum=info,chain_core=info".parse()?,
        ))
        .init();

    let cli = Cli::parse();
    let addr = SocketAddr::new(cli.host, cli.port);

    info!(%addr, blocked_wallets = cli.blocked_wallets.len(), "starting stratum node");

    let store = Arc::new(InMemoryChainStore::new(cli.blocked_wallets));
    let server = Server::bind(addr, store).await?;
    info!(bound = %server.local_addr()?, "listening for miners");
    server.run().await?;

    Ok(())
}
