//! Verification Auction Server
//!
//! Runs the auction loop and serves the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use verification_auction::{AuctionService, Config, SqliteStore, SystemClock};

#[derive(Parser)]
#[command(name = "auction-server")]
#[command(version)]
#[command(about = "Verification auction server", long_about = None)]
struct Args {
    /// Configuration file (embedded defaults when absent)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Host to bind
    #[arg(long, env = "AUCTION_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "AUCTION_PORT")]
    port: Option<u16>,

    /// SQLite database path
    #[arg(long, env = "AUCTION_DB_PATH")]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load_from(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(path) = args.db_path {
        config.storage.path = path;
    }

    info!("Starting Verification Auction Server");

    let store = Arc::new(
        SqliteStore::new(&config.storage.path)
            .with_context(|| format!("Failed to open database {}", config.storage.path))?,
    );
    let mut service = AuctionService::open(config.auction.clone(), store, Arc::new(SystemClock))
        .context("Failed to restore auction state")?;
    match config.signing.build_signer()? {
        Some(signer) => {
            info!("Signature checks use the {:?} backend", config.signing.backend);
            service = service.with_signer(signer);
        }
        None => info!("No signing backend configured, signature checks disabled"),
    }
    info!(
        "Auction state loaded: {} blocks, {} verifiers",
        service.blocks().len(),
        service.verifiers().len()
    );

    verification_auction::server::run_server(&config, Arc::new(service)).await
}
