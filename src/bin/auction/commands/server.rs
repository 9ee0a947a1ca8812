//! Server command

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::style::*;
use verification_auction::{AuctionService, Config, SqliteStore, SystemClock};

pub async fn run(
    config_path: &Path,
    host: Option<String>,
    port: Option<u16>,
    db_path: Option<String>,
) -> Result<()> {
    // The global --verbose subscriber may already be installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let mut config = Config::load_from(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(path) = db_path {
        config.storage.path = path;
    }

    let store = Arc::new(
        SqliteStore::new(&config.storage.path)
            .with_context(|| format!("Failed to open database {}", config.storage.path))?,
    );
    let mut service = AuctionService::open(config.auction.clone(), store, Arc::new(SystemClock))
        .context("Failed to restore auction state")?;
    if let Some(signer) = config.signing.build_signer()? {
        print_info(&format!("Signature backend: {:?}", config.signing.backend));
        service = service.with_signer(signer);
    }

    print_info(&format!(
        "Listening on {} ({} blocks, {} verifiers restored)",
        config.bind_address(),
        service.blocks().len(),
        service.verifiers().len()
    ));

    verification_auction::server::run_server(&config, Arc::new(service)).await
}
