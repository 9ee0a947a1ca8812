//! Verification Auction CLI
//!
//! Command-line client for the auction server.

mod client;
mod commands;
mod style;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use style::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "auction")]
#[command(version)]
#[command(about = "Verification Auction - reward verifiers for checking data blocks", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Auction server URL
    #[arg(
        short,
        long,
        env = "AUCTION_URL",
        default_value = "http://127.0.0.1:8080",
        global = true
    )]
    url: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the auction server
    #[command(visible_alias = "s")]
    Server {
        /// Configuration file
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
    },

    /// List blocks with their state and current reward
    #[command(visible_alias = "b")]
    Blocks,

    /// Register a data block
    AddBlock(commands::blocks::AddBlockArgs),

    /// List verifiers
    #[command(visible_alias = "v")]
    Verifiers,

    /// Register a bidding verifier
    AddVerifier {
        /// Verifier id
        #[arg(long)]
        id: u64,

        /// Asking price
        #[arg(long)]
        bid: f64,
    },

    /// Change a verifier's asking price
    Bid {
        /// Verifier id
        #[arg(long)]
        id: u64,

        /// New asking price
        #[arg(long)]
        price: f64,
    },

    /// Present a verifier credential (hex public key)
    Credential {
        /// Public key as hex
        public_key: String,
    },

    /// View the leaderboard
    #[command(visible_alias = "lb")]
    Leaderboard {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Submit a verification request
    Submit(commands::verify::SubmitArgs),

    /// Show one verification request
    Request {
        /// Request id
        request_id: String,
    },

    /// Report the result of a verification request
    Report {
        /// Request id
        request_id: String,

        /// New status (accepted, rejected, or any label)
        status: String,
    },

    /// Have the server's signature backend settle a request
    Check {
        /// Request id
        request_id: String,
    },

    /// Run one auction round on the server
    Tick,

    /// Compute a file digest locally
    Hash {
        /// File to hash
        file: PathBuf,

        /// Digest algorithm (md5, sha1, sha256, sha512)
        #[arg(short, long, default_value = "sha256")]
        algorithm: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let url = cli.url.as_str();
    let result = match cli.command {
        Commands::Server {
            config,
            host,
            port,
            db_path,
        } => {
            print_banner();
            commands::server::run(&config, host, port, db_path).await
        }
        Commands::Blocks => commands::blocks::list(url).await,
        Commands::AddBlock(args) => commands::blocks::add(url, args).await,
        Commands::Verifiers => commands::verifiers::list(url).await,
        Commands::AddVerifier { id, bid } => commands::verifiers::add(url, id, bid).await,
        Commands::Bid { id, price } => commands::verifiers::bid(url, id, price).await,
        Commands::Credential { public_key } => {
            commands::verifiers::credential(url, &public_key).await
        }
        Commands::Leaderboard { limit } => commands::leaderboard::run(url, limit).await,
        Commands::Submit(args) => commands::verify::submit(url, args).await,
        Commands::Request { request_id } => commands::verify::show(url, &request_id).await,
        Commands::Report { request_id, status } => {
            commands::verify::report(url, &request_id, &status).await
        }
        Commands::Check { request_id } => commands::verify::check(url, &request_id).await,
        Commands::Tick => commands::tick::run(url).await,
        Commands::Hash { file, algorithm } => commands::verify::hash(&file, &algorithm),
    };

    if let Err(e) = result {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

pub fn print_banner() {
    println!();
    println!("  {}", style_cyan("verification auction"));
    println!("  {}", style_dim(&format!("v{}", VERSION)));
    println!();
}
