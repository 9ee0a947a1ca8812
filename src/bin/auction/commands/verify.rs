//! Verification request commands

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Args;

use crate::client::AuctionClient;
use crate::style::*;
use verification_auction::encoding::decode_hex;
use verification_auction::server::SubmitVerification;
use verification_auction::{file_digest, HashAlgorithm, RequestStatus, VerificationRequest};

#[derive(Args)]
pub struct SubmitArgs {
    /// Requester public key (hex)
    #[arg(long)]
    pub public_key: String,

    /// Verification hash (hex)
    #[arg(long, conflicts_with = "file")]
    pub hash: Option<String>,

    /// Hash this file with sha256 instead of passing --hash
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Signature over the hash (hex)
    #[arg(long)]
    pub signature: String,
}

fn print_request(request: &VerificationRequest) {
    let status = match &request.status {
        RequestStatus::Pending => style_yellow("pending"),
        RequestStatus::Accepted => style_green("accepted"),
        RequestStatus::Rejected => style_red("rejected"),
        RequestStatus::Other(label) => style_dim(label),
    };
    println!("  Request:   {}", style_bold(request.request_id.as_str()));
    println!("  Status:    {}", status);
    println!(
        "  Verifier:  {}",
        truncate_hex(&hex::encode(&request.verifier_public_key))
    );
    println!(
        "  Hash:      {}",
        truncate_hex(&hex::encode(&request.verification_hash))
    );
}

pub async fn submit(url: &str, args: SubmitArgs) -> Result<()> {
    let verification_hash = match (&args.hash, &args.file) {
        (Some(hash), _) => decode_hex(hash)?,
        (None, Some(file)) => decode_hex(&file_digest(file, HashAlgorithm::Sha256)?)?,
        (None, None) => bail!("either --hash or --file is required"),
    };
    let body = SubmitVerification {
        requester_public_key: decode_hex(&args.public_key)?,
        verification_hash,
        hash_signature: decode_hex(&args.signature)?,
    };

    let client = AuctionClient::new(url);
    let request = client.submit(&body).await?;
    print_success("Verification request queued");
    print_request(&request);
    Ok(())
}

pub async fn show(url: &str, request_id: &str) -> Result<()> {
    let client = AuctionClient::new(url);
    let request = client.request(request_id).await?;
    print_header("Verification Request");
    print_request(&request);
    Ok(())
}

pub async fn report(url: &str, request_id: &str, status: &str) -> Result<()> {
    let client = AuctionClient::new(url);
    let request = client
        .report(request_id, RequestStatus::from(status))
        .await?;
    print_success(&format!(
        "Request {} is now {}",
        request.request_id, request.status
    ));
    Ok(())
}

pub async fn check(url: &str, request_id: &str) -> Result<()> {
    let client = AuctionClient::new(url);
    let report = client.check(request_id).await?;
    match report.status {
        RequestStatus::Accepted => {
            print_success(&format!("Request {} signature is valid", request_id))
        }
        RequestStatus::Rejected => {
            print_error(&format!("Request {} signature is invalid", request_id))
        }
        other => print_info(&format!("Request {} is {}", request_id, other)),
    }
    Ok(())
}

pub fn hash(file: &Path, algorithm: &str) -> Result<()> {
    let algorithm: HashAlgorithm = algorithm.parse()?;
    let digest = file_digest(file, algorithm)?;
    println!("{}  {}", digest, file.display());
    Ok(())
}
