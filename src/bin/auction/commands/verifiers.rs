//! Verifier commands

use anyhow::Result;

use crate::client::AuctionClient;
use crate::style::*;
use verification_auction::encoding::decode_hex;
use verification_auction::{Credential, Verifier};

fn credential_label(verifier: &Verifier) -> String {
    verifier
        .credential
        .as_ref()
        .map(|c| truncate_hex(&hex::encode(c.as_bytes())))
        .unwrap_or_else(|| "-".to_string())
}

pub async fn list(url: &str) -> Result<()> {
    let client = AuctionClient::new(url);
    let verifiers = client.verifiers().await?;

    print_header("Verifiers");
    if verifiers.is_empty() {
        print_info("No verifiers registered yet.");
        return Ok(());
    }

    println!();
    println!(
        "{:>6}  {:>10}  {:>10}  {:>8}  Credential",
        "Id", "Bid", "Score", "Pending"
    );
    println!("{}", "─".repeat(60));
    for v in &verifiers {
        let bid = v
            .bid_price
            .map(|b| format!("{:.4}", b))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>6}  {:>10}  {:>10.4}  {:>8}  {}",
            v.verifier_id,
            bid,
            v.total_score,
            v.pending_count(),
            style_dim(&credential_label(v))
        );
    }
    Ok(())
}

pub async fn add(url: &str, verifier_id: u64, bid_price: f64) -> Result<()> {
    let client = AuctionClient::new(url);
    let verifier = client.add_verifier(verifier_id, bid_price).await?;
    print_success(&format!(
        "Registered verifier {} asking {} (session {})",
        verifier.verifier_id, bid_price, verifier.session_id
    ));
    Ok(())
}

pub async fn bid(url: &str, verifier_id: u64, bid_price: f64) -> Result<()> {
    let client = AuctionClient::new(url);
    let verifier = client.update_bid(verifier_id, bid_price).await?;
    print_success(&format!(
        "Verifier {} now asks {}",
        verifier.verifier_id, bid_price
    ));
    Ok(())
}

pub async fn credential(url: &str, public_key: &str) -> Result<()> {
    let client = AuctionClient::new(url);
    let credential = Credential::new(decode_hex(public_key)?);
    let registration = client.register_credential(credential).await?;

    let verifier = &registration.verifier;
    if registration.created {
        print_success(&format!(
            "Registered verifier {} (session {})",
            verifier.verifier_id, verifier.session_id
        ));
    } else {
        print_info(&format!(
            "Welcome back, verifier {} ({} pending)",
            verifier.verifier_id,
            verifier.pending_count()
        ));
    }
    if let Some(pending) = registration.pending {
        println!(
            "  Next request: {} for hash {}",
            style_bold(pending.request_id.as_str()),
            truncate_hex(&hex::encode(&pending.verification_hash))
        );
    }
    Ok(())
}
