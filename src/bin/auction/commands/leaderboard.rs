//! Leaderboard command

use crate::style::*;
use anyhow::Result;

pub async fn run(url: &str, limit: usize) -> Result<()> {
    print_header("Verifier Leaderboard");

    let client = crate::client::AuctionClient::new(url);
    let entries = client.leaderboard().await?;

    if entries.is_empty() {
        print_info("No verifiers registered yet.");
        return Ok(());
    }

    println!();
    println!("{:>4}  {:>8}  {:>12}  {:>10}", "Rank", "Verifier", "Score", "Bid");
    println!("{}", "─".repeat(40));

    for (i, entry) in entries.iter().take(limit).enumerate() {
        let rank = format!("#{}", i + 1);
        let rank_styled = if i == 0 {
            style_yellow(&rank)
        } else if i < 3 {
            style_cyan(&rank)
        } else {
            rank
        };
        let bid = entry
            .bid_price
            .map(|b| format!("{:.4}", b))
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:>4}  {:>8}  {:>12.4}  {:>10}",
            rank_styled, entry.verifier_id, entry.total_score, bid
        );
    }

    println!();
    println!("Total verifiers: {}", entries.len());
    Ok(())
}
