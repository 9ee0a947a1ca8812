//! Auction round command

use anyhow::Result;

use crate::client::AuctionClient;
use crate::style::*;

pub async fn run(url: &str) -> Result<()> {
    let client = AuctionClient::new(url);
    let round = client.tick().await?;

    if round.awards.is_empty() {
        print_info(&format!(
            "No awards ({} eligible blocks at {})",
            round.eligible, round.now
        ));
        return Ok(());
    }

    for award in &round.awards {
        print_success(&format!(
            "Block {} -> verifier {} for {:.4}",
            award.block_id, award.verifier_id, award.reward
        ));
    }
    println!("{} of {} eligible blocks awarded", round.awards.len(), round.eligible);
    Ok(())
}
