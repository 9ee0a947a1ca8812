//! Block commands

use anyhow::Result;
use clap::Args;

use crate::client::AuctionClient;
use crate::style::*;
use verification_auction::{BlockParams, BlockState};

#[derive(Args)]
pub struct AddBlockArgs {
    /// Block id (must be unused)
    #[arg(long)]
    pub id: u64,

    /// Block price
    #[arg(long)]
    pub price: f64,

    /// Base reward rate
    #[arg(long, default_value = "0.05")]
    pub base_rate: f64,

    /// Float reward rate
    #[arg(long, default_value = "0.02")]
    pub float_rate: f64,

    /// Lower reward bound
    #[arg(long, default_value = "1.0")]
    pub min_reward: f64,

    /// Upper reward bound
    #[arg(long, default_value = "10.0")]
    pub max_reward: f64,

    /// Deadline as Unix seconds
    #[arg(long, conflicts_with = "duration", required_unless_present = "duration")]
    pub deadline: Option<i64>,

    /// Deadline as seconds from now
    #[arg(long)]
    pub duration: Option<i64>,

    /// Curve steepness (server default when omitted)
    #[arg(long)]
    pub growth_speed: Option<f64>,
}

impl AddBlockArgs {
    fn into_params(self) -> BlockParams {
        let deadline = match (self.deadline, self.duration) {
            (Some(deadline), _) => deadline,
            (None, Some(duration)) => chrono::Utc::now().timestamp() + duration,
            (None, None) => chrono::Utc::now().timestamp(),
        };
        BlockParams {
            block_id: self.id,
            price: self.price,
            base_reward_rate: self.base_rate,
            float_reward_rate: self.float_rate,
            min_reward: self.min_reward,
            max_reward: self.max_reward,
            deadline,
            growth_speed: self.growth_speed,
        }
    }
}

pub async fn list(url: &str) -> Result<()> {
    let client = AuctionClient::new(url);
    let blocks = client.blocks().await?;

    print_header("Data Blocks");
    if blocks.is_empty() {
        print_info("No blocks registered yet.");
        return Ok(());
    }

    println!();
    println!(
        "{:>8}  {:>10}  {:<10}  {:>10}  {:>12}",
        "Block", "Price", "State", "Reward", "Deadline"
    );
    println!("{}", "─".repeat(58));

    for view in &blocks {
        let state = match view.state {
            BlockState::Active => style_green("active    "),
            BlockState::Verified => style_cyan("verified  "),
            BlockState::Expired => style_dim("expired   "),
            BlockState::Scheduled => style_yellow("scheduled "),
        };
        let reward = view
            .current_reward
            .map(|r| format!("{:.4}", r))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>8}  {:>10.2}  {}  {:>10}  {:>12}",
            view.block.block_id, view.block.price, state, reward, view.block.deadline
        );
    }

    println!();
    println!("Total blocks: {}", blocks.len());
    Ok(())
}

pub async fn add(url: &str, args: AddBlockArgs) -> Result<()> {
    let client = AuctionClient::new(url);
    let block = client.add_block(&args.into_params()).await?;
    print_success(&format!(
        "Registered block {} (deadline {}, growth speed {})",
        block.block_id, block.deadline, block.growth_speed
    ));
    Ok(())
}
