//! Auction engine
//!
//! Holds the block pool, scans it for eligible blocks and matches verifier
//! bids against the current reward of each block.
//!
//! # Locking
//!
//! Blocks live behind one mutex, verifiers (shared with the router) behind
//! another. Any path that needs both takes blocks first. A successful bid
//! flips `verified` and credits the verifier while holding both locks, so no
//! reader ever sees one change without the other.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::block::{BlockId, BlockParams, BlockState, DataBlock};
use crate::clock::{Clock, Timestamp};
use crate::config::AuctionConfig;
use crate::error::{AuctionError, Result};
use crate::reward;
use crate::storage::AuctionSnapshot;
use crate::verifier::{validate_bid, SharedVerifiers, Verifier, VerifierId, VerifierSet};

/// How a verifier's asking price is compared with the block reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceRule {
    /// Accept when `bid_price <= reward`: the verifier works for at most
    /// what the block currently pays.
    #[default]
    AskAtMostReward,
    /// Accept when `bid_price >= reward`.
    AskAtLeastReward,
}

impl AcceptanceRule {
    pub fn accepts(self, bid_price: f64, reward: f64) -> bool {
        match self {
            Self::AskAtMostReward => bid_price <= reward,
            Self::AskAtLeastReward => bid_price >= reward,
        }
    }
}

/// A block won by a verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Award {
    pub block_id: BlockId,
    pub verifier_id: VerifierId,
    pub reward: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummary {
    pub now: Timestamp,
    /// Blocks that were eligible when the round started.
    pub eligible: usize,
    pub awards: Vec<Award>,
}

impl RoundSummary {
    pub fn remaining(&self) -> usize {
        self.eligible.saturating_sub(self.awards.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    DurationElapsed,
    NoEligibleBlocks,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSummary {
    pub rounds: u32,
    pub awards: Vec<Award>,
    pub stop: StopReason,
}

enum BidOutcome {
    Accepted(f64),
    Rejected(f64),
    AlreadyVerified,
    NoStandingBid,
}

pub struct AuctionEngine {
    blocks: Mutex<Vec<DataBlock>>,
    verifiers: SharedVerifiers,
    clock: Arc<dyn Clock>,
    default_growth_speed: f64,
    acceptance: AcceptanceRule,
}

impl AuctionEngine {
    pub fn new(config: &AuctionConfig, verifiers: SharedVerifiers, clock: Arc<dyn Clock>) -> Self {
        Self {
            blocks: Mutex::new(Vec::new()),
            verifiers,
            clock,
            default_growth_speed: config.default_growth_speed,
            acceptance: config.acceptance,
        }
    }

    /// Consistent copy of blocks and verifiers, taken under both locks.
    pub fn snapshot(&self) -> AuctionSnapshot {
        let blocks = self.blocks.lock();
        let verifiers = self.verifiers.lock();
        AuctionSnapshot {
            blocks: blocks.clone(),
            verifiers: verifiers.snapshot(),
        }
    }

    /// Replace all state with a persisted snapshot. Nothing changes if the
    /// snapshot repeats a block or verifier id.
    pub fn restore(&self, snapshot: AuctionSnapshot) -> Result<()> {
        let mut seen = HashSet::new();
        if let Some(dup) = snapshot
            .blocks
            .iter()
            .find(|b| !seen.insert(b.block_id))
        {
            return Err(AuctionError::Validation(format!(
                "snapshot repeats block id {}",
                dup.block_id
            )));
        }
        let set = VerifierSet::from_verifiers(snapshot.verifiers)?;

        let mut blocks = self.blocks.lock();
        let mut verifiers = self.verifiers.lock();
        info!(
            "Restored {} blocks and {} verifiers",
            snapshot.blocks.len(),
            set.len()
        );
        *blocks = snapshot.blocks;
        *verifiers = set;
        Ok(())
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn acceptance(&self) -> AcceptanceRule {
        self.acceptance
    }

    /// Register a block, stamping its creation time from the engine clock.
    /// Block ids must be unique.
    pub fn register_block(&self, params: BlockParams) -> Result<DataBlock> {
        let now = self.clock.now();
        let block = DataBlock::new(params, self.default_growth_speed, now)?;

        let mut blocks = self.blocks.lock();
        if blocks.iter().any(|b| b.block_id == block.block_id) {
            return Err(AuctionError::Validation(format!(
                "block id {} already registered",
                block.block_id
            )));
        }
        blocks.push(block.clone());

        info!(
            "Registered block {} (deadline in {}s, scale {:.4})",
            block.block_id,
            block.deadline - now,
            block.scale()
        );
        Ok(block)
    }

    pub fn register_verifier(&self, verifier_id: VerifierId, bid_price: f64) -> Result<Verifier> {
        let verifier = self
            .verifiers
            .lock()
            .insert_bidder(verifier_id, bid_price)?
            .clone();
        info!("Registered verifier {} bidding {}", verifier_id, bid_price);
        Ok(verifier)
    }

    /// Replace a verifier's standing bid.
    pub fn update_bid(&self, verifier_id: VerifierId, bid_price: f64) -> Result<Verifier> {
        validate_bid(bid_price)?;
        let mut verifiers = self.verifiers.lock();
        let verifier = verifiers
            .get_mut(verifier_id)
            .ok_or_else(|| AuctionError::NotFound(format!("verifier {}", verifier_id)))?;
        verifier.bid_price = Some(bid_price);
        debug!("Verifier {} now bids {}", verifier_id, bid_price);
        Ok(verifier.clone())
    }

    /// Eligible blocks at `now`, in registration order.
    pub fn scan_eligible(&self, now: Timestamp) -> Vec<DataBlock> {
        self.blocks
            .lock()
            .iter()
            .filter(|b| b.is_eligible(now))
            .cloned()
            .collect()
    }

    /// Try to award `block_id` to `verifier_id` at `now`.
    ///
    /// Returns `Ok(false)` when the ask is not met, when the verifier holds
    /// no bid, or when another bid already verified the block. Expiry is not
    /// re-checked here; bidding on an expired block surfaces the
    /// [`AuctionError::Domain`] raised by the reward curve.
    pub fn attempt_bid(
        &self,
        block_id: BlockId,
        verifier_id: VerifierId,
        now: Timestamp,
    ) -> Result<bool> {
        Ok(matches!(
            self.resolve_bid(block_id, verifier_id, now)?,
            BidOutcome::Accepted(_)
        ))
    }

    fn resolve_bid(
        &self,
        block_id: BlockId,
        verifier_id: VerifierId,
        now: Timestamp,
    ) -> Result<BidOutcome> {
        let mut blocks = self.blocks.lock();
        let block = blocks
            .iter_mut()
            .find(|b| b.block_id == block_id)
            .ok_or_else(|| AuctionError::NotFound(format!("block {}", block_id)))?;

        let mut verifiers = self.verifiers.lock();
        let verifier = verifiers
            .get_mut(verifier_id)
            .ok_or_else(|| AuctionError::NotFound(format!("verifier {}", verifier_id)))?;

        if block.verified {
            debug!(
                "Bid by verifier {} on block {} lost: already verified",
                verifier_id, block_id
            );
            return Ok(BidOutcome::AlreadyVerified);
        }
        let Some(bid_price) = verifier.bid_price else {
            return Ok(BidOutcome::NoStandingBid);
        };

        let reward = reward::reward(block, now)?;
        if !self.acceptance.accepts(bid_price, reward) {
            debug!(
                "Verifier {} bid {} rejected on block {} (reward {:.4})",
                verifier_id, bid_price, block_id, reward
            );
            return Ok(BidOutcome::Rejected(reward));
        }

        block.mark_verified();
        verifier.total_score += reward;
        info!(
            "Verifier {} verified block {} and earned {:.4}",
            verifier_id, block_id, reward
        );
        Ok(BidOutcome::Accepted(reward))
    }

    /// One pass over the eligible blocks. Each block goes to the first
    /// verifier, in registration order, whose bid is accepted.
    pub fn run_auction_round(&self, now: Timestamp) -> Result<RoundSummary> {
        let eligible = self.scan_eligible(now);
        let bidders: Vec<VerifierId> = self
            .verifiers
            .lock()
            .iter()
            .filter(|v| v.bid_price.is_some())
            .map(|v| v.verifier_id)
            .collect();

        let mut awards = Vec::new();
        for block in &eligible {
            for &verifier_id in &bidders {
                match self.resolve_bid(block.block_id, verifier_id, now)? {
                    BidOutcome::Accepted(reward) => {
                        awards.push(Award {
                            block_id: block.block_id,
                            verifier_id,
                            reward,
                        });
                        break;
                    }
                    BidOutcome::AlreadyVerified => break,
                    BidOutcome::Rejected(_) | BidOutcome::NoStandingBid => {}
                }
            }
        }

        debug!(
            "Auction round at {}: {} eligible, {} awarded",
            now,
            eligible.len(),
            awards.len()
        );
        Ok(RoundSummary {
            now,
            eligible: eligible.len(),
            awards,
        })
    }

    /// Run rounds every `tick` until `duration` has elapsed, no eligible
    /// blocks remain, or `shutdown` flips to `true`. Shutdown is honoured at
    /// tick boundaries; a round in progress always completes. A dropped
    /// shutdown sender counts as cancellation.
    pub async fn run_auction_loop(
        &self,
        duration: Duration,
        tick: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Result<LoopSummary> {
        self.run_auction_loop_with(duration, tick, shutdown, |_| Ok(()))
            .await
    }

    /// [`Self::run_auction_loop`] with `on_round` called after every round.
    /// An error from `on_round` ends the loop with that error.
    pub async fn run_auction_loop_with<F>(
        &self,
        duration: Duration,
        tick: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut on_round: F,
    ) -> Result<LoopSummary>
    where
        F: FnMut(&RoundSummary) -> Result<()>,
    {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut rounds = 0;
        let mut awards = Vec::new();

        let stop = loop {
            if *shutdown.borrow() {
                break StopReason::Cancelled;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break StopReason::Cancelled;
                    }
                    continue;
                }
            }
            if started.elapsed() >= duration {
                break StopReason::DurationElapsed;
            }

            let round = self.run_auction_round(self.clock.now())?;
            rounds += 1;
            on_round(&round)?;
            let remaining = round.remaining();
            awards.extend(round.awards);
            if remaining == 0 {
                break StopReason::NoEligibleBlocks;
            }
        };

        match stop {
            StopReason::Cancelled => warn!("Auction loop cancelled after {} rounds", rounds),
            _ if awards.is_empty() => debug!(
                "Auction loop finished after {} rounds ({:?}) with no awards",
                rounds, stop
            ),
            _ => info!(
                "Auction loop finished after {} rounds ({:?}), {} blocks awarded",
                rounds,
                stop,
                awards.len()
            ),
        }

        Ok(LoopSummary {
            rounds,
            awards,
            stop,
        })
    }

    pub fn blocks(&self) -> Vec<DataBlock> {
        self.blocks.lock().clone()
    }

    pub fn block(&self, block_id: BlockId) -> Option<DataBlock> {
        self.blocks
            .lock()
            .iter()
            .find(|b| b.block_id == block_id)
            .cloned()
    }

    pub fn block_state(&self, block_id: BlockId, now: Timestamp) -> Result<BlockState> {
        self.block(block_id)
            .map(|b| b.state(now))
            .ok_or_else(|| AuctionError::NotFound(format!("block {}", block_id)))
    }

    pub fn verifiers(&self) -> Vec<Verifier> {
        self.verifiers.lock().snapshot()
    }

    pub fn verifier(&self, verifier_id: VerifierId) -> Option<Verifier> {
        self.verifiers.lock().get(verifier_id).cloned()
    }

    /// Verifiers by total score, highest first; ties keep registration order.
    pub fn leaderboard(&self) -> Vec<Verifier> {
        let mut verifiers = self.verifiers();
        verifiers.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        verifiers
    }
}
