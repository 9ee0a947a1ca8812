//! Data blocks awaiting verification
//!
//! A block is open for bidding between its creation time and its deadline
//! while unverified. Expiry is never stored: it is derived from the clock on
//! every read, so an expired block simply stops showing up as eligible.

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::{AuctionError, Result};

pub type BlockId = u64;

/// Default curve steepness when a registration does not supply one.
pub const DEFAULT_GROWTH_SPEED: f64 = 1.0;

/// Registration parameters for a new block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockParams {
    pub block_id: BlockId,
    pub price: f64,
    pub base_reward_rate: f64,
    pub float_reward_rate: f64,
    pub min_reward: f64,
    pub max_reward: f64,
    /// Unix-epoch seconds.
    pub deadline: Timestamp,
    #[serde(default)]
    pub growth_speed: Option<f64>,
}

impl BlockParams {
    /// Check the parameters against a registration time of `now`.
    pub fn validate(&self, now: Timestamp) -> Result<()> {
        let finite = [
            ("price", self.price),
            ("base_reward_rate", self.base_reward_rate),
            ("float_reward_rate", self.float_reward_rate),
            ("min_reward", self.min_reward),
            ("max_reward", self.max_reward),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(AuctionError::Validation(format!(
                    "{} must be a finite number",
                    name
                )));
            }
        }
        if self.price < 0.0 {
            return Err(AuctionError::Validation(format!(
                "price must be non-negative, got {}",
                self.price
            )));
        }
        if self.min_reward > self.max_reward {
            return Err(AuctionError::Validation(format!(
                "min_reward {} exceeds max_reward {}",
                self.min_reward, self.max_reward
            )));
        }
        if self.deadline <= now {
            return Err(AuctionError::Validation(format!(
                "deadline {} is not after registration time {}",
                self.deadline, now
            )));
        }
        if let Some(k) = self.growth_speed {
            if !k.is_finite() || k <= 0.0 {
                return Err(AuctionError::Validation(format!(
                    "growth_speed must be positive, got {}",
                    k
                )));
            }
        }
        Ok(())
    }
}

/// Lifecycle position of a block at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    /// Clock is behind the creation stamp (restored snapshot, skewed clock).
    Scheduled,
    Active,
    Verified,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBlock {
    pub block_id: BlockId,
    pub price: f64,
    pub base_reward_rate: f64,
    pub float_reward_rate: f64,
    pub min_reward: f64,
    pub max_reward: f64,
    pub creation_time: Timestamp,
    pub deadline: Timestamp,
    pub growth_speed: f64,
    pub verified: bool,
}

impl DataBlock {
    /// Build a block stamped with `now` as its creation time.
    pub fn new(params: BlockParams, default_growth_speed: f64, now: Timestamp) -> Result<Self> {
        params.validate(now)?;
        Ok(Self {
            block_id: params.block_id,
            price: params.price,
            base_reward_rate: params.base_reward_rate,
            float_reward_rate: params.float_reward_rate,
            min_reward: params.min_reward,
            max_reward: params.max_reward,
            creation_time: now,
            deadline: params.deadline,
            growth_speed: params.growth_speed.unwrap_or(default_growth_speed),
            verified: false,
        })
    }

    /// `price * (base + float)`: the factor applied to the interpolated reward.
    pub fn scale(&self) -> f64 {
        self.price * (self.base_reward_rate + self.float_reward_rate)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        !self.verified && now > self.deadline
    }

    pub fn is_eligible(&self, now: Timestamp) -> bool {
        !self.verified && self.creation_time <= now && now <= self.deadline
    }

    pub fn state(&self, now: Timestamp) -> BlockState {
        if self.verified {
            BlockState::Verified
        } else if now > self.deadline {
            BlockState::Expired
        } else if now < self.creation_time {
            BlockState::Scheduled
        } else {
            BlockState::Active
        }
    }

    /// One-way transition; there is no path back to unverified.
    pub(crate) fn mark_verified(&mut self) {
        self.verified = true;
    }
}
