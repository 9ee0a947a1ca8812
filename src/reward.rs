//! Reward curve
//!
//! A block pays little early in its window and rises steeply towards the
//! deadline. Progress through the window is fed through a logistic curve
//! centred on the midpoint:
//!
//! ```text
//! x = (now - creation) / (deadline - creation)
//! s(x) = 1 / (1 + exp(-k * (2x - 1)))
//! r = min_reward + (max_reward - min_reward) * s(x)
//! reward = price * (base_rate + float_rate) * r
//! ```

use crate::block::DataBlock;
use crate::clock::Timestamp;
use crate::error::{AuctionError, Result};

/// Logistic shape with steepness `k`. `logistic(0.5, k) == 0.5` for every `k`.
pub fn logistic(x: f64, k: f64) -> f64 {
    1.0 / (1.0 + (-k * (2.0 * x - 1.0)).exp())
}

/// Current reward offered by `block` at `now`.
///
/// Fails with [`AuctionError::Domain`] for a zero-length window or an instant
/// outside `[creation_time, deadline]`. Callers are expected to have filtered
/// through eligibility first, so either case points at a logic bug.
pub fn reward(block: &DataBlock, now: Timestamp) -> Result<f64> {
    let window = block.deadline - block.creation_time;
    if window <= 0 {
        return Err(AuctionError::Domain(format!(
            "block {} has an empty reward window ({} -> {})",
            block.block_id, block.creation_time, block.deadline
        )));
    }
    if now < block.creation_time || now > block.deadline {
        return Err(AuctionError::Domain(format!(
            "reward for block {} requested at {} outside window {}..={}",
            block.block_id, now, block.creation_time, block.deadline
        )));
    }

    let elapsed = (now - block.creation_time) as f64;
    let progress = elapsed / window as f64;
    let shaped = logistic(progress, block.growth_speed);
    let interpolated = block.min_reward + (block.max_reward - block.min_reward) * shaped;

    Ok(block.scale() * interpolated)
}
