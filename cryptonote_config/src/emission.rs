//! Block reward schedule
//!
//! The base reward halves smoothly: every block grants a fixed fraction
//! (`1 / 2^EMISSION_SPEED_FACTOR`) of the coins not yet emitted, with a tail
//! subsidy once the curve bottoms out. Oversize blocks are penalized
//! quadratically up to twice the median weight and are invalid beyond it.

use crate::COIN;

/// Total number of atomic units that will ever be emitted by the curve
pub const MONEY_SUPPLY: u64 = -1i64 as u64;
/// Right-shift applied to the remaining supply to obtain the base reward
pub const EMISSION_SPEED_FACTOR: u64 = 20;
/// Reward floor once the emission curve has flattened out
pub const FINAL_SUBSIDY: u64 = COIN / 2;

/// Errors returned by reward calculation
#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    /// The block is more than twice the median size and grants no reward
    BlockTooBig
}

/// Calculates the reward for the next block
///
/// `median_weight` is the median weight of the trailing reward window and
/// `block_weight` the weight of the block being rewarded. A weight within the
/// full reward zone always grants the full base reward.
pub fn get_block_reward(
    median_weight: usize,
    block_weight: usize,
    already_generated_coins: u64
) -> Result<u64, Error> {
    let base_reward = std::cmp::max(
        (MONEY_SUPPLY - already_generated_coins) >> EMISSION_SPEED_FACTOR,
        FINAL_SUBSIDY
    );

    let median_weight = std::cmp::max(median_weight, crate::BLOCK_GRANTED_FULL_REWARD_ZONE);
    if block_weight <= median_weight {
        return Ok(base_reward);
    }
    if block_weight > 2 * median_weight {
        return Err(Error::BlockTooBig);
    }

    // reward * (1 - ((weight - median) / median)^2), in integer arithmetic
    let excess = (block_weight - median_weight) as u128;
    let median = median_weight as u128;
    let penalized = u128::from(base_reward) * (median * median - excess * excess)
        / (median * median);

    Ok(penalized as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_reward_inside_zone() {
        let reward = get_block_reward(0, 1000, 0).unwrap();
        assert_eq!(reward, MONEY_SUPPLY >> EMISSION_SPEED_FACTOR);
    }

    #[test]
    fn reward_shrinks_as_coins_are_emitted() {
        let early = get_block_reward(0, 1000, 0).unwrap();
        let late = get_block_reward(0, 1000, MONEY_SUPPLY / 2).unwrap();
        assert!(late < early);
    }

    #[test]
    fn tail_emission_floor() {
        let reward = get_block_reward(0, 1000, MONEY_SUPPLY - 1).unwrap();
        assert_eq!(reward, FINAL_SUBSIDY);
    }

    #[test]
    fn penalty_applies_above_median() {
        let median = 2 * crate::BLOCK_GRANTED_FULL_REWARD_ZONE;
        // Tail emission keeps the base reward at a round number here
        let generated = MONEY_SUPPLY - 1;
        let full = get_block_reward(median, median, generated).unwrap();
        let penalized = get_block_reward(median, median + median / 2, generated).unwrap();
        assert!(penalized < full);
        // 50% over the median costs a quarter of the reward
        assert_eq!(penalized, full - full / 4);
    }

    #[test]
    fn oversize_block_rejected() {
        let median = crate::BLOCK_GRANTED_FULL_REWARD_ZONE;
        assert_eq!(
            get_block_reward(median, 2 * median + 1, 0),
            Err(Error::BlockTooBig)
        );
    }
}
