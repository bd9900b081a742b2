use crypto::Hash256Data;

/// Checks a given hash against a difficulty
///
/// A hash satisfies a difficulty if `hash * difficulty <= 2^256 - 1`, with
/// the hash interpreted as a little-endian 256-bit integer. The product is
/// evaluated limb by limb so only the final carry needs to be inspected.
pub fn check_hash_for_difficulty(hash: &Hash256Data, difficulty: u64) -> bool {
    let mut limbs = [0u64; 4];
    for (i, limb) in limbs.iter_mut().enumerate() {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash[i * 8..(i + 1) * 8]);
        *limb = u64::from_le_bytes(bytes);
    }

    let mut carry = 0u64;
    for limb in &limbs {
        let product = u128::from(*limb) * u128::from(difficulty) + u128::from(carry);
        carry = (product >> 64) as u64;
    }
    carry == 0
}

/// Computes the difficulty of the next block from trailing window data
///
/// `timestamps` and `cumulative_difficulties` are the values of the trailing
/// retarget window, oldest first and equal in length. The retarget scales the
/// work done over the window to the target block time.
pub fn next_difficulty(timestamps: &[u64], cumulative_difficulties: &[u64]) -> u64 {
    debug_assert_eq!(timestamps.len(), cumulative_difficulties.len());
    if timestamps.len() < 2 {
        return 1;
    }

    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();

    let timespan = std::cmp::max(1, sorted[sorted.len() - 1].saturating_sub(sorted[0]));
    let work = cumulative_difficulties[cumulative_difficulties.len() - 1]
        - cumulative_difficulties[0];
    let target = cryptonote_config::DIFFICULTY_TARGET;

    let next = (u128::from(work) * u128::from(target) + u128::from(timespan) - 1)
        / u128::from(timespan);
    std::cmp::max(1, next as u64)
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use crypto::Hash256;

    use super::*;

    #[test]
    fn difficulty_check_accepts_valid_hashes() {
        [
            // The null hash satisfies any difficulty
            (
                "0000000000000000000000000000000000000000000000000000000000000000",
                u64::max_value()
            ),
            // The largest hash satisfies the smallest difficulty
            (
                "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
                1
            ),
            // A hash with 17 leading zero bits (little endian) at moderate difficulty
            (
                "7a03d4485600699035f5032f199dec212db1dca1ae386bfb141e1b52814f0000",
                126_000
            )
        ]
        .iter()
        .for_each(|(hash, difficulty)| {
            let hash = Hash256::try_from(*hash).unwrap();
            assert!(check_hash_for_difficulty(hash.data(), *difficulty));
        });
    }

    #[test]
    fn difficulty_check_rejects_invalid_hashes() {
        [
            (
                "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
                2
            ),
            (
                "97b18b0e547892c518f253f2f8f3debdfa50a1f5d727540032fcbdee57e324fd",
                126_000
            )
        ]
        .iter()
        .for_each(|(hash, difficulty)| {
            let hash = Hash256::try_from(*hash).unwrap();
            assert!(!check_hash_for_difficulty(hash.data(), *difficulty));
        });
    }

    #[test]
    fn retarget_tracks_block_time() {
        let target = cryptonote_config::DIFFICULTY_TARGET;

        // Blocks arriving exactly on target keep the difficulty stable
        let timestamps: Vec<u64> = (0..10).map(|i| i * target).collect();
        let cumulative: Vec<u64> = (0..10).map(|i| i * 1000).collect();
        assert_eq!(next_difficulty(&timestamps, &cumulative), 1000);

        // Blocks arriving twice as fast double the difficulty
        let timestamps: Vec<u64> = (0..10).map(|i| i * target / 2).collect();
        assert_eq!(next_difficulty(&timestamps, &cumulative), 2000);
    }

    #[test]
    fn retarget_on_empty_window_is_minimal() {
        assert_eq!(next_difficulty(&[], &[]), 1);
        assert_eq!(next_difficulty(&[5], &[10]), 1);
    }
}
