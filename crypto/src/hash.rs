use std::convert::TryFrom;
use std::fmt::{Display, Formatter};

use digest::Digest;
use serde::{Deserialize, Serialize};
use sha3::Keccak256Full;

/// Raw byte form of a 256-bit hash
pub type Hash256Data = generic_array::GenericArray<u8, generic_array::typenum::U32>;

/// A 256-bit hash
///
/// Serves as the ID of blocks and transactions across the daemon
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Hash256(Hash256Data);

impl Hash256 {
    /// The all-zero hash
    pub fn null_hash() -> Self {
        Hash256::default()
    }

    /// Borrows the raw hash bytes
    pub fn data(&self) -> &Hash256Data {
        &self.0
    }
}

impl Display for Hash256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl From<Hash256Data> for Hash256 {
    fn from(data: Hash256Data) -> Self {
        Hash256(data)
    }
}

impl TryFrom<&str> for Hash256 {
    type Error = hex::FromHexError;
    fn try_from(data: &str) -> Result<Self, Self::Error> {
        if data.len() != 64 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        Ok(Hash256(Hash256Data::clone_from_slice(&hex::decode(data)?)))
    }
}

/// The Keccak finalist hash (full 1600-bit permutation, truncated to 256 bits)
pub struct CNFastHash {
    hasher: Keccak256Full
}

impl Digest for CNFastHash {
    type OutputSize = digest::generic_array::typenum::U32;

    fn new() -> Self {
        CNFastHash {
            hasher: Keccak256Full::new()
        }
    }
    fn input<B: AsRef<[u8]>>(&mut self, data: B) {
        self.hasher.input(data);
    }
    fn chain<B: AsRef<[u8]>>(self, data: B) -> Self {
        CNFastHash {
            hasher: self.hasher.chain(data)
        }
    }
    fn result(self) -> Hash256Data {
        *Hash256Data::from_slice(&self.hasher.result()[..32])
    }
    fn result_reset(&mut self) -> Hash256Data {
        *Hash256Data::from_slice(&self.hasher.result_reset()[..32])
    }
    fn reset(&mut self) {
        self.hasher.reset()
    }
    fn digest(data: &[u8]) -> Hash256Data {
        *Hash256Data::from_slice(&Keccak256Full::digest(data)[..32])
    }
    fn output_size() -> usize {
        32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_hash_is_all_zeroes() {
        assert_eq!(
            Hash256::null_hash().to_string(),
            "0000000000000000000000000000000000000000000000000000000000000000"
        );
        assert_eq!(Hash256::null_hash(), Hash256::default());
    }

    #[test]
    fn parses_and_displays_hex() {
        let hex = "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20";
        let hash = Hash256::try_from(hex).unwrap();
        assert_eq!(hash.data()[0], 1);
        assert_eq!(hash.data()[31], 32);
        assert_eq!(hash.to_string(), hex);
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(Hash256::try_from("01").is_err());
        assert!(Hash256::try_from(
            "zz02030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20"
        )
        .is_err());
    }

    #[test]
    fn digest_is_keccak() {
        // Keccak-256 of the empty string
        assert_eq!(
            hex::encode(CNFastHash::digest(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
