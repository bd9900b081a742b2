use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};

use crate::hash::Hash256;

/// A secret scalar
pub type SecretKey = Scalar;
/// A compressed curve point used as a public key
pub type PublicKey = CompressedEdwardsY;
/// A one-time tag that uniquely identifies a spent output
pub type KeyImage = PublicKey;

/// A Schnorr-style ring signature component pair
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signature {
    /// Challenge scalar
    pub c: Scalar,
    /// Response scalar
    pub r: Scalar
}

/// A secret/public key pair
pub struct KeyPair {
    /// The secret half
    pub secret_key: SecretKey,
    /// The public half
    pub public_key: PublicKey
}

impl KeyPair {
    /// Generates a random key pair from the OS randomness source
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self::from(Scalar::random(&mut rng))
    }
}

impl From<Scalar> for KeyPair {
    fn from(secret_key: Scalar) -> Self {
        let public_key = (secret_key * ED25519_BASEPOINT_POINT).compress();
        KeyPair {
            secret_key,
            public_key
        }
    }
}

impl From<Hash256> for KeyPair {
    fn from(secret_key: Hash256) -> Self {
        let mut scalar = [0u8; 32];
        scalar.copy_from_slice(secret_key.data());
        Self::from(Scalar::from_bytes_mod_order(scalar))
    }
}
