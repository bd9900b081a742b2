#![deny(missing_docs)]
//! Cryptographic primitives used across the Pyrite daemon

mod hash;
mod keys;

pub use digest::Digest;

pub use hash::{CNFastHash, Hash256, Hash256Data};
pub use keys::{KeyImage, KeyPair, PublicKey, SecretKey, Signature};
