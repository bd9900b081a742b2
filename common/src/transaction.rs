use serde::{Deserialize, Serialize};

use crypto::{Hash256, KeyImage, PublicKey};

use crate::GetHash;

/// Transaction input
#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum TXIn {
    /// Coinbase input. Creates new coins
    ///
    /// Contains the block height of the block this transaction rewards
    Gen(u64),
    /// Coins from an existing "ToKey" output
    FromKey {
        /// Amount of coins spent
        amount: u64,
        /// Relative global offsets of each output in the ring
        key_offsets: Vec<u64>,
        /// Key image of the spent output
        key_image: KeyImage
    }
}

/// Transaction output target
#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum TXOutTarget {
    /// Send to the specified one-time public key
    ToKey {
        /// Target public key
        key: PublicKey
    }
}

/// Transaction output
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct TXOut {
    /// Amount of coins received
    pub amount: u64,
    /// Transaction output target
    pub target: TXOutTarget
}

/// Extra information tagged to a transaction
#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum TXExtra {
    /// Public key of this transaction (for determining output secret keys)
    TxPublicKey(PublicKey),
    /// Arbitrary nonce bytes (used by miners to diversify block templates)
    Nonce(Vec<u8>)
}

/// Transaction prefix
///
/// Everything a transaction commits to apart from its signatures
#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct TransactionPrefix {
    /// This transaction's version
    pub version: u16,
    /// Block height (+ delta) before which this transaction's outputs are locked
    pub unlock_time: u64,
    /// List of inputs to this transaction
    pub inputs: Vec<TXIn>,
    /// List of outputs of this transaction
    pub outputs: Vec<TXOut>,
    /// Extra information tagged to this transaction
    pub extra: Vec<TXExtra>
}

impl GetHash for TransactionPrefix {
    fn get_hash_blob(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap()
    }
}

/// A complete transaction
#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct Transaction {
    /// This transaction's prefix
    pub prefix: TransactionPrefix,
    /// Ring signatures proving ownership, one ring per input
    ///
    /// Empty for coinbase transactions
    pub signatures: Vec<Vec<crypto::Signature>>
}

impl Transaction {
    /// Gets the hash this transaction's signatures commit to
    pub fn get_prefix_hash(&self) -> Hash256 {
        self.prefix.get_hash()
    }

    /// Iterates over the key images of all FromKey inputs
    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.prefix.inputs.iter().filter_map(|input| match input {
            TXIn::FromKey { key_image, .. } => Some(key_image),
            TXIn::Gen(_) => None
        })
    }
}

impl GetHash for Transaction {
    fn get_hash_blob(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap()
    }
}

/// Constructs the coinbase transaction of a block at the given height
///
/// The single `Gen` input mints `reward` coins to `address`. `extra_nonce` is
/// carried verbatim in the transaction extra so miners can diversify the
/// resulting block template.
pub fn construct_miner_tx(
    height: u64,
    reward: u64,
    address: &PublicKey,
    extra_nonce: &[u8]
) -> Transaction {
    let mut extra = vec![TXExtra::TxPublicKey(*address)];
    if !extra_nonce.is_empty() {
        extra.push(TXExtra::Nonce(extra_nonce.to_vec()));
    }

    Transaction {
        prefix: TransactionPrefix {
            version: 1,
            unlock_time: 0,
            inputs: vec![TXIn::Gen(height)],
            outputs: vec![TXOut {
                amount: reward,
                target: TXOutTarget::ToKey { key: *address }
            }],
            extra
        },
        signatures: Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_hash_differs_from_tx_hash() {
        let tx = construct_miner_tx(5, 100, &crypto::KeyPair::generate().public_key, &[]);
        assert_ne!(tx.get_hash(), tx.get_prefix_hash());
    }

    #[test]
    fn miner_tx_carries_extra_nonce() {
        let tx = construct_miner_tx(0, 1, &crypto::KeyPair::generate().public_key, &[1, 2, 3]);
        assert!(tx
            .prefix
            .extra
            .iter()
            .any(|extra| matches!(extra, TXExtra::Nonce(nonce) if nonce == &[1, 2, 3])));
    }

    #[test]
    fn coinbase_has_no_key_images() {
        let tx = construct_miner_tx(0, 1, &crypto::KeyPair::generate().public_key, &[]);
        assert_eq!(tx.key_images().count(), 0);
    }
}
