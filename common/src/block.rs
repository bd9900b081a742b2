use serde::{Deserialize, Serialize};

use crypto::Hash256;

use crate::{GetHash, Transaction, TXIn};

/// Block header
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct BlockHeader {
    /// Hard fork version this block was created under
    pub major_version: u8,
    /// Hard fork version this block votes for
    pub minor_version: u8,
    /// Creation time of this block (seconds since the epoch)
    pub timestamp: u64,
    /// ID of this block's parent
    pub prev_id: Hash256,
    /// Proof-of-work nonce
    pub nonce: u32
}

/// A complete block
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Block {
    /// This block's header
    pub header: BlockHeader,
    /// The coinbase transaction minting this block's reward
    pub miner_tx: Transaction,
    /// IDs of the transactions confirmed by this block
    pub tx_hashes: Vec<Hash256>
}

impl Block {
    /// Gets the main chain height this block claims, from its coinbase input
    ///
    /// Returns `None` for a structurally invalid coinbase
    pub fn height(&self) -> Option<u64> {
        match self.miner_tx.prefix.inputs.as_slice() {
            [TXIn::Gen(height)] => Some(*height),
            _ => None
        }
    }
}

impl GetHash for Block {
    fn get_hash_blob(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct_miner_tx;

    fn block_at_height(height: u64) -> Block {
        Block {
            header: BlockHeader {
                major_version: 1,
                minor_version: 0,
                timestamp: 0,
                prev_id: Hash256::null_hash(),
                nonce: 0
            },
            miner_tx: construct_miner_tx(height, 1, &crypto::KeyPair::generate().public_key, &[]),
            tx_hashes: Vec::new()
        }
    }

    #[test]
    fn height_comes_from_coinbase() {
        assert_eq!(block_at_height(42).height(), Some(42));
    }

    #[test]
    fn height_rejects_malformed_coinbase() {
        let mut block = block_at_height(0);
        block.miner_tx.prefix.inputs.clear();
        assert_eq!(block.height(), None);
    }

    #[test]
    fn nonce_changes_the_id() {
        let mut block = block_at_height(0);
        let id = block.get_hash();
        block.header.nonce += 1;
        assert_ne!(block.get_hash(), id);
    }
}
