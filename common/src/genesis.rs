use crypto::{Hash256, KeyPair};
use cryptonote_config::{emission, Network};

use crate::{construct_miner_tx, Block, BlockHeader};

/// Constructs the genesis block of the given network
///
/// The construction is deterministic: the coinbase pays the first reward to
/// the well-known key derived from the null secret, and the header parameters
/// come from the network configuration. Every node computes the same block,
/// so its hash can serve as the root checkpoint.
pub fn generate_genesis_block(network: Network) -> Block {
    let config = network.config();
    let reward = emission::get_block_reward(0, 0, 0).unwrap();
    let burn_key = KeyPair::from(Hash256::null_hash()).public_key;

    Block {
        header: BlockHeader {
            major_version: 1,
            minor_version: 0,
            timestamp: config.genesis_timestamp,
            prev_id: Hash256::null_hash(),
            nonce: config.genesis_nonce
        },
        miner_tx: construct_miner_tx(0, reward, &burn_key, &[]),
        tx_hashes: Vec::new()
    }
}
