use serde::{Deserialize, Serialize};

use common::Block;
use crypto::{Hash256, PublicKey};

/// A freshly constructed block template for the miner
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    /// The candidate block, nonce not yet ground
    pub block: Block,
    /// Difficulty the proof of work must satisfy
    pub difficulty: u64,
    /// Main chain height the candidate would occupy
    pub height: u64
}

/// A compact description of our main chain relative to a peer's short history
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChainEntry {
    /// Height of the first returned block id
    pub start_height: u64,
    /// Our current blockchain height
    pub total_height: u64,
    /// Main chain block ids starting at `start_height`
    pub block_ids: Vec<Hash256>
}

/// Bulk object fetch request used during synchronization
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GetObjectsRequest {
    /// Transaction ids to fetch
    pub txs: Vec<Hash256>,
    /// Block ids to fetch
    pub blocks: Vec<Hash256>
}

/// A block blob together with the blobs of its confirmed transactions
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockCompleteEntry {
    /// Serialized block
    pub block: Vec<u8>,
    /// Serialized transactions confirmed by the block
    pub txs: Vec<Vec<u8>>
}

/// Bulk object fetch response
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GetObjectsResponse {
    /// Serialized requested transactions
    pub txs: Vec<Vec<u8>>,
    /// Requested blocks with their transactions
    pub blocks: Vec<BlockCompleteEntry>,
    /// Ids that are not on our main chain
    pub missed_ids: Vec<Hash256>,
    /// Our current blockchain height
    pub current_blockchain_height: u64
}

/// Random output sampling request (ring member selection)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RandomOutsRequest {
    /// Amounts to sample outputs for
    pub amounts: Vec<u64>,
    /// Number of outputs requested per amount
    pub outs_count: u64
}

/// A single sampled output
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct OutEntry {
    /// Global index of the output within its amount
    pub global_index: u64,
    /// The output's target key
    pub out_key: PublicKey
}

/// Sampled outputs for one amount
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutsForAmount {
    /// The amount sampled
    pub amount: u64,
    /// The sampled outputs, at most `outs_count` of them
    pub outs: Vec<OutEntry>
}
