#![deny(missing_docs)]
//! Storage drivers for the Pyrite blockchain
//!
//! The [`BlockchainDB`] trait is the seam between the chain store and its
//! backing key-value storage. Two drivers are provided: an LMDB-backed
//! persistent driver and an in-memory driver for tests and ephemeral runs.

use std::path::Path;

use log::error;
use serde::{Deserialize, Serialize};

use common::{Block, Transaction};
use crypto::{Hash256, KeyImage, PublicKey};

mod config;
mod error;
mod lmdb;
mod mem;

pub use config::Config;
pub use error::{Error, Result};
pub use lmdb::BlockchainLMDB;
pub use mem::BlockchainMemDB;

/// Per-block bookkeeping stored alongside each block
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Serialized weight of the block including its transactions
    pub block_weight: usize,
    /// Sum of the difficulties of this block and all its ancestors
    pub cumulative_difficulty: u64,
    /// Total coins emitted up to and including this block
    pub coins_generated: u64
}

/// Storage driver for the blockchain
///
/// A driver stores the main chain only; alternative chains are tracked above
/// this seam. `add_block` is handed the block's confirmed transactions and is
/// responsible for every index derived from them (key images, per-amount
/// output indexes), and `pop_block` undoes all of it.
pub trait BlockchainDB: Send + Sync {
    /// Flushes pending writes to durable storage
    fn sync(&self) -> Result<()>;
    /// Deletes all stored state
    fn reset(&mut self) -> Result<()>;
    /// Approximate size of the database in bytes
    fn size(&self) -> u64;

    /// Appends a block and its transactions to the main chain
    fn add_block(
        &mut self,
        block: Block,
        metadata: BlockMetadata,
        transactions: Vec<Transaction>
    ) -> Result<()>;
    /// Removes the tail block, returning it and its confirmed transactions
    fn pop_block(&mut self) -> Result<(Block, Vec<Transaction>)>;
    /// Number of blocks in the main chain
    fn get_block_count(&self) -> u64;
    /// Block at the given height
    fn get_block_by_height(&self, height: u64) -> Option<Block>;
    /// Block id at the given height
    fn get_block_id_by_height(&self, height: u64) -> Option<Hash256>;
    /// Block with the given id
    fn get_block_by_hash(&self, block_id: &Hash256) -> Option<Block>;
    /// Main chain height of the block with the given id
    fn get_block_height(&self, block_id: &Hash256) -> Option<u64>;
    /// Bookkeeping of the block at the given height
    fn get_block_metadata(&self, height: u64) -> Option<BlockMetadata>;
    /// Whether the main chain contains the given block id
    fn have_block(&self, block_id: &Hash256) -> bool;

    /// Confirmed transaction with the given id
    fn get_transaction(&self, id: &Hash256) -> Option<Transaction>;
    /// Whether the main chain contains the given transaction id
    fn have_tx(&self, id: &Hash256) -> bool;
    /// Number of confirmed transactions (coinbase included)
    fn get_tx_count(&self) -> u64;
    /// Per-amount global output indexes of a confirmed transaction's outputs
    fn get_tx_output_indexes(&self, id: &Hash256) -> Option<Vec<u64>>;

    /// Whether the given key image has been spent on the main chain
    fn has_key_image(&self, key_image: &KeyImage) -> bool;

    /// Number of confirmed outputs of the given amount
    fn get_num_outputs(&self, amount: u64) -> u64;
    /// Confirmed output of the given amount at the given global index
    ///
    /// Returns the id of the transaction carrying the output and the output's
    /// target key
    fn get_output(&self, amount: u64, index: u64) -> Option<(Hash256, PublicKey)>;
}

/// Opens the database driver selected by the configuration
///
/// `data_dir` is the resolved per-network data directory; persistent drivers
/// store their files in a subdirectory named after the driver.
pub fn open_db(config: &Config, data_dir: &Path) -> Result<Box<dyn BlockchainDB>> {
    match config.db_type.as_str() {
        "lmdb" => Ok(Box::new(BlockchainLMDB::new(&data_dir.join("lmdb"))?)),
        "memory" => Ok(Box::new(BlockchainMemDB::new())),
        "berkeley" => {
            error!("BerkeleyDB is not available in this build");
            Err(Error::Invalid(String::from("berkeley")))
        }
        other => {
            error!("Attempted to use non-existent database type \"{}\"", other);
            Err(Error::Invalid(String::from(other)))
        }
    }
}

/// Confirmed transaction row stored by drivers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct TransactionRow {
    pub tx: Transaction,
    pub block_height: u64,
    pub output_indexes: Vec<u64>
}
