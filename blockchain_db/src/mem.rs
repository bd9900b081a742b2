use std::collections::{HashMap, HashSet};
use std::convert::TryInto;

use common::{Block, GetHash, Transaction, TXOutTarget};
use crypto::{Hash256, KeyImage, PublicKey};

use crate::error::{Error, Result};
use crate::{BlockchainDB, BlockMetadata, TransactionRow};

/// In-memory storage driver
///
/// Used by tests and ephemeral runs. Nothing survives the process.
#[derive(Default)]
pub struct BlockchainMemDB {
    blocks: HashMap<Hash256, Block>,
    block_ids: HashMap<u64, Hash256>,
    block_heights: HashMap<Hash256, u64>,
    block_metadata: HashMap<u64, BlockMetadata>,
    transactions: HashMap<Hash256, TransactionRow>,
    key_images: HashSet<[u8; 32]>,
    outputs: HashMap<u64, Vec<(Hash256, PublicKey)>>
}

impl BlockchainMemDB {
    /// Creates an empty in-memory database
    pub fn new() -> BlockchainMemDB {
        BlockchainMemDB::default()
    }

    fn index_transaction(&mut self, tx: &Transaction, block_height: u64) -> Result<()> {
        let tx_id = tx.get_hash();
        if self.transactions.contains_key(&tx_id) {
            return Err(Error::Exists(format!("transaction {}", tx_id)));
        }

        for key_image in tx.key_images() {
            if !self.key_images.insert(key_image.to_bytes()) {
                return Err(Error::Exists(String::from("key image")));
            }
        }

        let mut output_indexes = Vec::with_capacity(tx.prefix.outputs.len());
        for output in &tx.prefix.outputs {
            let TXOutTarget::ToKey { key } = output.target;
            let per_amount = self.outputs.entry(output.amount).or_default();
            output_indexes.push(per_amount.len() as u64);
            per_amount.push((tx_id, key));
        }

        self.transactions.insert(
            tx_id,
            TransactionRow {
                tx: tx.clone(),
                block_height,
                output_indexes
            }
        );
        Ok(())
    }

    fn unindex_transaction(&mut self, tx_id: &Hash256) -> Result<Transaction> {
        let row = self
            .transactions
            .remove(tx_id)
            .ok_or_else(|| Error::DoesNotExist(format!("transaction {}", tx_id)))?;

        for key_image in row.tx.key_images() {
            self.key_images.remove(&key_image.to_bytes());
        }

        // Outputs are appended in insertion order, so the tail block's outputs
        // are the tail of each per-amount index
        for (output, index) in row.tx.prefix.outputs.iter().zip(&row.output_indexes).rev() {
            let per_amount = self
                .outputs
                .get_mut(&output.amount)
                .ok_or_else(|| Error::Invalid(String::from("output index out of sync")))?;
            if per_amount.len() as u64 != index + 1 {
                return Err(Error::Invalid(String::from("output index out of sync")));
            }
            per_amount.pop();
            if per_amount.is_empty() {
                self.outputs.remove(&output.amount);
            }
        }

        Ok(row.tx)
    }
}

impl BlockchainDB for BlockchainMemDB {
    fn sync(&self) -> Result<()> {
        Ok(())
    }
    fn reset(&mut self) -> Result<()> {
        *self = BlockchainMemDB::default();
        Ok(())
    }
    fn size(&self) -> u64 {
        std::mem::size_of_val(self)
            .try_into()
            .unwrap_or(u64::max_value())
    }

    fn add_block(
        &mut self,
        block: Block,
        metadata: BlockMetadata,
        transactions: Vec<Transaction>
    ) -> Result<()> {
        let block_id = block.get_hash();
        if self.blocks.contains_key(&block_id) {
            return Err(Error::Exists(format!("block {}", block_id)));
        }

        let height = self.get_block_count();
        self.index_transaction(&block.miner_tx, height)?;
        for tx in &transactions {
            self.index_transaction(tx, height)?;
        }

        self.block_ids.insert(height, block_id);
        self.block_heights.insert(block_id, height);
        self.block_metadata.insert(height, metadata);
        self.blocks.insert(block_id, block);
        Ok(())
    }

    fn pop_block(&mut self) -> Result<(Block, Vec<Transaction>)> {
        let height = self
            .get_block_count()
            .checked_sub(1)
            .ok_or_else(|| Error::DoesNotExist(String::from("tail block")))?;

        // The two lookups cannot miss once the height is known
        let block_id = self.block_ids.remove(&height).expect("inconsistent state");
        let block = self.blocks.remove(&block_id).expect("inconsistent state");
        self.block_heights.remove(&block_id);
        self.block_metadata.remove(&height);

        let mut transactions = Vec::with_capacity(block.tx_hashes.len());
        for tx_id in block.tx_hashes.iter().rev() {
            transactions.push(self.unindex_transaction(tx_id)?);
        }
        transactions.reverse();
        self.unindex_transaction(&block.miner_tx.get_hash())?;

        Ok((block, transactions))
    }

    fn get_block_count(&self) -> u64 {
        self.block_ids.len() as u64
    }
    fn get_block_by_height(&self, height: u64) -> Option<Block> {
        self.blocks.get(self.block_ids.get(&height)?).cloned()
    }
    fn get_block_id_by_height(&self, height: u64) -> Option<Hash256> {
        self.block_ids.get(&height).copied()
    }
    fn get_block_by_hash(&self, block_id: &Hash256) -> Option<Block> {
        self.blocks.get(block_id).cloned()
    }
    fn get_block_height(&self, block_id: &Hash256) -> Option<u64> {
        self.block_heights.get(block_id).copied()
    }
    fn get_block_metadata(&self, height: u64) -> Option<BlockMetadata> {
        self.block_metadata.get(&height).cloned()
    }
    fn have_block(&self, block_id: &Hash256) -> bool {
        self.blocks.contains_key(block_id)
    }

    fn get_transaction(&self, id: &Hash256) -> Option<Transaction> {
        self.transactions.get(id).map(|row| row.tx.clone())
    }
    fn have_tx(&self, id: &Hash256) -> bool {
        self.transactions.contains_key(id)
    }
    fn get_tx_count(&self) -> u64 {
        self.transactions.len() as u64
    }
    fn get_tx_output_indexes(&self, id: &Hash256) -> Option<Vec<u64>> {
        self.transactions.get(id).map(|row| row.output_indexes.clone())
    }

    fn has_key_image(&self, key_image: &KeyImage) -> bool {
        self.key_images.contains(&key_image.to_bytes())
    }

    fn get_num_outputs(&self, amount: u64) -> u64 {
        self.outputs
            .get(&amount)
            .map(|outputs| outputs.len() as u64)
            .unwrap_or(0)
    }
    fn get_output(&self, amount: u64, index: u64) -> Option<(Hash256, PublicKey)> {
        self.outputs.get(&amount)?.get(index as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use common::construct_miner_tx;
    use cryptonote_config::Network;

    use super::*;

    fn genesis() -> Block {
        common::genesis::generate_genesis_block(Network::Mainnet)
    }

    fn next_block(db: &BlockchainMemDB, transactions: &[Transaction]) -> Block {
        let height = db.get_block_count();
        let prev_id = db.get_block_id_by_height(height - 1).unwrap();
        Block {
            header: common::BlockHeader {
                major_version: 1,
                minor_version: 0,
                timestamp: height * 120,
                prev_id,
                nonce: 0
            },
            miner_tx: construct_miner_tx(
                height,
                100,
                &crypto::KeyPair::generate().public_key,
                &[]
            ),
            tx_hashes: transactions.iter().map(GetHash::get_hash).collect()
        }
    }

    fn metadata() -> BlockMetadata {
        BlockMetadata {
            block_weight: 100,
            cumulative_difficulty: 1,
            coins_generated: 100
        }
    }

    #[test]
    fn blocks_round_trip() {
        let mut db = BlockchainMemDB::new();
        let block = genesis();
        let block_id = block.get_hash();
        db.add_block(block, metadata(), Vec::new()).unwrap();

        assert_eq!(db.get_block_count(), 1);
        assert!(db.have_block(&block_id));
        assert_eq!(db.get_block_id_by_height(0), Some(block_id));
        assert_eq!(db.get_block_height(&block_id), Some(0));
        assert_eq!(db.get_block_by_height(0).unwrap().get_hash(), block_id);
    }

    #[test]
    fn duplicate_block_is_rejected() {
        let mut db = BlockchainMemDB::new();
        db.add_block(genesis(), metadata(), Vec::new()).unwrap();
        assert!(matches!(
            db.add_block(genesis(), metadata(), Vec::new()),
            Err(Error::Exists(_))
        ));
    }

    #[test]
    fn pop_block_unwinds_every_index() {
        let mut db = BlockchainMemDB::new();
        db.add_block(genesis(), metadata(), Vec::new()).unwrap();

        let mut tx = construct_miner_tx(0, 0, &crypto::KeyPair::generate().public_key, &[]);
        tx.prefix.inputs = vec![common::TXIn::FromKey {
            amount: 100,
            key_offsets: vec![0],
            key_image: crypto::KeyPair::generate().public_key
        }];
        tx.prefix.outputs[0].amount = 60;
        let tx_id = tx.get_hash();
        let key_image = *tx.key_images().next().unwrap();

        let block = next_block(&db, std::slice::from_ref(&tx));
        db.add_block(block.clone(), metadata(), vec![tx]).unwrap();

        assert!(db.have_tx(&tx_id));
        assert!(db.has_key_image(&key_image));
        assert_eq!(db.get_num_outputs(60), 1);
        assert_eq!(db.get_tx_output_indexes(&tx_id), Some(vec![0]));

        let (popped, transactions) = db.pop_block().unwrap();
        assert_eq!(popped.get_hash(), block.get_hash());
        assert_eq!(transactions.len(), 1);
        assert!(!db.have_tx(&tx_id));
        assert!(!db.has_key_image(&key_image));
        assert_eq!(db.get_num_outputs(60), 0);
        assert_eq!(db.get_block_count(), 1);
    }

    #[test]
    fn output_indexes_are_per_amount() {
        let mut db = BlockchainMemDB::new();
        db.add_block(genesis(), metadata(), Vec::new()).unwrap();
        let block = next_block(&db, &[]);
        let reward = block.miner_tx.prefix.outputs[0].amount;
        db.add_block(block, metadata(), Vec::new()).unwrap();

        // Genesis and the new block pay different amounts, so each index has
        // exactly one entry
        assert_eq!(db.get_num_outputs(reward), 1);
        let (tx_id, _) = db.get_output(reward, 0).unwrap();
        assert!(db.have_tx(&tx_id));
    }
}
