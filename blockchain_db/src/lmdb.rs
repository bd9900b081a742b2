use std::path::Path;
use std::sync::{Arc, RwLock};

use rkv::{Manager, Rkv, SingleStore, StoreOptions, Value};

/// Number of named LMDB sub-databases opened by [`BlockchainLMDB::new`]
const MAX_DBS: u32 = 9;
use serde::de::DeserializeOwned;

use common::{Block, GetHash, Transaction, TXOutTarget};
use crypto::{Hash256, KeyImage, PublicKey};

use crate::error::{Error, Result};
use crate::{BlockchainDB, BlockMetadata, TransactionRow};

const META_BLOCK_COUNT: &[u8] = b"block_count";
const META_TX_COUNT: &[u8] = b"tx_count";

/// LMDB-backed persistent storage driver
///
/// Writes are serialized by the chain store above this driver, so every
/// mutation gathers its reads first and applies all puts in one write
/// transaction.
pub struct BlockchainLMDB {
    env: Arc<RwLock<Rkv>>,
    data_dir: Box<Path>,
    blocks: SingleStore,
    block_ids: SingleStore,
    block_heights: SingleStore,
    block_metadata: SingleStore,
    transactions: SingleStore,
    key_images: SingleStore,
    outputs: SingleStore,
    output_counts: SingleStore,
    meta: SingleStore
}

fn output_key(amount: u64, index: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&amount.to_le_bytes());
    key[8..].copy_from_slice(&index.to_le_bytes());
    key
}

impl BlockchainLMDB {
    /// Opens (creating if needed) the LMDB environment at the given path
    pub fn new(path: &Path) -> Result<BlockchainLMDB> {
        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }
        if !std::fs::metadata(path)?.is_dir() {
            return Err(Error::DBOpenError(format!(
                "{} is not a directory",
                path.to_string_lossy()
            )));
        }

        let env = Manager::singleton()
            .write()
            .unwrap()
            .get_or_create(path, |p| Rkv::with_capacity(p, MAX_DBS))?;

        let (
            blocks,
            block_ids,
            block_heights,
            block_metadata,
            transactions,
            key_images,
            outputs,
            output_counts,
            meta
        ) = {
            let env = env.read().unwrap();
            (
                env.open_single("blocks", StoreOptions::create())?,
                env.open_single("block_ids", StoreOptions::create())?,
                env.open_single("block_heights", StoreOptions::create())?,
                env.open_single("block_metadata", StoreOptions::create())?,
                env.open_single("transactions", StoreOptions::create())?,
                env.open_single("key_images", StoreOptions::create())?,
                env.open_single("outputs", StoreOptions::create())?,
                env.open_single("output_counts", StoreOptions::create())?,
                env.open_single("meta", StoreOptions::create())?
            )
        };

        Ok(BlockchainLMDB {
            env,
            data_dir: Box::from(path),
            blocks,
            block_ids,
            block_heights,
            block_metadata,
            transactions,
            key_images,
            outputs,
            output_counts,
            meta
        })
    }

    fn read_blob<T: DeserializeOwned>(&self, store: SingleStore, key: &[u8]) -> Result<Option<T>> {
        let env = self.env.read().unwrap();
        let reader = env.read()?;
        match store.get(&reader, key)? {
            Some(Value::Blob(bytes)) => Ok(Some(bincode::deserialize(bytes)?)),
            Some(_) => Err(Error::Invalid(String::from("unexpected value type"))),
            None => Ok(None)
        }
    }

    fn read_u64(&self, store: SingleStore, key: &[u8]) -> Result<Option<u64>> {
        let env = self.env.read().unwrap();
        let reader = env.read()?;
        match store.get(&reader, key)? {
            Some(Value::U64(value)) => Ok(Some(value)),
            Some(_) => Err(Error::Invalid(String::from("unexpected value type"))),
            None => Ok(None)
        }
    }

    fn contains(&self, store: SingleStore, key: &[u8]) -> bool {
        let env = self.env.read().unwrap();
        let reader = match env.read() {
            Ok(reader) => reader,
            Err(_) => return false
        };
        matches!(store.get(&reader, key), Ok(Some(_)))
    }

    /// Plans the index rows a transaction adds, without touching the store
    fn plan_transaction(
        &self,
        tx: &Transaction,
        block_height: u64,
        output_counts: &mut std::collections::HashMap<u64, u64>
    ) -> Result<PlannedTransaction> {
        let tx_id = tx.get_hash();
        if self.have_tx(&tx_id) {
            return Err(Error::Exists(format!("transaction {}", tx_id)));
        }

        let mut images = Vec::new();
        for key_image in tx.key_images() {
            if self.has_key_image(key_image) || images.contains(key_image) {
                return Err(Error::Exists(String::from("key image")));
            }
            images.push(*key_image);
        }

        let mut outputs = Vec::with_capacity(tx.prefix.outputs.len());
        let mut output_indexes = Vec::with_capacity(tx.prefix.outputs.len());
        for output in &tx.prefix.outputs {
            let TXOutTarget::ToKey { key } = output.target;
            let count = output_counts.entry(output.amount).or_insert_with(|| {
                self.get_num_outputs(output.amount)
            });
            output_indexes.push(*count);
            outputs.push((output.amount, *count, key));
            *count += 1;
        }

        Ok(PlannedTransaction {
            row_key: tx_id,
            row: TransactionRow {
                tx: tx.clone(),
                block_height,
                output_indexes
            },
            images,
            outputs
        })
    }
}

struct PlannedTransaction {
    row_key: Hash256,
    row: TransactionRow,
    images: Vec<KeyImage>,
    outputs: Vec<(u64, u64, PublicKey)>
}

impl BlockchainDB for BlockchainLMDB {
    fn sync(&self) -> Result<()> {
        self.env.read().unwrap().sync(true)?;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        let env = self.env.read().unwrap();
        let mut writer = env.write()?;
        for store in &[
            &self.blocks,
            &self.block_ids,
            &self.block_heights,
            &self.block_metadata,
            &self.transactions,
            &self.key_images,
            &self.outputs,
            &self.output_counts,
            &self.meta
        ] {
            store.clear(&mut writer)?;
        }
        writer.commit()?;
        Ok(())
    }

    fn size(&self) -> u64 {
        let mut path = self.data_dir.clone().into_path_buf();
        path.push("data.mdb");
        std::fs::metadata(path)
            .map(|metadata| metadata.len())
            .unwrap_or(0)
    }

    fn add_block(
        &mut self,
        block: Block,
        metadata: BlockMetadata,
        transactions: Vec<Transaction>
    ) -> Result<()> {
        let block_id = block.get_hash();
        if self.have_block(&block_id) {
            return Err(Error::Exists(format!("block {}", block_id)));
        }

        let height = self.get_block_count();
        let tx_count = self.get_tx_count();

        // Plan all index updates before opening the write transaction
        let mut output_counts = std::collections::HashMap::new();
        let mut planned = vec![self.plan_transaction(&block.miner_tx, height, &mut output_counts)?];
        for tx in &transactions {
            planned.push(self.plan_transaction(tx, height, &mut output_counts)?);
        }

        let env = self.env.read().unwrap();
        let mut writer = env.write()?;

        self.blocks
            .put(&mut writer, block_id.data(), &Value::Blob(&bincode::serialize(&block)?))?;
        self.block_ids
            .put(&mut writer, &height.to_le_bytes(), &Value::Blob(block_id.data()))?;
        self.block_heights
            .put(&mut writer, block_id.data(), &Value::U64(height))?;
        self.block_metadata.put(
            &mut writer,
            &height.to_le_bytes(),
            &Value::Blob(&bincode::serialize(&metadata)?)
        )?;

        for tx in &planned {
            self.transactions.put(
                &mut writer,
                tx.row_key.data(),
                &Value::Blob(&bincode::serialize(&tx.row)?)
            )?;
            for image in &tx.images {
                self.key_images
                    .put(&mut writer, image.as_bytes(), &Value::Bool(true))?;
            }
            for (amount, index, key) in &tx.outputs {
                self.outputs.put(
                    &mut writer,
                    &output_key(*amount, *index),
                    &Value::Blob(&bincode::serialize(&(tx.row_key, *key))?)
                )?;
            }
        }
        for (amount, count) in &output_counts {
            self.output_counts
                .put(&mut writer, &amount.to_le_bytes(), &Value::U64(*count))?;
        }

        self.meta
            .put(&mut writer, META_BLOCK_COUNT, &Value::U64(height + 1))?;
        self.meta.put(
            &mut writer,
            META_TX_COUNT,
            &Value::U64(tx_count + planned.len() as u64)
        )?;

        writer.commit()?;
        Ok(())
    }

    fn pop_block(&mut self) -> Result<(Block, Vec<Transaction>)> {
        let height = self
            .get_block_count()
            .checked_sub(1)
            .ok_or_else(|| Error::DoesNotExist(String::from("tail block")))?;
        let block_id = self
            .get_block_id_by_height(height)
            .ok_or_else(|| Error::Invalid(String::from("missing tail id")))?;
        let block = self
            .get_block_by_hash(&block_id)
            .ok_or_else(|| Error::Invalid(String::from("missing tail block")))?;

        let miner_tx_id = block.miner_tx.get_hash();
        let mut rows = Vec::with_capacity(block.tx_hashes.len() + 1);
        for tx_id in std::iter::once(&miner_tx_id).chain(block.tx_hashes.iter()) {
            let row: TransactionRow = self
                .read_blob(self.transactions, tx_id.data())?
                .ok_or_else(|| Error::DoesNotExist(format!("transaction {}", tx_id)))?;
            rows.push((*tx_id, row));
        }

        let tx_count = self.get_tx_count();
        let mut output_counts = std::collections::HashMap::new();
        for (_, row) in &rows {
            for output in &row.tx.prefix.outputs {
                let count = output_counts
                    .entry(output.amount)
                    .or_insert_with(|| self.get_num_outputs(output.amount));
                *count = count.saturating_sub(1);
            }
        }

        let env = self.env.read().unwrap();
        let mut writer = env.write()?;

        self.blocks.delete(&mut writer, block_id.data())?;
        self.block_ids.delete(&mut writer, &height.to_le_bytes())?;
        self.block_heights.delete(&mut writer, block_id.data())?;
        self.block_metadata
            .delete(&mut writer, &height.to_le_bytes())?;

        for (tx_id, row) in &rows {
            self.transactions.delete(&mut writer, tx_id.data())?;
            for image in row.tx.key_images() {
                self.key_images.delete(&mut writer, image.as_bytes())?;
            }
            for (output, index) in row.tx.prefix.outputs.iter().zip(&row.output_indexes) {
                self.outputs
                    .delete(&mut writer, &output_key(output.amount, *index))?;
            }
        }
        for (amount, count) in &output_counts {
            if *count == 0 {
                self.output_counts.delete(&mut writer, &amount.to_le_bytes())?;
            } else {
                self.output_counts
                    .put(&mut writer, &amount.to_le_bytes(), &Value::U64(*count))?;
            }
        }

        self.meta
            .put(&mut writer, META_BLOCK_COUNT, &Value::U64(height))?;
        self.meta.put(
            &mut writer,
            META_TX_COUNT,
            &Value::U64(tx_count - rows.len() as u64)
        )?;

        writer.commit()?;

        let transactions = rows.into_iter().skip(1).map(|(_, row)| row.tx).collect();
        Ok((block, transactions))
    }

    fn get_block_count(&self) -> u64 {
        self.read_u64(self.meta, META_BLOCK_COUNT)
            .unwrap_or(None)
            .unwrap_or(0)
    }
    fn get_block_by_height(&self, height: u64) -> Option<Block> {
        let block_id = self.get_block_id_by_height(height)?;
        self.get_block_by_hash(&block_id)
    }
    fn get_block_id_by_height(&self, height: u64) -> Option<Hash256> {
        let env = self.env.read().unwrap();
        let reader = env.read().ok()?;
        match self.block_ids.get(&reader, &height.to_le_bytes()).ok()? {
            Some(Value::Blob(bytes)) if bytes.len() == 32 => {
                Some(Hash256::from(*crypto::Hash256Data::from_slice(bytes)))
            }
            _ => None
        }
    }
    fn get_block_by_hash(&self, block_id: &Hash256) -> Option<Block> {
        self.read_blob(self.blocks, block_id.data()).unwrap_or(None)
    }
    fn get_block_height(&self, block_id: &Hash256) -> Option<u64> {
        self.read_u64(self.block_heights, block_id.data())
            .unwrap_or(None)
    }
    fn get_block_metadata(&self, height: u64) -> Option<BlockMetadata> {
        self.read_blob(self.block_metadata, &height.to_le_bytes())
            .unwrap_or(None)
    }
    fn have_block(&self, block_id: &Hash256) -> bool {
        self.contains(self.blocks, block_id.data())
    }

    fn get_transaction(&self, id: &Hash256) -> Option<Transaction> {
        self.read_blob::<TransactionRow>(self.transactions, id.data())
            .unwrap_or(None)
            .map(|row| row.tx)
    }
    fn have_tx(&self, id: &Hash256) -> bool {
        self.contains(self.transactions, id.data())
    }
    fn get_tx_count(&self) -> u64 {
        self.read_u64(self.meta, META_TX_COUNT)
            .unwrap_or(None)
            .unwrap_or(0)
    }
    fn get_tx_output_indexes(&self, id: &Hash256) -> Option<Vec<u64>> {
        self.read_blob::<TransactionRow>(self.transactions, id.data())
            .unwrap_or(None)
            .map(|row| row.output_indexes)
    }

    fn has_key_image(&self, key_image: &KeyImage) -> bool {
        self.contains(self.key_images, key_image.as_bytes())
    }

    fn get_num_outputs(&self, amount: u64) -> u64 {
        self.read_u64(self.output_counts, &amount.to_le_bytes())
            .unwrap_or(None)
            .unwrap_or(0)
    }
    fn get_output(&self, amount: u64, index: u64) -> Option<(Hash256, PublicKey)> {
        self.read_blob(self.outputs, &output_key(amount, index))
            .unwrap_or(None)
    }
}

#[cfg(test)]
mod tests {
    use cryptonote_config::Network;

    use super::*;

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = common::genesis::generate_genesis_block(Network::Mainnet);
        let genesis_id = genesis.get_hash();
        let metadata = BlockMetadata {
            block_weight: 100,
            cumulative_difficulty: 1,
            coins_generated: 100
        };

        {
            let mut db = BlockchainLMDB::new(dir.path()).unwrap();
            db.add_block(genesis, metadata, Vec::new()).unwrap();
            db.sync().unwrap();
        }

        let db = BlockchainLMDB::new(dir.path()).unwrap();
        assert_eq!(db.get_block_count(), 1);
        assert!(db.have_block(&genesis_id));
        assert_eq!(db.get_block_id_by_height(0), Some(genesis_id));
        assert_eq!(db.get_tx_count(), 1);
    }

    #[test]
    fn pop_block_reverts_the_tip() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = BlockchainLMDB::new(dir.path()).unwrap();
        let genesis = common::genesis::generate_genesis_block(Network::Testnet);
        let reward = genesis.miner_tx.prefix.outputs[0].amount;
        db.add_block(
            genesis.clone(),
            BlockMetadata {
                block_weight: 100,
                cumulative_difficulty: 1,
                coins_generated: reward
            },
            Vec::new()
        )
        .unwrap();

        assert_eq!(db.get_num_outputs(reward), 1);
        let (popped, transactions) = db.pop_block().unwrap();
        assert_eq!(popped.get_hash(), genesis.get_hash());
        assert!(transactions.is_empty());
        assert_eq!(db.get_block_count(), 0);
        assert_eq!(db.get_num_outputs(reward), 0);
    }
}
