//! The Pyrite transaction memory pool
//!
//! Stages unconfirmed transactions until a block confirms them. The pool
//! deduplicates by transaction id and by key image, answers "can this be
//! decided now" against the chain's known outputs, and persists itself in the
//! data directory across restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use blockchain::{Blockchain, TxPoolDriver};
use common::{GetHash, Transaction, TxVerificationContext, TXIn};
use crypto::{Hash256, KeyImage};

/// Type alias for TXPool operations that may result in an error
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for TXPool operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when the pool state file cannot be read or written
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Returned when the pool state file cannot be decoded
    #[error(transparent)]
    Serialization(#[from] bincode::Error)
}

#[derive(Clone, Serialize, Deserialize)]
struct PoolEntry {
    tx: Transaction,
    blob_size: usize,
    fee: u64,
    receive_time: u64,
    keeped_by_block: bool
}

/// A memory pool of unconfirmed transactions
///
/// Holds a read capability on the blockchain for the paths entered without
/// the chain lock held (loading persisted state); admission paths receive the
/// chain view from the caller to keep the chain → pool lock order.
pub struct TXPool {
    blockchain: Arc<RwLock<Blockchain>>,
    transactions: HashMap<Hash256, PoolEntry>,
    spent_key_images: HashMap<[u8; 32], Hash256>,
    data_dir: Option<PathBuf>
}

fn current_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

impl TXPool {
    /// Creates an empty pool holding a read capability on the chain
    pub fn new(blockchain: Arc<RwLock<Blockchain>>) -> TXPool {
        TXPool {
            blockchain,
            transactions: HashMap::new(),
            spent_key_images: HashMap::new(),
            data_dir: None
        }
    }

    /// Loads persisted pool state from the data directory
    ///
    /// Entries that were confirmed while the pool was offline are dropped.
    pub fn init(&mut self, data_dir: &Path) -> Result<()> {
        self.data_dir = Some(data_dir.to_path_buf());
        let path = data_dir.join(cryptonote_config::POOLDATA_FILENAME);
        if !path.exists() {
            return Ok(());
        }

        let entries: Vec<PoolEntry> = bincode::deserialize(&std::fs::read(&path)?)?;
        let blockchain = self.blockchain.clone();
        let chain = blockchain.read().unwrap();
        let mut loaded = 0;
        for entry in entries {
            let tx_hash = entry.tx.get_hash();
            if chain.have_tx(&tx_hash) {
                continue;
            }
            if entry.tx.key_images().any(|ki| chain.have_tx_keyimg_as_spent(ki)) {
                continue;
            }
            self.insert_entry(tx_hash, entry);
            loaded += 1;
        }
        info!("Loaded {} pooled transaction(s) from {}", loaded, path.display());
        Ok(())
    }

    /// Persists the pool state into the data directory
    pub fn deinit(&mut self) -> Result<()> {
        let data_dir = match &self.data_dir {
            Some(data_dir) => data_dir,
            None => return Ok(())
        };
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(cryptonote_config::POOLDATA_FILENAME);
        let entries: Vec<&PoolEntry> = self.transactions.values().collect();
        std::fs::write(&path, bincode::serialize(&entries)?)?;
        debug!("Stored {} pooled transaction(s) to {}", entries.len(), path.display());
        Ok(())
    }

    /// Admits a transaction into the pool
    ///
    /// `chain` is the chain view the caller already holds. The outcome is
    /// recorded in `tvc`; the return value is false exactly when the
    /// transaction was neither added nor already present.
    pub fn add_tx(
        &mut self,
        chain: &Blockchain,
        tx: Transaction,
        tx_hash: Hash256,
        blob_size: usize,
        tvc: &mut TxVerificationContext,
        keeped_by_block: bool
    ) -> bool {
        if self.transactions.contains_key(&tx_hash) {
            debug!("tx {} is already in the pool", tx_hash);
            return true;
        }

        match self.check_spends(chain, &tx, &tx_hash, keeped_by_block) {
            Ok(()) => {}
            Err(SpendCheck::DoubleSpend) => {
                warn!("tx {} double spends a key image, rejected", tx_hash);
                tvc.verification_failed = true;
                return false;
            }
            Err(SpendCheck::UnknownOutputs) => {
                debug!("tx {} references outputs we do not know about yet", tx_hash);
                tvc.verification_impossible = true;
                return false;
            }
        }

        self.insert_entry(
            tx_hash,
            PoolEntry {
                fee: blockchain_fee(&tx),
                tx,
                blob_size,
                receive_time: current_time(),
                keeped_by_block
            }
        );
        tvc.added_to_pool = true;
        tvc.should_be_relayed = !keeped_by_block;
        true
    }

    fn check_spends(
        &self,
        chain: &Blockchain,
        tx: &Transaction,
        tx_hash: &Hash256,
        keeped_by_block: bool
    ) -> std::result::Result<(), SpendCheck> {
        for key_image in tx.key_images() {
            if let Some(spender) = self.spent_key_images.get(&key_image.to_bytes()) {
                if spender != tx_hash {
                    return Err(SpendCheck::DoubleSpend);
                }
            }
            if chain.have_tx_keyimg_as_spent(key_image) {
                return Err(SpendCheck::DoubleSpend);
            }
        }

        // A block may confirm transactions whose ring members we have not
        // synchronized yet; a relayed transaction may not
        if !keeped_by_block {
            for input in &tx.prefix.inputs {
                if let TXIn::FromKey {
                    amount,
                    key_offsets,
                    ..
                } = input
                {
                    let mut absolute = 0u64;
                    for offset in key_offsets {
                        absolute = absolute.saturating_add(*offset);
                    }
                    if absolute >= chain.get_num_outputs(*amount) {
                        return Err(SpendCheck::UnknownOutputs);
                    }
                }
            }
        }
        Ok(())
    }

    fn insert_entry(&mut self, tx_hash: Hash256, entry: PoolEntry) {
        for key_image in entry.tx.key_images() {
            self.spent_key_images.insert(key_image.to_bytes(), tx_hash);
        }
        self.transactions.insert(tx_hash, entry);
    }

    fn remove_entry(&mut self, tx_hash: &Hash256) -> Option<PoolEntry> {
        let entry = self.transactions.remove(tx_hash)?;
        for key_image in entry.tx.key_images() {
            if self.spent_key_images.get(&key_image.to_bytes()) == Some(tx_hash) {
                self.spent_key_images.remove(&key_image.to_bytes());
            }
        }
        Some(entry)
    }

    /// Whether the pool holds the given transaction
    pub fn have_tx(&self, tx_hash: &Hash256) -> bool {
        self.transactions.contains_key(tx_hash)
    }

    /// All pooled transactions
    pub fn get_transactions(&self) -> Vec<Transaction> {
        self.transactions.values().map(|entry| entry.tx.clone()).collect()
    }

    /// Number of pooled transactions
    pub fn get_transactions_count(&self) -> usize {
        self.transactions.len()
    }

    /// Renders the pool for diagnostic output
    pub fn print_pool(&self, short_format: bool) -> String {
        let now = current_time();
        let mut out = String::new();
        for (tx_hash, entry) in &self.transactions {
            out.push_str(&format!(
                "id: {}\nblob_size: {}\nfee: {}\nage: {}s\nkeeped_by_block: {}\n",
                tx_hash,
                entry.blob_size,
                entry.fee,
                now.saturating_sub(entry.receive_time),
                entry.keeped_by_block
            ));
            if !short_format {
                out.push_str(&format!("{:?}\n", entry.tx));
            }
        }
        out
    }

    /// Periodic maintenance: evicts transactions past their pool lifetime
    pub fn on_idle(&mut self) {
        let now = current_time();
        let expired: Vec<Hash256> = self
            .transactions
            .iter()
            .filter(|(_, entry)| {
                let lifetime = if entry.keeped_by_block {
                    cryptonote_config::MEMPOOL_TX_FROM_ALT_BLOCK_LIVETIME
                } else {
                    cryptonote_config::MEMPOOL_TX_LIVETIME
                };
                now.saturating_sub(entry.receive_time) > lifetime
            })
            .map(|(tx_hash, _)| *tx_hash)
            .collect();

        for tx_hash in expired {
            info!("Removing stale pooled transaction {}", tx_hash);
            self.remove_entry(&tx_hash);
        }
    }
}

enum SpendCheck {
    DoubleSpend,
    UnknownOutputs
}

fn blockchain_fee(tx: &Transaction) -> u64 {
    let inputs: u64 = tx
        .prefix
        .inputs
        .iter()
        .map(|input| match input {
            TXIn::FromKey { amount, .. } => *amount,
            TXIn::Gen(_) => 0
        })
        .sum();
    let outputs: u64 = tx.prefix.outputs.iter().map(|output| output.amount).sum();
    inputs.saturating_sub(outputs)
}

impl TxPoolDriver for TXPool {
    fn take_transaction(&mut self, tx_id: &Hash256) -> Option<Transaction> {
        self.remove_entry(tx_id).map(|entry| entry.tx)
    }

    fn return_transaction(&mut self, tx: Transaction) {
        let tx_hash = tx.get_hash();
        if self.transactions.contains_key(&tx_hash) {
            return;
        }
        let blob_size = bincode::serialized_size(&tx).unwrap_or(0) as usize;
        self.insert_entry(
            tx_hash,
            PoolEntry {
                fee: blockchain_fee(&tx),
                tx,
                blob_size,
                receive_time: current_time(),
                keeped_by_block: false
            }
        );
    }

    fn template_transactions(&self) -> Vec<Transaction> {
        let mut entries: Vec<&PoolEntry> = self.transactions.values().collect();
        entries.sort_by(|a, b| {
            let density_a = u128::from(a.fee) * b.blob_size.max(1) as u128;
            let density_b = u128::from(b.fee) * a.blob_size.max(1) as u128;
            density_b.cmp(&density_a)
        });
        entries.into_iter().map(|entry| entry.tx.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use blockchain_db::BlockchainMemDB;
    use common::{TransactionPrefix, TXOut, TXOutTarget};
    use cryptonote_config::Network;

    use super::*;

    fn test_blockchain() -> Arc<RwLock<Blockchain>> {
        Arc::new(RwLock::new(
            Blockchain::new(Box::new(BlockchainMemDB::new()), Network::Mainnet).unwrap()
        ))
    }

    fn genesis_reward(blockchain: &Arc<RwLock<Blockchain>>) -> u64 {
        let chain = blockchain.read().unwrap();
        chain.get_blocks(0, 1)[0].miner_tx.prefix.outputs[0].amount
    }

    fn spend_tx(amount: u64, change: u64, key_image: KeyImage) -> Transaction {
        Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 0,
                inputs: vec![TXIn::FromKey {
                    amount,
                    key_offsets: vec![0],
                    key_image
                }],
                outputs: vec![TXOut {
                    amount: change,
                    target: TXOutTarget::ToKey {
                        key: crypto::KeyPair::generate().public_key
                    }
                }],
                extra: Vec::new()
            },
            signatures: Vec::new()
        }
    }

    fn admit(pool: &mut TXPool, blockchain: &Arc<RwLock<Blockchain>>, tx: Transaction)
        -> (bool, TxVerificationContext)
    {
        let chain = blockchain.read().unwrap();
        let tx_hash = tx.get_hash();
        let blob_size = bincode::serialized_size(&tx).unwrap() as usize;
        let mut tvc = TxVerificationContext::default();
        let added = pool.add_tx(&chain, tx, tx_hash, blob_size, &mut tvc, false);
        (added, tvc)
    }

    #[test]
    fn admits_a_decidable_transaction() {
        let blockchain = test_blockchain();
        let mut pool = TXPool::new(blockchain.clone());
        let reward = genesis_reward(&blockchain);

        let tx = spend_tx(reward, reward - 1, crypto::KeyPair::generate().public_key);
        let tx_hash = tx.get_hash();
        let (added, tvc) = admit(&mut pool, &blockchain, tx);

        assert!(added);
        assert!(tvc.added_to_pool);
        assert!(tvc.should_be_relayed);
        assert!(!tvc.verification_failed);
        assert!(pool.have_tx(&tx_hash));
        assert_eq!(pool.get_transactions_count(), 1);
    }

    #[test]
    fn rejects_a_pool_double_spend() {
        let blockchain = test_blockchain();
        let mut pool = TXPool::new(blockchain.clone());
        let reward = genesis_reward(&blockchain);
        let key_image = crypto::KeyPair::generate().public_key;

        let (added, _) = admit(&mut pool, &blockchain, spend_tx(reward, 1, key_image));
        assert!(added);

        let (added, tvc) = admit(&mut pool, &blockchain, spend_tx(reward, 2, key_image));
        assert!(!added);
        assert!(tvc.verification_failed);
        assert_eq!(pool.get_transactions_count(), 1);
    }

    #[test]
    fn unknown_ring_members_are_undecidable() {
        let blockchain = test_blockchain();
        let mut pool = TXPool::new(blockchain.clone());

        // No output of amount 12345 exists on the chain
        let tx = spend_tx(12_345, 1, crypto::KeyPair::generate().public_key);
        let (added, tvc) = admit(&mut pool, &blockchain, tx);

        assert!(!added);
        assert!(tvc.verification_impossible);
        assert!(!tvc.verification_failed);
        assert_eq!(pool.get_transactions_count(), 0);
    }

    #[test]
    fn admitting_twice_is_idempotent() {
        let blockchain = test_blockchain();
        let mut pool = TXPool::new(blockchain.clone());
        let reward = genesis_reward(&blockchain);

        let tx = spend_tx(reward, 1, crypto::KeyPair::generate().public_key);
        let (added, tvc) = admit(&mut pool, &blockchain, tx.clone());
        assert!(added && tvc.added_to_pool);

        let (added, tvc) = admit(&mut pool, &blockchain, tx);
        assert!(added);
        assert!(!tvc.added_to_pool);
        assert_eq!(pool.get_transactions_count(), 1);
    }

    #[test]
    fn pool_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let blockchain = test_blockchain();
        let reward = genesis_reward(&blockchain);
        let tx = spend_tx(reward, 1, crypto::KeyPair::generate().public_key);
        let tx_hash = tx.get_hash();

        {
            let mut pool = TXPool::new(blockchain.clone());
            pool.init(dir.path()).unwrap();
            let (added, _) = admit(&mut pool, &blockchain, tx);
            assert!(added);
            pool.deinit().unwrap();
        }

        let mut pool = TXPool::new(blockchain.clone());
        pool.init(dir.path()).unwrap();
        assert!(pool.have_tx(&tx_hash));
        assert_eq!(pool.get_transactions_count(), 1);
    }

    #[test]
    fn taking_a_transaction_releases_its_key_images() {
        let blockchain = test_blockchain();
        let mut pool = TXPool::new(blockchain.clone());
        let reward = genesis_reward(&blockchain);
        let key_image = crypto::KeyPair::generate().public_key;

        let tx = spend_tx(reward, 1, key_image);
        let tx_hash = tx.get_hash();
        let (added, _) = admit(&mut pool, &blockchain, tx);
        assert!(added);

        assert!(pool.take_transaction(&tx_hash).is_some());
        assert!(!pool.have_tx(&tx_hash));

        // The key image is free again
        let (added, tvc) = admit(&mut pool, &blockchain, spend_tx(reward, 2, key_image));
        assert!(added && tvc.added_to_pool);
    }

    #[test]
    fn template_transactions_prefer_fee_density() {
        let blockchain = test_blockchain();
        let mut pool = TXPool::new(blockchain.clone());
        let reward = genesis_reward(&blockchain);

        let cheap = spend_tx(reward, reward - 10, crypto::KeyPair::generate().public_key);
        let generous = spend_tx(reward, 1, crypto::KeyPair::generate().public_key);
        let generous_hash = generous.get_hash();

        let (added, _) = admit(&mut pool, &blockchain, cheap);
        assert!(added);
        let (added, _) = admit(&mut pool, &blockchain, generous);
        assert!(added);

        let ordered = pool.template_transactions();
        assert_eq!(ordered[0].get_hash(), generous_hash);
    }
}
