//! The Pyrite blockchain store
//!
//! Owns the main chain and its alternative branches on top of a pluggable
//! [`BlockchainDB`] driver. All writes go through [`Blockchain::add_new_block`];
//! the store validates proof of work, structure and emission itself and pulls
//! a block's transactions from the transaction pool through the
//! [`TxPoolDriver`] seam.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use ensure_macro::ensure;
use log::{debug, error, info, warn};

use blockchain_db::{BlockchainDB, BlockMetadata};
use common::checkpoints::Checkpoints;
use common::difficulty::{check_hash_for_difficulty, next_difficulty};
use common::{
    genesis, Block, BlockVerificationContext, GetHash, Transaction, TXIn, TXOutTarget
};
use crypto::{Hash256, KeyImage, PublicKey};
use cryptonote_config::{emission, Network};

mod config;
mod error;
mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{
    BlockCompleteEntry, BlockTemplate, ChainEntry, GetObjectsRequest, GetObjectsResponse,
    OutEntry, OutsForAmount, RandomOutsRequest
};

/// Maximum seconds a block timestamp may lie in the future
const BLOCK_FUTURE_TIME_LIMIT: u64 = 60 * 60 * 2;

/// The view the blockchain has of the transaction pool
///
/// The pool implements this so the chain can move transactions between the
/// pool and the chain during appends and reorganizations. Locks are always
/// taken in chain → pool order.
pub trait TxPoolDriver: Send {
    /// Removes and returns a pooled transaction
    fn take_transaction(&mut self, tx_id: &Hash256) -> Option<Transaction>;
    /// Puts a transaction (back) into the pool, e.g. after its block was popped
    fn return_transaction(&mut self, tx: Transaction);
    /// Pool transactions eligible for a block template, best fee density first
    fn template_transactions(&self) -> Vec<Transaction>;
}

pub struct Blockchain {
    db: Box<dyn BlockchainDB>,
    network: Network,
    alternative_blocks: HashMap<Hash256, Block>,
    checkpoints: Checkpoints,
    enforce_dns_checkpoints: bool,
    tx_pool: Option<Weak<Mutex<dyn TxPoolDriver>>>
}

fn blob_size<T: serde::Serialize>(value: &T) -> usize {
    bincode::serialized_size(value).unwrap_or(0) as usize
}

fn tx_fee(tx: &Transaction) -> u64 {
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

fn current_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

impl Blockchain {
    /// Initializes the blockchain store on the given driver
    ///
    /// An empty database is seeded with the network's genesis block.
    pub fn new(db: Box<dyn BlockchainDB>, network: Network) -> Result<Blockchain> {
        let mut blockchain = Blockchain {
            db,
            network,
            alternative_blocks: HashMap::new(),
            checkpoints: Checkpoints::new(),
            enforce_dns_checkpoints: false,
            tx_pool: None
        };

        if blockchain.db.get_block_count() == 0 {
            let genesis = genesis::generate_genesis_block(network);
            info!("Blockchain not found, generating genesis {}", genesis.get_hash());
            blockchain.apply_genesis(genesis)?;
        }

        info!(
            "Blockchain initialized. Height: {}, tail id: {}",
            blockchain.get_current_blockchain_height(),
            blockchain.get_tail_id()
        );
        Ok(blockchain)
    }

    /// Stores pending chain state and detaches from the pool seam
    pub fn deinit(&mut self) -> Result<()> {
        self.tx_pool = None;
        self.store_blockchain()
    }

    /// Wires up the transaction pool seam
    pub fn set_tx_pool(&mut self, tx_pool: Weak<Mutex<dyn TxPoolDriver>>) {
        self.tx_pool = Some(tx_pool);
    }

    /// Replaces the checkpoint set
    pub fn set_checkpoints(&mut self, checkpoints: Checkpoints) {
        self.checkpoints = checkpoints;
    }

    /// Enables or disables enforcement of the DNS checkpoint channel
    pub fn set_enforce_dns_checkpoints(&mut self, enforce: bool) {
        self.enforce_dns_checkpoints = enforce;
    }

    /// Refreshes the checkpoint set and validates it against stored blocks
    ///
    /// Loads the JSON hashfile at `path` (when present) and, for a DNS-channel
    /// refresh with enforcement enabled, merges the built-in network set. Any
    /// conflict — within the set or with an already-stored block — is an error:
    /// continuing with a divergent chain view is not recoverable.
    pub fn update_checkpoints(&mut self, path: &Path, include_dns: bool) -> Result<()> {
        if include_dns && self.enforce_dns_checkpoints {
            for (height, hash) in Checkpoints::for_network(self.network).iter() {
                self.checkpoints.add_checkpoint(*height, *hash)?;
            }
        }
        self.checkpoints.load_from_json(path)?;

        let height = self.db.get_block_count();
        for (checkpoint_height, hash) in self.checkpoints.iter() {
            if *checkpoint_height < height {
                let stored = self.db.get_block_id_by_height(*checkpoint_height);
                if stored != Some(*hash) {
                    error!(
                        "Checkpoint at height {} conflicts with stored block",
                        checkpoint_height
                    );
                    return Err(Error::Checkpoints(
                        common::checkpoints::Error::Conflict {
                            height: *checkpoint_height
                        }
                    ));
                }
            }
        }
        Ok(())
    }

    // Chain queries

    /// Number of blocks on the main chain
    pub fn get_current_blockchain_height(&self) -> u64 {
        self.db.get_block_count()
    }

    /// Id of the main chain tail block
    pub fn get_tail_id(&self) -> Hash256 {
        self.db
            .get_block_id_by_height(self.db.get_block_count().saturating_sub(1))
            .unwrap_or_else(Hash256::null_hash)
    }

    /// Height and id of the main chain tail block
    pub fn get_blockchain_top(&self) -> (u64, Hash256) {
        (
            self.db.get_block_count().saturating_sub(1),
            self.get_tail_id()
        )
    }

    /// Blocks from `start_offset` (at most `count` of them)
    pub fn get_blocks(&self, start_offset: u64, count: u64) -> Vec<Block> {
        (start_offset..start_offset.saturating_add(count))
            .filter_map(|height| self.db.get_block_by_height(height))
            .collect()
    }

    /// Blocks from `start_offset` together with their confirmed transactions
    pub fn get_blocks_with_transactions(
        &self,
        start_offset: u64,
        count: u64
    ) -> (Vec<Block>, Vec<Transaction>) {
        let blocks = self.get_blocks(start_offset, count);
        let mut transactions = Vec::new();
        for block in &blocks {
            let (mut txs, _) = self.get_transactions(&block.tx_hashes);
            transactions.append(&mut txs);
        }
        (blocks, transactions)
    }

    /// Confirmed transactions for the given ids, plus the ids that missed
    pub fn get_transactions(&self, tx_ids: &[Hash256]) -> (Vec<Transaction>, Vec<Hash256>) {
        let mut transactions = Vec::new();
        let mut missed = Vec::new();
        for tx_id in tx_ids {
            match self.db.get_transaction(tx_id) {
                Some(tx) => transactions.push(tx),
                None => missed.push(*tx_id)
            }
        }
        (transactions, missed)
    }

    /// All currently tracked alternative blocks
    pub fn get_alternative_blocks(&self) -> Vec<Block> {
        self.alternative_blocks.values().cloned().collect()
    }

    /// Number of currently tracked alternative blocks
    pub fn get_alternative_blocks_count(&self) -> usize {
        self.alternative_blocks.len()
    }

    /// Whether the given transaction is confirmed on the main chain
    pub fn have_tx(&self, tx_id: &Hash256) -> bool {
        self.db.have_tx(tx_id)
    }

    /// Whether the given key image has been spent on the main chain
    pub fn have_tx_keyimg_as_spent(&self, key_image: &KeyImage) -> bool {
        self.db.has_key_image(key_image)
    }

    /// Whether the given block is known (main or alternative chain)
    pub fn have_block(&self, block_id: &Hash256) -> bool {
        self.db.have_block(block_id) || self.alternative_blocks.contains_key(block_id)
    }

    /// Main chain block id at the given height
    pub fn get_block_id_by_height(&self, height: u64) -> Option<Hash256> {
        self.db.get_block_id_by_height(height)
    }

    /// Block with the given id, from the main or an alternative chain
    pub fn get_block_by_hash(&self, block_id: &Hash256) -> Option<Block> {
        self.db
            .get_block_by_hash(block_id)
            .or_else(|| self.alternative_blocks.get(block_id).cloned())
    }

    /// Number of confirmed transactions (coinbase included)
    pub fn get_total_transactions(&self) -> u64 {
        self.db.get_tx_count()
    }

    /// Number of known outputs of the given amount
    pub fn get_num_outputs(&self, amount: u64) -> u64 {
        self.db.get_num_outputs(amount)
    }

    /// Per-amount global output indexes of a confirmed transaction
    pub fn get_tx_outputs_gindexs(&self, tx_id: &Hash256) -> Result<Vec<u64>> {
        self.db
            .get_tx_output_indexes(tx_id)
            .ok_or(Error::TransactionNotFound)
    }

    /// Current block size limit: twice the median weight of the trailing
    /// reward window, floored at the full reward zone
    pub fn get_current_cumulative_blocksize_limit(&self) -> u64 {
        2 * self.median_block_weight() as u64
    }

    fn median_block_weight(&self) -> usize {
        let height = self.db.get_block_count();
        let start = height.saturating_sub(cryptonote_config::REWARD_BLOCKS_WINDOW as u64);
        let mut weights: Vec<usize> = (start..height)
            .filter_map(|h| self.db.get_block_metadata(h))
            .map(|metadata| metadata.block_weight)
            .collect();
        if weights.is_empty() {
            return cryptonote_config::BLOCK_GRANTED_FULL_REWARD_ZONE;
        }
        weights.sort_unstable();
        std::cmp::max(
            weights[weights.len() / 2],
            cryptonote_config::BLOCK_GRANTED_FULL_REWARD_ZONE
        )
    }

    fn already_generated_coins(&self) -> u64 {
        let height = self.db.get_block_count();
        if height == 0 {
            return 0;
        }
        self.db
            .get_block_metadata(height - 1)
            .map(|metadata| metadata.coins_generated)
            .unwrap_or(0)
    }

    /// Difficulty the next main chain block must satisfy
    pub fn get_difficulty_for_next_block(&self) -> u64 {
        let height = self.db.get_block_count();
        let start = height.saturating_sub(cryptonote_config::DIFFICULTY_WINDOW as u64);
        let mut timestamps = Vec::new();
        let mut cumulative_difficulties = Vec::new();
        for h in start..height {
            if let (Some(block), Some(metadata)) =
                (self.db.get_block_by_height(h), self.db.get_block_metadata(h))
            {
                timestamps.push(block.header.timestamp);
                cumulative_difficulties.push(metadata.cumulative_difficulty);
            }
        }
        next_difficulty(&timestamps, &cumulative_difficulties)
    }

    // Block admission

    /// Admits a block arriving from any source
    ///
    /// Fills `bvc` with the outcome. Returns false when the block failed
    /// verification or was already known.
    pub fn add_new_block(&mut self, block: Block, bvc: &mut BlockVerificationContext) -> bool {
        let block_id = block.get_hash();
        if self.have_block(&block_id) {
            debug!("Block {} already exists", block_id);
            bvc.already_exists = true;
            return false;
        }

        if block.header.prev_id == self.get_tail_id() {
            self.handle_block_to_main_chain(block, block_id, bvc)
        } else {
            self.handle_alternative_block(block, block_id, bvc)
        }
    }

    /// Wipes the stored chain and re-seeds it with the given genesis block
    pub fn reset_and_set_genesis_block(&mut self, block: Block) -> Result<()> {
        if block.height() != Some(0) {
            return Err(Error::InvalidGenesisBlock);
        }
        self.db.reset()?;
        self.alternative_blocks.clear();
        self.apply_genesis(block)
    }

    fn apply_genesis(&mut self, block: Block) -> Result<()> {
        let weight = blob_size(&block);
        let coins: u64 = block
            .miner_tx
            .prefix
            .outputs
            .iter()
            .map(|output| output.amount)
            .sum();
        self.db.add_block(
            block,
            BlockMetadata {
                block_weight: weight,
                cumulative_difficulty: 1,
                coins_generated: coins
            },
            Vec::new()
        )?;
        Ok(())
    }

    fn handle_block_to_main_chain(
        &mut self,
        block: Block,
        block_id: Hash256,
        bvc: &mut BlockVerificationContext
    ) -> bool {
        let height = self.db.get_block_count();

        if block.height() != Some(height) {
            warn!(
                "Block {} has a malformed or mismatched coinbase height",
                block_id
            );
            bvc.verification_failed = true;
            return false;
        }
        if block.header.timestamp > current_time() + BLOCK_FUTURE_TIME_LIMIT {
            warn!("Block {} has a timestamp too far in the future", block_id);
            bvc.verification_failed = true;
            return false;
        }

        let difficulty = self.get_difficulty_for_next_block();
        if !check_hash_for_difficulty(block_id.data(), difficulty) {
            warn!(
                "Block {} does not satisfy difficulty {}",
                block_id, difficulty
            );
            bvc.verification_failed = true;
            return false;
        }

        if self.checkpoints.check_block(height, &block_id).is_err() {
            bvc.verification_failed = true;
            return false;
        }

        // Everything below needs the block's transactions out of the pool.
        // From here on, failure paths must hand them back.
        let transactions = match self.take_block_transactions(&block) {
            Ok(transactions) => transactions,
            Err(err) => {
                warn!("Rejecting block {}: {}", block_id, err);
                bvc.verification_failed = true;
                return false;
            }
        };

        if let Err(err) = self.check_block_content(&block, &transactions) {
            warn!("Rejecting block {}: {}", block_id, err);
            self.return_transactions_to_pool(transactions);
            bvc.verification_failed = true;
            return false;
        }

        let fees: u64 = transactions.iter().map(tx_fee).sum();
        let minted: u64 = block
            .miner_tx
            .prefix
            .outputs
            .iter()
            .map(|output| output.amount)
            .sum::<u64>()
            .saturating_sub(fees);

        let weight =
            blob_size(&block) + transactions.iter().map(blob_size).sum::<usize>();
        let metadata = BlockMetadata {
            block_weight: weight,
            cumulative_difficulty: self
                .db
                .get_block_metadata(height.saturating_sub(1))
                .map(|m| m.cumulative_difficulty)
                .unwrap_or(0)
                + difficulty,
            coins_generated: self.already_generated_coins() + minted
        };

        if let Err(err) = self.db.add_block(block, metadata, transactions.clone()) {
            error!("Failed to store block {}: {}", block_id, err);
            self.return_transactions_to_pool(transactions);
            bvc.verification_failed = true;
            return false;
        }

        info!(
            "Block {} added to main chain at height {} (difficulty {})",
            block_id, height, difficulty
        );
        bvc.added_to_main_chain = true;
        true
    }

    /// Pulls the block's transactions from the pool, all or nothing
    fn take_block_transactions(&mut self, block: &Block) -> Result<Vec<Transaction>> {
        if block.tx_hashes.is_empty() {
            return Ok(Vec::new());
        }

        let pool = self.upgrade_tx_pool()?;
        let mut pool = pool.lock().unwrap();
        let mut transactions = Vec::with_capacity(block.tx_hashes.len());
        for tx_id in &block.tx_hashes {
            match pool.take_transaction(tx_id) {
                Some(tx) => transactions.push(tx),
                None => {
                    for tx in transactions {
                        pool.return_transaction(tx);
                    }
                    return Err(Error::TransactionNotInPool);
                }
            }
        }
        Ok(transactions)
    }

    fn return_transactions_to_pool(&mut self, transactions: Vec<Transaction>) {
        if transactions.is_empty() {
            return;
        }
        if let Ok(pool) = self.upgrade_tx_pool() {
            let mut pool = pool.lock().unwrap();
            for tx in transactions {
                pool.return_transaction(tx);
            }
        }
    }

    fn upgrade_tx_pool(&self) -> Result<std::sync::Arc<Mutex<dyn TxPoolDriver>>> {
        self.tx_pool
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(Error::TxPoolUnavailable)
    }

    /// Validates transaction spends and the coinbase of a candidate block
    fn check_block_content(&self, block: &Block, transactions: &[Transaction]) -> Result<()> {
        for tx in transactions {
            for key_image in tx.key_images() {
                ensure!(!self.db.has_key_image(key_image), Error::SpentKeyImage);
            }
        }

        let fees: u64 = transactions.iter().map(tx_fee).sum();
        let weight = blob_size(block) + transactions.iter().map(blob_size).sum::<usize>();
        let base_reward = emission::get_block_reward(
            self.median_block_weight(),
            weight,
            self.already_generated_coins()
        )
        .map_err(|_| Error::InvalidCoinbase)?;

        let coinbase: u64 = block
            .miner_tx
            .prefix
            .outputs
            .iter()
            .map(|output| output.amount)
            .sum();
        ensure!(coinbase <= base_reward + fees, Error::InvalidCoinbase);
        Ok(())
    }

    fn handle_alternative_block(
        &mut self,
        block: Block,
        block_id: Hash256,
        bvc: &mut BlockVerificationContext
    ) -> bool {
        let height = match block.height() {
            Some(height) => height,
            None => {
                bvc.verification_failed = true;
                return false;
            }
        };

        // Reorganizing below a checkpoint is never allowed
        if self.checkpoints.is_in_checkpoint_zone(height) {
            warn!(
                "Alternative block {} at height {} is inside the checkpoint zone",
                block_id, height
            );
            bvc.verification_failed = true;
            return false;
        }

        let parent_known = self.db.have_block(&block.header.prev_id)
            || self.alternative_blocks.contains_key(&block.header.prev_id);
        if !parent_known {
            debug!(
                "Block {} at height {} has unknown parent {}, orphaned",
                block_id, height, block.header.prev_id
            );
            bvc.marked_as_orphaned = true;
            return true;
        }

        if !check_hash_for_difficulty(block_id.data(), self.alternative_difficulty()) {
            warn!("Alternative block {} does not satisfy difficulty", block_id);
            bvc.verification_failed = true;
            return false;
        }

        info!(
            "Block {} added as alternative on height {}",
            block_id, height
        );
        self.alternative_blocks.insert(block_id, block);

        self.try_switch_to_alternative(block_id);
        true
    }

    // The retarget window of the main chain also gates alternative branches;
    // a proper per-branch window would need the branch's own metadata
    fn alternative_difficulty(&self) -> u64 {
        self.get_difficulty_for_next_block()
    }

    /// Switches to the alternative chain ending in `alt_tip` if it is longer
    /// than the main chain
    fn try_switch_to_alternative(&mut self, alt_tip: Hash256) {
        let mut chain = Vec::new();
        let mut cursor = alt_tip;
        while let Some(block) = self.alternative_blocks.get(&cursor) {
            chain.push(cursor);
            cursor = block.header.prev_id;
        }
        let fork_parent = cursor;

        let fork_height = match self.db.get_block_height(&fork_parent) {
            Some(height) => height,
            // The branch bottoms out in another orphan
            None => return
        };

        chain.reverse();
        let alt_tip_height = fork_height + chain.len() as u64;
        let main_tip_height = self.db.get_block_count().saturating_sub(1);
        if alt_tip_height <= main_tip_height {
            return;
        }

        info!(
            "Reorganize triggered: alternative chain of height {} beats main chain height {}",
            alt_tip_height, main_tip_height
        );

        // Pop the main chain back to the fork point, parking the removed
        // transactions in the pool for the new branch to pick up
        let mut popped = Vec::new();
        while self.db.get_block_count() > fork_height + 1 {
            match self.db.pop_block() {
                Ok((block, transactions)) => {
                    self.return_transactions_to_pool(transactions.clone());
                    popped.push((block, transactions));
                }
                Err(err) => {
                    error!("Failed to pop block during reorganization: {}", err);
                    return;
                }
            }
        }

        let mut applied = 0;
        for block_id in &chain {
            let block = match self.alternative_blocks.remove(block_id) {
                Some(block) => block,
                None => break
            };
            let mut bvc = BlockVerificationContext::default();
            if !self.handle_block_to_main_chain(block, *block_id, &mut bvc) {
                warn!(
                    "Alternative block {} failed full verification, rolling back",
                    block_id
                );
                self.rollback_switching(popped, applied, fork_height);
                return;
            }
            applied += 1;
        }

        // The replaced suffix becomes the alternative branch
        for (block, _) in popped {
            self.alternative_blocks.insert(block.get_hash(), block);
        }
        info!(
            "Reorganize success, new height {}",
            self.db.get_block_count()
        );
    }

    /// Undoes a failed chain switch by restoring the previously popped blocks
    fn rollback_switching(
        &mut self,
        popped: Vec<(Block, Vec<Transaction>)>,
        applied: u64,
        fork_height: u64
    ) {
        for _ in 0..applied {
            if let Ok((block, transactions)) = self.db.pop_block() {
                self.return_transactions_to_pool(transactions);
                self.alternative_blocks.insert(block.get_hash(), block);
            }
        }
        debug_assert_eq!(self.db.get_block_count(), fork_height + 1);

        // The popped blocks' transactions are back in the pool, so the normal
        // main chain path can re-apply them
        for (block, _) in popped.into_iter().rev() {
            let block_id = block.get_hash();
            let mut bvc = BlockVerificationContext::default();
            if !self.handle_block_to_main_chain(block, block_id, &mut bvc) {
                error!("Failed to restore block {} during rollback", block_id);
                return;
            }
        }
    }

    // Templates and mining

    /// Builds a candidate block on the current tail for the given address
    pub fn create_block_template(
        &self,
        address: &PublicKey,
        extra_nonce: &[u8]
    ) -> Result<BlockTemplate> {
        let height = self.db.get_block_count();
        let difficulty = self.get_difficulty_for_next_block();
        let median_weight = self.median_block_weight();
        let already_generated = self.already_generated_coins();

        let size_limit = (self.get_current_cumulative_blocksize_limit() as usize)
            .saturating_sub(cryptonote_config::COINBASE_BLOB_RESERVED_SIZE);

        let mut transactions = Vec::new();
        let mut total_weight = 0usize;
        let mut fees = 0u64;
        if let Ok(pool) = self.upgrade_tx_pool() {
            let pool = pool.lock().unwrap();
            for tx in pool.template_transactions() {
                let weight = blob_size(&tx);
                if total_weight + weight > size_limit {
                    continue;
                }
                total_weight += weight;
                fees += tx_fee(&tx);
                transactions.push(tx);
            }
        }

        let base_reward = emission::get_block_reward(
            median_weight,
            total_weight + cryptonote_config::COINBASE_BLOB_RESERVED_SIZE,
            already_generated
        )
        .map_err(|_| Error::InvalidCoinbase)?;

        let block = Block {
            header: common::BlockHeader {
                major_version: 1,
                minor_version: 0,
                timestamp: current_time(),
                prev_id: self.get_tail_id(),
                nonce: 0
            },
            miner_tx: common::construct_miner_tx(
                height,
                base_reward + fees,
                address,
                extra_nonce
            ),
            tx_hashes: transactions.iter().map(GetHash::get_hash).collect()
        };

        Ok(BlockTemplate {
            block,
            difficulty,
            height
        })
    }

    // Synchronization helpers

    /// The compact locator describing our main chain, dense near the tip and
    /// exponentially sparse towards genesis
    pub fn get_short_chain_history(&self) -> Vec<Hash256> {
        let height = self.db.get_block_count();
        if height == 0 {
            return Vec::new();
        }

        let mut ids = Vec::new();
        let mut current = height - 1;
        let mut step = 1u64;
        let mut taken = 0;
        loop {
            if let Some(id) = self.db.get_block_id_by_height(current) {
                ids.push(id);
            }
            taken += 1;
            if current == 0 {
                break;
            }
            if taken >= 10 {
                step *= 2;
            }
            current = current.saturating_sub(step);
        }
        ids
    }

    /// Finds the split point between our main chain and a peer's short history
    fn find_split_height(&self, short_history: &[Hash256]) -> Result<u64> {
        for block_id in short_history {
            if let Some(height) = self.db.get_block_height(block_id) {
                return Ok(height);
            }
        }
        Err(Error::NoCommonBlock)
    }

    /// Answers a peer's short history with the block ids it is missing
    pub fn find_blockchain_supplement(&self, short_history: &[Hash256]) -> Result<ChainEntry> {
        let start_height = self.find_split_height(short_history)?;
        let total_height = self.db.get_block_count();
        let block_ids = (start_height..total_height)
            .take(cryptonote_config::BLOCKS_IDS_SYNCHRONIZING_DEFAULT_COUNT)
            .filter_map(|height| self.db.get_block_id_by_height(height))
            .collect();

        Ok(ChainEntry {
            start_height,
            total_height,
            block_ids
        })
    }

    /// Answers a peer's short history with full blocks and transactions
    ///
    /// `req_start_block` overrides the locator-derived starting height.
    pub fn find_blockchain_supplement_with_blocks(
        &self,
        req_start_block: Option<u64>,
        short_history: &[Hash256],
        max_count: usize
    ) -> Result<(Vec<(Block, Vec<Transaction>)>, u64, u64)> {
        let start_height = match req_start_block {
            Some(height) => {
                ensure!(height < self.db.get_block_count(), Error::BlockNotFound);
                height
            }
            None => self.find_split_height(short_history)?
        };

        let total_height = self.db.get_block_count();
        let mut blocks = Vec::new();
        for height in (start_height..total_height).take(max_count) {
            if let Some(block) = self.db.get_block_by_height(height) {
                let (txs, _) = self.get_transactions(&block.tx_hashes);
                blocks.push((block, txs));
            }
        }
        Ok((blocks, total_height, start_height))
    }

    /// Serves a bulk object fetch
    pub fn handle_get_objects(&self, request: &GetObjectsRequest) -> GetObjectsResponse {
        let mut response = GetObjectsResponse {
            current_blockchain_height: self.db.get_block_count(),
            ..Default::default()
        };

        for block_id in &request.blocks {
            match self.db.get_block_by_hash(block_id) {
                Some(block) => {
                    let (txs, missed) = self.get_transactions(&block.tx_hashes);
                    response.missed_ids.extend(missed);
                    response.blocks.push(BlockCompleteEntry {
                        block: bincode::serialize(&block).unwrap(),
                        txs: txs
                            .iter()
                            .map(|tx| bincode::serialize(tx).unwrap())
                            .collect()
                    });
                }
                None => response.missed_ids.push(*block_id)
            }
        }

        for tx_id in &request.txs {
            match self.db.get_transaction(tx_id) {
                Some(tx) => response.txs.push(bincode::serialize(&tx).unwrap()),
                None => response.missed_ids.push(*tx_id)
            }
        }

        response
    }

    /// Samples random confirmed outputs per amount for ring construction
    pub fn get_random_outs_for_amounts(&self, request: &RandomOutsRequest) -> Vec<OutsForAmount> {
        use rand::seq::SliceRandom;

        let mut rng = rand::thread_rng();
        request
            .amounts
            .iter()
            .map(|&amount| {
                let available = self.db.get_num_outputs(amount);
                let mut indexes: Vec<u64> = (0..available).collect();
                indexes.shuffle(&mut rng);
                let outs = indexes
                    .into_iter()
                    .take(request.outs_count as usize)
                    .filter_map(|global_index| {
                        self.db.get_output(amount, global_index).map(|(_, out_key)| {
                            OutEntry {
                                global_index,
                                out_key
                            }
                        })
                    })
                    .collect();
                OutsForAmount { amount, outs }
            })
            .collect()
    }

    // Maintenance

    /// Flushes the chain to durable storage
    pub fn store_blockchain(&mut self) -> Result<()> {
        self.db.sync()?;
        debug!("Blockchain stored ({} bytes on disk)", self.db.size());
        Ok(())
    }

    /// Logs a summary of the given main chain range
    pub fn print_blockchain(&self, start_index: u64, end_index: u64) {
        for height in start_index..=end_index {
            match self.db.get_block_by_height(height) {
                Some(block) => info!(
                    "height {}, timestamp {}, id {}, {} transaction(s)",
                    height,
                    block.header.timestamp,
                    block.get_hash(),
                    block.tx_hashes.len()
                ),
                None => {
                    warn!("Block at height {} does not exist", height);
                    break;
                }
            }
        }
    }

    /// Logs the height → id index of the whole main chain
    pub fn print_blockchain_index(&self) {
        for height in 0..self.db.get_block_count() {
            if let Some(block_id) = self.db.get_block_id_by_height(height) {
                info!("height {}, id {}", height, block_id);
            }
        }
    }

    /// Dumps every confirmed output to the given file
    pub fn print_blockchain_outs(&self, file: &Path) -> Result<()> {
        let mut out = std::fs::File::create(file)?;
        for height in 0..self.db.get_block_count() {
            let block = match self.db.get_block_by_height(height) {
                Some(block) => block,
                None => continue
            };
            let miner_tx_id = block.miner_tx.get_hash();
            let (txs, _) = self.get_transactions(&block.tx_hashes);
            for (tx_id, tx) in std::iter::once((miner_tx_id, &block.miner_tx))
                .chain(block.tx_hashes.iter().copied().zip(txs.iter()))
            {
                for (index, output) in tx.prefix.outputs.iter().enumerate() {
                    let TXOutTarget::ToKey { key } = output.target;
                    writeln!(
                        out,
                        "height {}, tx {}, out {}, amount {}, key {}",
                        height,
                        tx_id,
                        index,
                        output.amount,
                        hex::encode(key.as_bytes())
                    )?;
                }
            }
        }
        Ok(())
    }
}
