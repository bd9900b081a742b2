//! # Cryptonote Core
//!
//! The node coordinator: owns the blockchain store, the transaction memory
//! pool and the miner, and mediates every consensus-affecting state
//! transition between them, the peer protocol layer and RPC callers.
//!
//! Locking discipline: the transaction admission pipeline is serialized
//! end-to-end by a single admission mutex; block admission relies on the
//! chain store's own write lock; read queries take no coordinator-level lock.
//! Whenever both the chain and the pool must be held, the chain is locked
//! first.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};

use blockchain::{Blockchain, BlockTemplate, TxPoolDriver};
use common::checkpoints::Checkpoints;
use common::{
    Block, BlockVerificationContext, GetHash, Transaction, TxVerificationContext, TXIn,
    TXOutTarget
};
use crypto::{Hash256, PublicKey};
use cryptonote_config::Network;
use miner::{Miner, MinerHandler};
use txpool::TXPool;

mod config;
mod protocol;
mod throttle;

pub use blockchain::{
    BlockCompleteEntry, ChainEntry, GetObjectsRequest, GetObjectsResponse, OutsForAmount,
    RandomOutsRequest
};
pub use config::Config;
pub use protocol::{ConnectionContext, CryptonoteProtocol, NotifyNewBlock};
pub use throttle::Throttle;

use protocol::ProtocolStub;

/// Type alias for core operations that may result in an error
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for core initialization and teardown
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when the database backend cannot be opened
    #[error(transparent)]
    DB(#[from] blockchain_db::Error),

    /// Returned when the blockchain store fails to initialize or store
    #[error(transparent)]
    Blockchain(#[from] blockchain::Error),

    /// Returned when the transaction pool fails to load or persist its state
    #[error(transparent)]
    TxPool(#[from] txpool::Error),

    /// Returned when the miner configuration is invalid
    #[error(transparent)]
    Miner(#[from] miner::Error),

    /// Returned when checkpoints loaded from the hashfile or the DNS channel
    /// conflict with each other or with already-accepted blocks
    #[error("One or more loaded checkpoints conflicted with existing state")]
    CheckpointConflict
}

/// Node status summary served to RPC callers
#[derive(Clone, Debug, Default)]
pub struct CoreStatInfo {
    /// Current miner hashrate
    pub mining_speed: u64,
    /// Number of tracked alternative blocks
    pub alternative_blocks: usize,
    /// Current main chain height
    pub blockchain_height: u64,
    /// Number of pooled transactions
    pub tx_pool_size: usize,
    /// Id of the main chain tail block
    pub top_block_id: Hash256
}

struct CheckpointTimestamps {
    last_dns_update: u64,
    last_json_update: u64
}

/// Process-wide fast exit flag; monotonic false → true, observed by `deinit`
static FAST_EXIT: AtomicBool = AtomicBool::new(false);

fn current_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

/// The node coordinator
///
/// One instance lives per process. The struct is shared behind an `Arc` and
/// invoked concurrently by the protocol layer, RPC, the miner's block-found
/// callback and the host's idle loop.
pub struct CryptonoteCore {
    blockchain: Arc<RwLock<Blockchain>>,
    txpool: Arc<Mutex<TXPool>>,
    miner: Miner,
    protocol: RwLock<Arc<dyn CryptonoteProtocol>>,

    network: Network,
    testnet: bool,
    data_dir: PathBuf,
    dns_checkpoints_enabled: bool,
    miner_config: miner::Config,

    checkpoints_path: Mutex<Option<PathBuf>>,
    checkpoint_timestamps: Mutex<CheckpointTimestamps>,
    target_blockchain_height: AtomicU64,
    starter_message_showed: AtomicBool,
    incoming_tx_lock: Mutex<()>,
    store_blockchain_interval: Throttle,

    test_drop_download: AtomicBool,
    test_drop_download_height: AtomicU64
}

impl CryptonoteCore {
    /// Constructs the coordinator and its three owned subsystems
    ///
    /// Opens the configured database backend and seeds the chain; the
    /// subsystems are wired but not yet initialized — call [`init`] next.
    ///
    /// [`init`]: CryptonoteCore::init
    pub fn new(config: &Config) -> Result<CryptonoteCore> {
        let network = config.network();
        let data_dir = config.resolved_data_dir();
        std::fs::create_dir_all(&data_dir).map_err(blockchain_db::Error::from)?;

        info!("Loading blockchain from {}", data_dir.display());
        let db = blockchain_db::open_db(
            &config.blockchain_config.blockchain_db_config,
            &data_dir
        )?;
        let blockchain = Arc::new(RwLock::new(Blockchain::new(db, network)?));

        let txpool = Arc::new(Mutex::new(TXPool::new(blockchain.clone())));
        {
            let driver: Arc<Mutex<dyn TxPoolDriver>> = txpool.clone();
            blockchain.write().unwrap().set_tx_pool(Arc::downgrade(&driver));
        }

        Ok(CryptonoteCore {
            blockchain,
            txpool,
            miner: Miner::new(),
            protocol: RwLock::new(Arc::new(ProtocolStub) as Arc<dyn CryptonoteProtocol>),
            network,
            testnet: config.testnet,
            data_dir,
            dns_checkpoints_enabled: config.dns_checkpoints,
            miner_config: config.miner_config.clone(),
            checkpoints_path: Mutex::new(None),
            checkpoint_timestamps: Mutex::new(CheckpointTimestamps {
                last_dns_update: 0,
                last_json_update: 0
            }),
            target_blockchain_height: AtomicU64::new(0),
            starter_message_showed: AtomicBool::new(false),
            incoming_tx_lock: Mutex::new(()),
            store_blockchain_interval: Throttle::new(Duration::from_secs(
                cryptonote_config::STORE_BLOCKCHAIN_INTERVAL
            )),
            test_drop_download: AtomicBool::new(config.test_drop_download),
            test_drop_download_height: AtomicU64::new(config.test_drop_download_height)
        })
    }

    /// Initializes the subsystems: pool state, checkpoints, miner
    ///
    /// Must be called before the coordinator is exposed to callers. Fails if
    /// the persisted pool cannot be loaded, if loaded checkpoints conflict
    /// with the stored chain, or if the miner configuration is invalid.
    pub fn init(self: &Arc<Self>) -> Result<()> {
        self.txpool.lock().unwrap().init(&self.data_dir)?;

        if !self.testnet {
            let mut chain = self.blockchain.write().unwrap();
            chain.set_checkpoints(Checkpoints::for_network(self.network));
            *self.checkpoints_path.lock().unwrap() =
                Some(self.data_dir.join(cryptonote_config::JSON_HASH_FILE_NAME));
        }
        self.blockchain
            .write()
            .unwrap()
            .set_enforce_dns_checkpoints(self.dns_checkpoints_enabled);

        // Load json & DNS checkpoints and verify them against the blocks we
        // already have
        if !self.update_checkpoints() {
            return Err(Error::CheckpointConflict);
        }

        let self_dyn: Arc<dyn MinerHandler> = self.clone();
        let handler: Weak<dyn MinerHandler> = Arc::downgrade(&self_dyn);
        self.miner.init(&self.miner_config, handler, self.testnet)?;

        Ok(())
    }

    /// Tears the subsystems down in reverse order
    ///
    /// Skips the chain store teardown when the fast-exit flag is set: a
    /// synchronous exit is worth more than a clean shutdown there.
    pub fn deinit(&self) {
        self.miner.stop();
        if let Err(err) = self.txpool.lock().unwrap().deinit() {
            error!("Failed to persist the transaction pool: {}", err);
        }
        if !Self::get_fast_exit() {
            if let Err(err) = self.blockchain.write().unwrap().deinit() {
                error!("Failed to store the blockchain: {}", err);
            }
        }
    }

    /// Requests node shutdown
    pub fn stop(&self) {
        self.graceful_exit();
    }

    /// Flips the process-wide fast-exit flag (monotonic, never cleared)
    pub fn set_fast_exit() {
        FAST_EXIT.store(true, Ordering::SeqCst);
    }

    /// Reads the process-wide fast-exit flag
    pub fn get_fast_exit() -> bool {
        FAST_EXIT.load(Ordering::SeqCst)
    }

    /// Attaches (or detaches) the peer protocol; `None` restores the stub
    pub fn set_cryptonote_protocol(&self, protocol: Option<Arc<dyn CryptonoteProtocol>>) {
        *self.protocol.write().unwrap() = match protocol {
            Some(protocol) => protocol,
            None => Arc::new(ProtocolStub)
        };
    }

    /// Replaces the chain's checkpoint set
    pub fn set_checkpoints(&self, checkpoints: Checkpoints) {
        self.blockchain.write().unwrap().set_checkpoints(checkpoints);
    }

    /// Sets the path of the JSON checkpoint hashfile
    pub fn set_checkpoints_file_path(&self, path: PathBuf) {
        *self.checkpoints_path.lock().unwrap() = Some(path);
    }

    /// Enables or disables enforcement of DNS-sourced checkpoints
    pub fn set_enforce_dns_checkpoints(&self, enforce: bool) {
        self.blockchain
            .write()
            .unwrap()
            .set_enforce_dns_checkpoints(enforce);
    }

    // Checkpoint scheduler

    /// Refreshes the checkpoint channels that are due
    ///
    /// The DNS channel refreshes hourly and also counts as a JSON refresh;
    /// the JSON channel refreshes every ten minutes. A failed refresh brings
    /// the node down: an accepted block conflicting with a later-learned
    /// checkpoint cannot be recovered by continued operation.
    pub fn update_checkpoints(&self) -> bool {
        self.update_checkpoints_at(current_time())
    }

    fn update_checkpoints_at(&self, now: u64) -> bool {
        let include_dns = {
            let mut timestamps = self.checkpoint_timestamps.lock().unwrap();
            if now.saturating_sub(timestamps.last_dns_update)
                >= cryptonote_config::DNS_CHECKPOINT_REFRESH_INTERVAL
            {
                timestamps.last_dns_update = now;
                timestamps.last_json_update = now;
                Some(true)
            } else if now.saturating_sub(timestamps.last_json_update)
                >= cryptonote_config::JSON_CHECKPOINT_REFRESH_INTERVAL
            {
                timestamps.last_json_update = now;
                Some(false)
            } else {
                None
            }
        };

        let include_dns = match include_dns {
            Some(include_dns) => include_dns,
            None => return true
        };

        let path = self
            .checkpoints_path
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default();
        let refreshed = self
            .blockchain
            .write()
            .unwrap()
            .update_checkpoints(&path, include_dns);

        // if anything fishy happened getting new checkpoints, bring down the
        // house
        if let Err(err) = refreshed {
            error!("Checkpoint refresh failed: {}", err);
            self.graceful_exit();
            return false;
        }
        true
    }

    #[cfg(test)]
    fn checkpoint_timestamps(&self) -> (u64, u64) {
        let timestamps = self.checkpoint_timestamps.lock().unwrap();
        (timestamps.last_dns_update, timestamps.last_json_update)
    }

    #[cfg(test)]
    fn reset_checkpoint_timestamps(&self) {
        let mut timestamps = self.checkpoint_timestamps.lock().unwrap();
        timestamps.last_dns_update = 0;
        timestamps.last_json_update = 0;
    }

    // Transaction admission

    /// Admits a transaction blob arriving from a peer, RPC, or a block in
    /// flight
    ///
    /// `keeped_by_block` marks transactions embedded in a block being
    /// processed, which relaxes the size and decidability checks. The whole
    /// pipeline runs under the admission lock: transactions are processed
    /// strictly one at a time.
    pub fn handle_incoming_tx(
        &self,
        tx_blob: &[u8],
        tvc: &mut TxVerificationContext,
        keeped_by_block: bool
    ) -> bool {
        *tvc = TxVerificationContext::default();
        // want to process all transactions sequentially
        let _admission = self.incoming_tx_lock.lock().unwrap();

        if tx_blob.len() > cryptonote_config::MAX_TX_SIZE {
            warn!(
                "WRONG TRANSACTION BLOB, too big size {}, rejected",
                tx_blob.len()
            );
            tvc.verification_failed = true;
            return false;
        }

        let tx: Transaction = match bincode::deserialize(tx_blob) {
            Ok(tx) => tx,
            Err(_) => {
                warn!("WRONG TRANSACTION BLOB, failed to parse, rejected");
                tvc.verification_failed = true;
                return false;
            }
        };
        let tx_hash = tx.get_hash();
        let tx_prefix_hash = tx.get_prefix_hash();

        if !self.check_tx_syntax(&tx) {
            warn!("WRONG TRANSACTION BLOB, failed to check tx {} syntax, rejected", tx_hash);
            tvc.verification_failed = true;
            return false;
        }

        if !self.check_tx_semantic(&tx, keeped_by_block) {
            warn!("WRONG TRANSACTION BLOB, failed to check tx {} semantic, rejected", tx_hash);
            tvc.verification_failed = true;
            return false;
        }

        let relayed = self.add_new_tx(tx, tx_hash, tx_blob.len(), tvc, keeped_by_block);
        if tvc.verification_failed {
            error!("Transaction verification failed: {}", tx_hash);
        } else if tvc.verification_impossible {
            error!("Transaction verification impossible: {}", tx_hash);
        }
        if tvc.added_to_pool {
            debug!("tx added: {} (prefix hash {})", tx_hash, tx_prefix_hash);
        }
        relayed
    }

    /// Syntax check hook
    ///
    /// Intentionally an unconditional success: the check point exists so
    /// explicit syntax rules can slot in without reshaping the pipeline.
    fn check_tx_syntax(&self, _tx: &Transaction) -> bool {
        true
    }

    /// Stateless validity rules every relayed transaction must satisfy
    fn check_tx_semantic(&self, tx: &Transaction, keeped_by_block: bool) -> bool {
        let tx_hash = tx.get_hash();
        if tx.prefix.inputs.is_empty() {
            warn!("tx with empty inputs, rejected for tx id {}", tx_hash);
            return false;
        }

        if !check_inputs_types_supported(tx) {
            warn!("unsupported input types for tx id {}", tx_hash);
            return false;
        }

        if !check_outs_valid(tx) {
            warn!("tx with invalid outputs, rejected for tx id {}", tx_hash);
            return false;
        }

        if !check_money_overflow(tx) {
            warn!("tx has money overflow, rejected for tx id {}", tx_hash);
            return false;
        }

        let amount_in = inputs_amount(tx);
        let amount_out = outputs_amount(tx);
        if amount_in <= amount_out {
            warn!(
                "tx with wrong amounts: ins {}, outs {}, rejected for tx id {}",
                amount_in, amount_out, tx_hash
            );
            return false;
        }

        if !keeped_by_block {
            let blob_size = bincode::serialized_size(tx).unwrap_or(u64::max_value());
            let size_limit = self
                .blockchain
                .read()
                .unwrap()
                .get_current_cumulative_blocksize_limit()
                .saturating_sub(cryptonote_config::COINBASE_BLOB_RESERVED_SIZE as u64);
            if blob_size >= size_limit {
                warn!(
                    "tx is too large {}, expected not bigger than {}",
                    blob_size, size_limit
                );
                return false;
            }
        }

        if !check_tx_inputs_keyimages_diff(tx) {
            warn!("tx uses a single key image more than once");
            return false;
        }

        true
    }

    /// Final admission step: dedup against pool and chain, then hand the
    /// decision to the pool
    fn add_new_tx(
        &self,
        tx: Transaction,
        tx_hash: Hash256,
        blob_size: usize,
        tvc: &mut TxVerificationContext,
        keeped_by_block: bool
    ) -> bool {
        let chain = self.blockchain.read().unwrap();
        if chain.have_tx(&tx_hash) {
            debug!("tx {} already has a transaction in the blockchain", tx_hash);
            return true;
        }

        let mut pool = self.txpool.lock().unwrap();
        if pool.have_tx(&tx_hash) {
            debug!("tx {} already has a transaction in the pool", tx_hash);
            return true;
        }

        pool.add_tx(&chain, tx, tx_hash, blob_size, tvc, keeped_by_block)
    }

    // Block admission

    /// Admits a block blob arriving from the peer protocol or RPC
    pub fn handle_incoming_block(
        &self,
        block_blob: &[u8],
        bvc: &mut BlockVerificationContext,
        update_miner_blocktemplate: bool
    ) -> bool {
        // load json & DNS checkpoints every 10min/hour respectively and
        // verify them against the blocks we already have
        if !self.update_checkpoints() {
            return false;
        }

        *bvc = BlockVerificationContext::default();
        if block_blob.len() > cryptonote_config::MAX_BLOCK_SIZE {
            warn!(
                "WRONG BLOCK BLOB, too big size {}, rejected",
                block_blob.len()
            );
            bvc.verification_failed = true;
            return false;
        }

        let block: Block = match bincode::deserialize(block_blob) {
            Ok(block) => block,
            Err(_) => {
                warn!("Failed to parse and validate new block");
                bvc.verification_failed = true;
                return false;
            }
        };

        self.add_new_block(block, bvc);
        if update_miner_blocktemplate && bvc.added_to_main_chain {
            self.update_miner_block_template();
        }
        true
    }

    /// Standalone size gate used by RPC before accepting a block blob
    pub fn check_incoming_block_size(&self, block_blob: &[u8]) -> bool {
        if block_blob.len() > cryptonote_config::MAX_BLOCK_SIZE {
            warn!(
                "WRONG BLOCK BLOB, too big size {}, rejected",
                block_blob.len()
            );
            return false;
        }
        true
    }

    /// Admits an already-parsed block
    pub fn add_new_block(&self, block: Block, bvc: &mut BlockVerificationContext) -> bool {
        self.blockchain.write().unwrap().add_new_block(block, bvc)
    }

    /// Sink for blocks found by the local miner
    ///
    /// The miner stays paused from before the chain insert until after the
    /// template refresh. An accepted block is relayed unless a concurrent
    /// reorganization replaced it already, in which case the relay is dropped
    /// silently — the chain reflects reality either way.
    pub fn handle_block_found(&self, block: Block) -> bool {
        let mut bvc = BlockVerificationContext::default();
        self.miner.pause();
        self.blockchain
            .write()
            .unwrap()
            .add_new_block(block.clone(), &mut bvc);
        // anyway - update miner template
        self.update_miner_block_template();
        self.miner.resume();

        if bvc.verification_failed {
            error!("Mined block failed verification");
            return false;
        }
        if !bvc.added_to_main_chain {
            return false;
        }

        self.relay_found_block(&block);
        true
    }

    /// Builds and dispatches the relay notification for a self-mined block
    ///
    /// Returns false when the relay was skipped because a reorganization
    /// raced the mining event.
    fn relay_found_block(&self, block: &Block) -> bool {
        let (current_blockchain_height, txs, missed) = {
            let chain = self.blockchain.read().unwrap();
            let (txs, missed) = chain.get_transactions(&block.tx_hashes);
            let height = chain.get_current_blockchain_height();

            if !missed.is_empty() {
                let block_height = block.height().unwrap_or(0);
                if chain.get_block_id_by_height(block_height) != Some(block.get_hash()) {
                    info!(
                        "Block found but it seems that a reorganize just happened after it, \
                         do not relay this block"
                    );
                    return false;
                }
                error!(
                    "Cannot find some transactions in the found block {}: txs {}, \
                     tx_hashes {}, missed {}",
                    block.get_hash(),
                    txs.len(),
                    block.tx_hashes.len(),
                    missed.len()
                );
                return false;
            }
            (height, txs, missed)
        };
        debug_assert!(missed.is_empty());

        let notification = NotifyNewBlock {
            block: bincode::serialize(block).unwrap(),
            txs: txs
                .iter()
                .map(|tx| bincode::serialize(tx).unwrap())
                .collect(),
            current_blockchain_height,
            hop: 0
        };
        let protocol = self.protocol.read().unwrap().clone();
        protocol.relay_block(&notification, &ConnectionContext::default());
        true
    }

    // Miner coordination

    /// Pushes a fresh template to the miner; called whenever the main chain
    /// advances
    pub fn update_miner_block_template(&self) {
        self.miner.on_block_chain_update();
    }

    /// Suspends mining (reference counted)
    pub fn pause_mine(&self) {
        self.miner.pause();
    }

    /// Resumes mining (reference counted)
    pub fn resume_mine(&self) {
        self.miner.resume();
    }

    /// One-shot edge signal from the protocol layer: the node caught up
    pub fn on_synchronized(&self) {
        self.miner.on_synchronized();
    }

    /// Builds a block template on the current tail
    pub fn get_block_template(
        &self,
        address: &PublicKey,
        extra_nonce: &[u8]
    ) -> Result<BlockTemplate> {
        Ok(self
            .blockchain
            .read()
            .unwrap()
            .create_block_template(address, extra_nonce)?)
    }

    // Idle tick

    /// Invoked by the host's main loop
    ///
    /// Emits the startup banner once, persists the chain on its own throttled
    /// cadence and forwards the tick to the miner and the pool.
    pub fn on_idle(&self) {
        if !self.starter_message_showed.swap(true, Ordering::SeqCst) {
            info!(
                "\n**********************************************************************\n\
                 The daemon will start synchronizing with the network. It may take up to \
                 several hours.\n\n\
                 You can set the level of process detailization through \"set_log <level>\" \
                 command, where <level> is between 0 (no details) and 4 (very verbose).\n\n\
                 Use \"help\" command to see the list of available commands.\n\n\
                 Note: in case you need to interrupt the process, use \"exit\" command. \
                 Otherwise, the current progress won't be saved.\n\
                 **********************************************************************"
            );
        }

        self.store_blockchain_interval.do_call(|| {
            if let Err(err) = self.blockchain.write().unwrap().store_blockchain() {
                error!("Failed to store blockchain on idle: {}", err);
            }
        });
        self.miner.on_idle();
        self.txpool.lock().unwrap().on_idle();
    }

    // Query facade

    /// Current main chain height
    pub fn get_current_blockchain_height(&self) -> u64 {
        self.blockchain.read().unwrap().get_current_blockchain_height()
    }

    /// Height and id of the main chain tail
    pub fn get_blockchain_top(&self) -> (u64, Hash256) {
        self.blockchain.read().unwrap().get_blockchain_top()
    }

    /// Id of the main chain tail block
    pub fn get_tail_id(&self) -> Hash256 {
        self.blockchain.read().unwrap().get_tail_id()
    }

    /// Main chain blocks from `start_offset`
    pub fn get_blocks(&self, start_offset: u64, count: u64) -> Vec<Block> {
        self.blockchain.read().unwrap().get_blocks(start_offset, count)
    }

    /// Main chain blocks from `start_offset` with their transactions
    pub fn get_blocks_with_transactions(
        &self,
        start_offset: u64,
        count: u64
    ) -> (Vec<Block>, Vec<Transaction>) {
        self.blockchain
            .read()
            .unwrap()
            .get_blocks_with_transactions(start_offset, count)
    }

    /// Confirmed transactions by id, with the ids that missed
    pub fn get_transactions(&self, tx_ids: &[Hash256]) -> (Vec<Transaction>, Vec<Hash256>) {
        self.blockchain.read().unwrap().get_transactions(tx_ids)
    }

    /// All tracked alternative blocks
    pub fn get_alternative_blocks(&self) -> Vec<Block> {
        self.blockchain.read().unwrap().get_alternative_blocks()
    }

    /// Number of tracked alternative blocks
    pub fn get_alternative_blocks_count(&self) -> usize {
        self.blockchain.read().unwrap().get_alternative_blocks_count()
    }

    /// Whether the block id is known to the chain
    pub fn have_block(&self, block_id: &Hash256) -> bool {
        self.blockchain.read().unwrap().have_block(block_id)
    }

    /// Main chain block id at the given height
    pub fn get_block_id_by_height(&self, height: u64) -> Option<Hash256> {
        self.blockchain.read().unwrap().get_block_id_by_height(height)
    }

    /// Block with the given id
    pub fn get_block_by_hash(&self, block_id: &Hash256) -> Option<Block> {
        self.blockchain.read().unwrap().get_block_by_hash(block_id)
    }

    /// Number of confirmed transactions on the chain
    pub fn get_blockchain_total_transactions(&self) -> u64 {
        self.blockchain.read().unwrap().get_total_transactions()
    }

    /// Per-amount global output indexes of a confirmed transaction
    pub fn get_tx_outputs_gindexs(&self, tx_id: &Hash256) -> Result<Vec<u64>> {
        Ok(self.blockchain.read().unwrap().get_tx_outputs_gindexs(tx_id)?)
    }

    /// Samples random outputs for ring construction
    pub fn get_random_outs_for_amounts(
        &self,
        request: &RandomOutsRequest
    ) -> Vec<OutsForAmount> {
        self.blockchain
            .read()
            .unwrap()
            .get_random_outs_for_amounts(request)
    }

    /// The compact locator for our main chain
    pub fn get_short_chain_history(&self) -> Vec<Hash256> {
        self.blockchain.read().unwrap().get_short_chain_history()
    }

    /// Answers a peer locator with missing block ids
    pub fn find_blockchain_supplement(&self, short_history: &[Hash256]) -> Result<ChainEntry> {
        Ok(self
            .blockchain
            .read()
            .unwrap()
            .find_blockchain_supplement(short_history)?)
    }

    /// Answers a peer locator with full blocks and transactions
    pub fn find_blockchain_supplement_with_blocks(
        &self,
        req_start_block: Option<u64>,
        short_history: &[Hash256],
        max_count: usize
    ) -> Result<(Vec<(Block, Vec<Transaction>)>, u64, u64)> {
        Ok(self
            .blockchain
            .read()
            .unwrap()
            .find_blockchain_supplement_with_blocks(req_start_block, short_history, max_count)?)
    }

    /// Serves a bulk object fetch during synchronization
    pub fn handle_get_objects(&self, request: &GetObjectsRequest) -> GetObjectsResponse {
        self.blockchain.read().unwrap().handle_get_objects(request)
    }

    /// Number of pooled transactions
    pub fn get_pool_transactions_count(&self) -> usize {
        self.txpool.lock().unwrap().get_transactions_count()
    }

    /// All pooled transactions
    pub fn get_pool_transactions(&self) -> Vec<Transaction> {
        self.txpool.lock().unwrap().get_transactions()
    }

    /// Renders the pool for diagnostic output
    pub fn print_pool(&self, short_format: bool) -> String {
        self.txpool.lock().unwrap().print_pool(short_format)
    }

    /// Logs a summary of the given main chain range
    pub fn print_blockchain(&self, start_index: u64, end_index: u64) {
        self.blockchain
            .read()
            .unwrap()
            .print_blockchain(start_index, end_index);
    }

    /// Logs the height → id index of the main chain
    pub fn print_blockchain_index(&self) {
        self.blockchain.read().unwrap().print_blockchain_index();
    }

    /// Dumps every confirmed output to the given file
    pub fn print_blockchain_outs(&self, file: &std::path::Path) -> Result<()> {
        Ok(self.blockchain.read().unwrap().print_blockchain_outs(file)?)
    }

    /// Node status summary
    pub fn get_stat_info(&self) -> CoreStatInfo {
        let (blockchain_height, alternative_blocks, top_block_id) = {
            let chain = self.blockchain.read().unwrap();
            (
                chain.get_current_blockchain_height(),
                chain.get_alternative_blocks_count(),
                chain.get_tail_id()
            )
        };
        CoreStatInfo {
            mining_speed: self.miner.get_speed(),
            alternative_blocks,
            blockchain_height,
            tx_pool_size: self.txpool.lock().unwrap().get_transactions_count(),
            top_block_id
        }
    }

    /// Wipes the chain and seeds it with the given genesis block
    pub fn set_genesis_block(&self, block: Block) -> Result<()> {
        Ok(self
            .blockchain
            .write()
            .unwrap()
            .reset_and_set_genesis_block(block)?)
    }

    /// Records the network tip height reported by peers (no consensus effect)
    pub fn set_target_blockchain_height(&self, target_blockchain_height: u64) {
        self.target_blockchain_height
            .store(target_blockchain_height, Ordering::SeqCst);
    }

    /// The network tip height reported by peers
    pub fn get_target_blockchain_height(&self) -> u64 {
        self.target_blockchain_height.load(Ordering::SeqCst)
    }

    // Integration-test hooks

    /// Marks the block download as droppable (integration harness only)
    pub fn test_drop_download(&self) {
        self.test_drop_download.store(true, Ordering::SeqCst);
    }

    /// Sets the height limit for the drop-download hook
    pub fn test_drop_download_height(&self, height: u64) {
        self.test_drop_download_height.store(height, Ordering::SeqCst);
    }

    /// Whether the drop-download hook is armed
    pub fn get_test_drop_download(&self) -> bool {
        self.test_drop_download.load(Ordering::SeqCst)
    }

    /// Whether the drop-download hook applies at the current height
    pub fn get_test_drop_download_height(&self) -> bool {
        let height = self.test_drop_download_height.load(Ordering::SeqCst);
        height == 0 || self.get_current_blockchain_height() <= height
    }

    /// Raises the process termination signal; the host loop observes it and
    /// shuts the node down
    pub fn graceful_exit(&self) {
        info!("Raising SIGTERM for graceful shutdown");
        if let Err(err) = signal_hook::low_level::raise(signal_hook::consts::SIGTERM) {
            error!("Failed to raise termination signal: {}", err);
        }
    }
}

impl MinerHandler for CryptonoteCore {
    fn get_block_template(&self, address: &PublicKey, extra_nonce: &[u8]) -> Option<BlockTemplate> {
        match self.blockchain.read().unwrap().create_block_template(address, extra_nonce) {
            Ok(template) => Some(template),
            Err(err) => {
                error!("Failed to create block template: {}", err);
                None
            }
        }
    }

    fn handle_block_found(&self, block: Block) -> bool {
        CryptonoteCore::handle_block_found(self, block)
    }
}

// Stateless transaction rules

fn check_inputs_types_supported(tx: &Transaction) -> bool {
    tx.prefix
        .inputs
        .iter()
        .all(|input| matches!(input, TXIn::FromKey { .. }))
}

fn check_outs_valid(tx: &Transaction) -> bool {
    tx.prefix.outputs.iter().all(|output| {
        let TXOutTarget::ToKey { key } = &output.target;
        output.amount > 0 && key.decompress().is_some()
    })
}

fn check_money_overflow(tx: &Transaction) -> bool {
    let mut total_in: u64 = 0;
    for input in &tx.prefix.inputs {
        if let TXIn::FromKey { amount, .. } = input {
            total_in = match total_in.checked_add(*amount) {
                Some(total) => total,
                None => return false
            };
        }
    }
    let mut total_out: u64 = 0;
    for output in &tx.prefix.outputs {
        total_out = match total_out.checked_add(output.amount) {
            Some(total) => total,
            None => return false
        };
    }
    true
}

fn inputs_amount(tx: &Transaction) -> u64 {
    tx.prefix
        .inputs
        .iter()
        .map(|input| match input {
            TXIn::FromKey { amount, .. } => *amount,
            TXIn::Gen(_) => 0
        })
        .sum()
}

fn outputs_amount(tx: &Transaction) -> u64 {
    tx.prefix.outputs.iter().map(|output| output.amount).sum()
}

fn check_tx_inputs_keyimages_diff(tx: &Transaction) -> bool {
    let mut seen = HashSet::new();
    for key_image in tx.key_images() {
        if !seen.insert(key_image.to_bytes()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use common::difficulty::check_hash_for_difficulty;
    use common::{TransactionPrefix, TXOut};
    use crypto::KeyPair;

    use super::*;

    struct CountingProtocol {
        relayed: Mutex<Vec<NotifyNewBlock>>
    }

    impl CountingProtocol {
        fn new() -> Arc<CountingProtocol> {
            Arc::new(CountingProtocol {
                relayed: Mutex::new(Vec::new())
            })
        }
    }

    impl CryptonoteProtocol for CountingProtocol {
        fn relay_block(&self, notification: &NotifyNewBlock, _: &ConnectionContext) {
            self.relayed.lock().unwrap().push(notification.clone());
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            testnet: true,
            data_dir: None,
            testnet_data_dir: Some(dir.to_path_buf()),
            dns_checkpoints: false,
            test_drop_download: false,
            test_drop_download_height: 0,
            blockchain_config: blockchain::Config {
                blockchain_db_config: blockchain_db::Config {
                    db_type: String::from("memory")
                }
            },
            miner_config: miner::Config {
                start_mining: None,
                mining_threads: 1
            }
        }
    }

    fn test_core() -> (Arc<CryptonoteCore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let core = Arc::new(CryptonoteCore::new(&test_config(dir.path())).unwrap());
        core.init().unwrap();
        (core, dir)
    }

    fn genesis_reward(core: &CryptonoteCore) -> u64 {
        core.get_blocks(0, 1)[0].miner_tx.prefix.outputs[0].amount
    }

    fn spend_tx(amount: u64, outputs: &[u64], key_images: &[crypto::KeyImage]) -> Transaction {
        Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 0,
                inputs: key_images
                    .iter()
                    .map(|key_image| TXIn::FromKey {
                        amount,
                        key_offsets: vec![0],
                        key_image: *key_image
                    })
                    .collect(),
                outputs: outputs
                    .iter()
                    .map(|&amount| TXOut {
                        amount,
                        target: TXOutTarget::ToKey {
                            key: KeyPair::generate().public_key
                        }
                    })
                    .collect(),
                extra: Vec::new()
            },
            signatures: Vec::new()
        }
    }

    fn valid_tx(core: &CryptonoteCore) -> Transaction {
        let reward = genesis_reward(core);
        spend_tx(reward, &[reward - 1], &[KeyPair::generate().public_key])
    }

    fn mine_template(core: &CryptonoteCore, miner_key: &PublicKey) -> Block {
        let mut template = core.get_block_template(miner_key, &[]).unwrap();
        while !check_hash_for_difficulty(
            template.block.get_hash().data(),
            template.difficulty
        ) {
            template.block.header.nonce += 1;
        }
        template.block
    }

    #[test]
    fn oversize_tx_blob_is_rejected_before_parsing() {
        let (core, _dir) = test_core();
        let blob = vec![0u8; cryptonote_config::MAX_TX_SIZE + 1];

        let mut tvc = TxVerificationContext::default();
        assert!(!core.handle_incoming_tx(&blob, &mut tvc, false));
        assert!(tvc.verification_failed);
        assert!(!tvc.added_to_pool);
        assert_eq!(core.get_pool_transactions_count(), 0);
    }

    #[test]
    fn malformed_tx_blob_is_rejected() {
        let (core, _dir) = test_core();
        let mut tvc = TxVerificationContext::default();
        assert!(!core.handle_incoming_tx(&[0xff, 0x01, 0x02], &mut tvc, false));
        assert!(tvc.verification_failed);
        assert_eq!(core.get_pool_transactions_count(), 0);
    }

    #[test]
    fn semantic_rejects_duplicate_key_images() {
        let (core, _dir) = test_core();
        let key_image = KeyPair::generate().public_key;
        let tx = spend_tx(50, &[40], &[key_image, key_image]);
        assert!(!core.check_tx_semantic(&tx, false));
    }

    #[test]
    fn semantic_rejects_outputs_not_below_inputs() {
        let (core, _dir) = test_core();
        // Equal amounts: a zero fee is rejected
        let tx = spend_tx(50, &[50], &[KeyPair::generate().public_key]);
        assert!(!core.check_tx_semantic(&tx, false));
        // Outputs above inputs
        let tx = spend_tx(50, &[60], &[KeyPair::generate().public_key]);
        assert!(!core.check_tx_semantic(&tx, false));
        // And the happy case
        let tx = spend_tx(50, &[49], &[KeyPair::generate().public_key]);
        assert!(core.check_tx_semantic(&tx, false));
    }

    #[test]
    fn semantic_rejects_empty_inputs_and_coinbase_kinds() {
        let (core, _dir) = test_core();
        let mut tx = spend_tx(50, &[40], &[KeyPair::generate().public_key]);
        tx.prefix.inputs.clear();
        assert!(!core.check_tx_semantic(&tx, false));

        let mut tx = spend_tx(50, &[40], &[KeyPair::generate().public_key]);
        tx.prefix.inputs.push(TXIn::Gen(1));
        assert!(!core.check_tx_semantic(&tx, false));
    }

    #[test]
    fn semantic_rejects_money_overflow() {
        let (core, _dir) = test_core();
        let tx = spend_tx(
            u64::max_value(),
            &[u64::max_value(), u64::max_value()],
            &[KeyPair::generate().public_key]
        );
        assert!(!core.check_tx_semantic(&tx, false));
    }

    #[test]
    fn admits_a_valid_transaction() {
        let (core, _dir) = test_core();
        let tx = valid_tx(&core);
        let tx_hash = tx.get_hash();
        let blob = bincode::serialize(&tx).unwrap();

        let mut tvc = TxVerificationContext::default();
        assert!(core.handle_incoming_tx(&blob, &mut tvc, false));
        assert!(tvc.added_to_pool);
        assert!(tvc.should_be_relayed);
        assert_eq!(core.get_pool_transactions_count(), 1);
        assert!(core
            .get_pool_transactions()
            .iter()
            .any(|tx| tx.get_hash() == tx_hash));
    }

    #[test]
    fn admission_is_idempotent() {
        let (core, _dir) = test_core();
        let blob = bincode::serialize(&valid_tx(&core)).unwrap();

        let mut tvc = TxVerificationContext::default();
        assert!(core.handle_incoming_tx(&blob, &mut tvc, false));
        assert!(tvc.added_to_pool);

        let mut tvc = TxVerificationContext::default();
        assert!(core.handle_incoming_tx(&blob, &mut tvc, false));
        assert!(!tvc.added_to_pool);
        assert!(!tvc.verification_failed);
        assert_eq!(core.get_pool_transactions_count(), 1);
    }

    #[test]
    fn rejects_double_spend_within_one_transaction() {
        let (core, _dir) = test_core();
        let reward = genesis_reward(&core);
        let key_image = KeyPair::generate().public_key;
        let tx = spend_tx(reward, &[reward - 1], &[key_image, key_image]);
        let blob = bincode::serialize(&tx).unwrap();

        let mut tvc = TxVerificationContext::default();
        assert!(!core.handle_incoming_tx(&blob, &mut tvc, false));
        assert!(tvc.verification_failed);
        assert_eq!(core.get_pool_transactions_count(), 0);
    }

    #[test]
    fn concurrent_admissions_serialize() {
        let (core, _dir) = test_core();
        let reward = genesis_reward(&core);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let core = core.clone();
            let tx = spend_tx(reward, &[reward - 1], &[KeyPair::generate().public_key]);
            handles.push(std::thread::spawn(move || {
                let blob = bincode::serialize(&tx).unwrap();
                let mut tvc = TxVerificationContext::default();
                let accepted = core.handle_incoming_tx(&blob, &mut tvc, false);
                accepted && tvc.added_to_pool
            }));
        }

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(core.get_pool_transactions_count(), 8);
    }

    #[test]
    fn checkpoint_cadence_follows_both_channels() {
        let (core, _dir) = test_core();
        core.reset_checkpoint_timestamps();
        let t0 = 1_000_000;

        // Cold start performs a combined refresh
        assert!(core.update_checkpoints_at(t0));
        assert_eq!(core.checkpoint_timestamps(), (t0, t0));

        // Shortly after, nothing is due
        assert!(core.update_checkpoints_at(t0 + 60));
        assert_eq!(core.checkpoint_timestamps(), (t0, t0));

        // Ten minutes later only the JSON channel refreshes
        assert!(core.update_checkpoints_at(t0 + 601));
        assert_eq!(core.checkpoint_timestamps(), (t0, t0 + 601));

        // An hour after the start both channels refresh again
        assert!(core.update_checkpoints_at(t0 + 3601));
        assert_eq!(core.checkpoint_timestamps(), (t0 + 3601, t0 + 3601));
    }

    #[test]
    fn idempotent_block_admission() {
        let (core, _dir) = test_core();
        let block = mine_template(&core, &KeyPair::generate().public_key);
        let blob = bincode::serialize(&block).unwrap();

        let mut bvc = BlockVerificationContext::default();
        assert!(core.handle_incoming_block(&blob, &mut bvc, true));
        assert!(bvc.added_to_main_chain);
        assert_eq!(core.get_current_blockchain_height(), 2);

        let mut bvc = BlockVerificationContext::default();
        assert!(core.handle_incoming_block(&blob, &mut bvc, true));
        assert!(bvc.already_exists);
        assert!(!bvc.added_to_main_chain);
        assert_eq!(core.get_current_blockchain_height(), 2);
    }

    #[test]
    fn oversize_block_blob_is_rejected() {
        let (core, _dir) = test_core();
        let blob = vec![0u8; cryptonote_config::MAX_BLOCK_SIZE + 1];
        assert!(!core.check_incoming_block_size(&blob));

        let mut bvc = BlockVerificationContext::default();
        assert!(!core.handle_incoming_block(&blob, &mut bvc, true));
        assert!(bvc.verification_failed);
        assert_eq!(core.get_current_blockchain_height(), 1);
    }

    #[test]
    fn self_mined_block_is_relayed_once() {
        let (core, _dir) = test_core();
        let protocol = CountingProtocol::new();
        core.set_cryptonote_protocol(Some(protocol.clone()));

        // A pooled transaction the template will include
        let tx = valid_tx(&core);
        let tx_hash = tx.get_hash();
        let blob = bincode::serialize(&tx).unwrap();
        let mut tvc = TxVerificationContext::default();
        assert!(core.handle_incoming_tx(&blob, &mut tvc, false));

        let block = mine_template(&core, &KeyPair::generate().public_key);
        assert!(block.tx_hashes.contains(&tx_hash));

        assert!(core.handle_block_found(block.clone()));
        assert_eq!(core.get_current_blockchain_height(), 2);
        assert_eq!(core.get_pool_transactions_count(), 0);

        let relayed = protocol.relayed.lock().unwrap();
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0].hop, 0);
        assert_eq!(relayed[0].current_blockchain_height, 2);
        assert_eq!(relayed[0].txs.len(), 1);

        // Matched pause/resume pairs around the insert
        assert_eq!(core.miner.pause_depth(), 0);
    }

    #[test]
    fn reorg_race_drops_the_relay_silently() {
        let (core, _dir) = test_core();
        let protocol = CountingProtocol::new();
        core.set_cryptonote_protocol(Some(protocol.clone()));

        // The chain has moved on: height 1 holds someone else's block
        let winner = mine_template(&core, &KeyPair::generate().public_key);
        let mut bvc = BlockVerificationContext::default();
        assert!(core.add_new_block(winner, &mut bvc));

        // Our block at the same height references a transaction nobody has
        let mut raced = mine_template(&core, &KeyPair::generate().public_key);
        raced.miner_tx.prefix.inputs = vec![TXIn::Gen(1)];
        raced
            .tx_hashes
            .push(Hash256::try_from(
                "00000000000000000000000000000000000000000000000000000000000000aa"
            )
            .unwrap());

        assert!(!core.relay_found_block(&raced));
        assert!(protocol.relayed.lock().unwrap().is_empty());
    }

    #[test]
    fn fatal_checkpoint_refresh_raises_graceful_exit() {
        let (core, _dir) = test_core();
        let term_flag = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGTERM, term_flag.clone()).unwrap();

        // A checkpoint that contradicts the stored genesis block
        let mut checkpoints = Checkpoints::new();
        checkpoints
            .add_checkpoint(
                0,
                Hash256::try_from(
                    "1111111111111111111111111111111111111111111111111111111111111111"
                )
                .unwrap()
            )
            .unwrap();
        core.set_checkpoints(checkpoints);
        core.reset_checkpoint_timestamps();

        let mut bvc = BlockVerificationContext::default();
        let blob = vec![0u8; 16];
        assert!(!core.handle_incoming_block(&blob, &mut bvc, true));

        // The node went down before the block was even parsed
        assert!(term_flag.load(Ordering::SeqCst));
        assert!(!bvc.verification_failed);
        assert_eq!(core.get_current_blockchain_height(), 1);
    }

    #[test]
    fn fast_exit_skips_chain_teardown() {
        let (core, _dir) = test_core();
        assert!(!CryptonoteCore::get_fast_exit());
        CryptonoteCore::set_fast_exit();
        assert!(CryptonoteCore::get_fast_exit());
        // Miner and pool still tear down; the chain store is skipped
        core.deinit();
    }

    #[test]
    fn drop_download_hook_tracks_height() {
        let (core, _dir) = test_core();
        assert!(!core.get_test_drop_download());
        core.test_drop_download();
        assert!(core.get_test_drop_download());

        // Height 0 means any height
        assert!(core.get_test_drop_download_height());
        core.test_drop_download_height(1);
        assert!(core.get_test_drop_download_height());

        let block = mine_template(&core, &KeyPair::generate().public_key);
        let mut bvc = BlockVerificationContext::default();
        assert!(core.add_new_block(block, &mut bvc));
        assert!(!core.get_test_drop_download_height());
    }

    #[test]
    fn query_facade_forwards_to_the_stores() {
        let (core, _dir) = test_core();
        let block = mine_template(&core, &KeyPair::generate().public_key);
        let block_id = block.get_hash();
        let mut bvc = BlockVerificationContext::default();
        assert!(core.add_new_block(block, &mut bvc));

        assert_eq!(core.get_current_blockchain_height(), 2);
        assert_eq!(core.get_blockchain_top(), (1, block_id));
        assert_eq!(core.get_tail_id(), block_id);
        assert!(core.have_block(&block_id));
        assert_eq!(core.get_block_id_by_height(1), Some(block_id));
        assert!(core.get_block_by_hash(&block_id).is_some());
        assert_eq!(core.get_blocks(0, 10).len(), 2);
        assert_eq!(core.get_blockchain_total_transactions(), 2);
        assert_eq!(core.get_alternative_blocks_count(), 0);
        assert!(core.get_alternative_blocks().is_empty());

        let history = core.get_short_chain_history();
        assert_eq!(history.first(), Some(&block_id));

        let entry = core
            .find_blockchain_supplement(&[core.get_block_id_by_height(0).unwrap()])
            .unwrap();
        assert_eq!(entry.total_height, 2);

        let stats = core.get_stat_info();
        assert_eq!(stats.blockchain_height, 2);
        assert_eq!(stats.top_block_id, block_id);
        assert_eq!(stats.tx_pool_size, 0);

        assert_eq!(core.get_target_blockchain_height(), 0);
        core.set_target_blockchain_height(77);
        assert_eq!(core.get_target_blockchain_height(), 77);
    }

    #[test]
    fn startup_banner_shows_once() {
        let (core, _dir) = test_core();
        assert!(!core.starter_message_showed.load(Ordering::SeqCst));
        core.on_idle();
        assert!(core.starter_message_showed.load(Ordering::SeqCst));
        core.on_idle();
        assert!(core.starter_message_showed.load(Ordering::SeqCst));
    }
}
