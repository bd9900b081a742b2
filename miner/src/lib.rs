//! The Pyrite in-process miner
//!
//! A background proof-of-work worker. The coordinator owns the miner, feeds
//! it block templates through the [`MinerHandler`] seam and is the sink for
//! every block the workers find. Pause/resume is reference counted so nested
//! critical sections compose.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use blockchain::BlockTemplate;
use common::difficulty::check_hash_for_difficulty;
use common::{Block, GetHash};
use crypto::PublicKey;

mod config;

pub use config::Config;

/// Nonces ground between checks of the control flags
const GRIND_BATCH: u32 = 256;
/// Seconds between hashrate recalculations on the idle hook
const SPEED_REFRESH_INTERVAL: u64 = 30;

/// Type alias for miner operations that may result in an error
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for miner operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when the configured mining address is not a valid public key
    #[error("Invalid mining address: {0}")]
    InvalidAddress(String)
}

/// The miner's view of its owner
///
/// The coordinator implements this: it builds templates on the current chain
/// tail and admits found blocks back into the chain.
pub trait MinerHandler: Send + Sync {
    /// Builds a fresh block template for the given address
    fn get_block_template(&self, address: &PublicKey, extra_nonce: &[u8]) -> Option<BlockTemplate>;
    /// Delivers a block whose proof of work succeeded
    fn handle_block_found(&self, block: Block) -> bool;
}

struct Job {
    block: Block,
    difficulty: u64
}

struct MinerInner {
    handler: RwLock<Weak<dyn MinerHandler>>,
    address: RwLock<Option<PublicKey>>,
    job: Mutex<Option<Job>>,
    job_version: AtomicU64,
    pause_count: AtomicUsize,
    stop: AtomicBool,
    total_hashes: AtomicU64,
    current_speed: AtomicU64
}

/// Background proof-of-work worker with reference-counted pause/resume
pub struct Miner {
    inner: Arc<MinerInner>,
    threads: AtomicUsize,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
    speed_window: Mutex<(Instant, u64)>
}

impl Default for Miner {
    fn default() -> Self {
        Miner::new()
    }
}

impl Miner {
    /// Creates an idle miner
    pub fn new() -> Miner {
        Miner {
            inner: Arc::new(MinerInner {
                handler: RwLock::new(Weak::<Stub>::new() as Weak<dyn MinerHandler>),
                address: RwLock::new(None),
                job: Mutex::new(None),
                job_version: AtomicU64::new(0),
                pause_count: AtomicUsize::new(0),
                stop: AtomicBool::new(false),
                total_hashes: AtomicU64::new(0),
                current_speed: AtomicU64::new(0)
            }),
            threads: AtomicUsize::new(1),
            workers: Mutex::new(Vec::new()),
            speed_window: Mutex::new((Instant::now(), 0))
        }
    }

    /// Wires the miner to its owner and applies the configuration
    ///
    /// When a mining address is configured the miner starts once
    /// `on_synchronized` fires.
    pub fn init(
        &self,
        config: &Config,
        handler: Weak<dyn MinerHandler>,
        testnet: bool
    ) -> Result<()> {
        *self.inner.handler.write().unwrap() = handler;
        self.threads
            .store(config.mining_threads.max(1), Ordering::SeqCst);

        if let Some(address) = &config.start_mining {
            let bytes = hex::decode(address)
                .map_err(|err| Error::InvalidAddress(err.to_string()))?;
            if bytes.len() != 32 {
                return Err(Error::InvalidAddress(String::from("wrong key length")));
            }
            let key = PublicKey::from_slice(&bytes);
            *self.inner.address.write().unwrap() = Some(key);
            info!(
                "Mining configured to {} with {} thread(s){}",
                address,
                config.mining_threads.max(1),
                if testnet { " (testnet)" } else { "" }
            );
        }
        Ok(())
    }

    /// Whether worker threads are currently attached
    pub fn is_mining(&self) -> bool {
        !self.workers.lock().unwrap().is_empty()
    }

    /// Starts the worker threads mining to the given address
    pub fn start(&self, address: PublicKey, threads: usize) {
        let mut workers = self.workers.lock().unwrap();
        if !workers.is_empty() {
            warn!("Miner is already running");
            return;
        }

        *self.inner.address.write().unwrap() = Some(address);
        self.inner.stop.store(false, Ordering::SeqCst);
        self.refresh_template();

        let threads = threads.max(1);
        for index in 0..threads {
            let inner = self.inner.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("miner-{}", index))
                    .spawn(move || worker_loop(inner))
                    .expect("failed to spawn miner thread")
            );
        }
        info!("Mining started with {} thread(s)", threads);
    }

    /// Stops and joins all worker threads
    pub fn stop(&self) {
        let mut workers = self.workers.lock().unwrap();
        if workers.is_empty() {
            return;
        }
        self.inner.stop.store(true, Ordering::SeqCst);
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
        info!("Mining stopped");
    }

    /// Suspends grinding; nestable, every pause needs a matching resume
    pub fn pause(&self) {
        let previous = self.inner.pause_count.fetch_add(1, Ordering::SeqCst);
        debug!("Miner paused (depth {})", previous + 1);
    }

    /// Releases one level of pause
    pub fn resume(&self) {
        let previous = self.inner.pause_count.fetch_sub(1, Ordering::SeqCst);
        if previous == 0 {
            // Unbalanced resume; clamp back to zero
            self.inner.pause_count.store(0, Ordering::SeqCst);
            warn!("Miner resume without a matching pause");
        } else {
            debug!("Miner resumed (depth {})", previous - 1);
        }
    }

    /// Current pause depth (used to verify matched pause/resume pairs)
    pub fn pause_depth(&self) -> usize {
        self.inner.pause_count.load(Ordering::SeqCst)
    }

    /// Rebuilds the block template; called whenever the chain tip moves
    pub fn on_block_chain_update(&self) {
        self.refresh_template();
    }

    fn refresh_template(&self) {
        let address = match *self.inner.address.read().unwrap() {
            Some(address) => address,
            None => return
        };
        let handler = self.inner.handler.read().unwrap().upgrade();
        let handler = match handler {
            Some(handler) => handler,
            None => return
        };

        let extra_nonce: [u8; 8] = rand::random();
        match handler.get_block_template(&address, &extra_nonce) {
            Some(template) => {
                *self.inner.job.lock().unwrap() = Some(Job {
                    block: template.block,
                    difficulty: template.difficulty
                });
                self.inner.job_version.fetch_add(1, Ordering::SeqCst);
                debug!(
                    "Miner template refreshed (height {}, difficulty {})",
                    template.height, template.difficulty
                );
            }
            None => error!("Failed to refresh the miner block template")
        }
    }

    /// Periodic maintenance: recomputes the displayed hashrate
    pub fn on_idle(&self) {
        if !self.is_mining() {
            return;
        }
        let mut window = self.speed_window.lock().unwrap();
        let elapsed = window.0.elapsed();
        if elapsed < Duration::from_secs(SPEED_REFRESH_INTERVAL) {
            return;
        }
        let total = self.inner.total_hashes.load(Ordering::Relaxed);
        let speed = (total - window.1) / elapsed.as_secs().max(1);
        self.inner.current_speed.store(speed, Ordering::Relaxed);
        *window = (Instant::now(), total);
        info!("Mining at {} H/s", speed);
    }

    /// The node caught up with the network; start mining if configured
    pub fn on_synchronized(&self) {
        let address = match *self.inner.address.read().unwrap() {
            Some(address) => address,
            None => return
        };
        if !self.is_mining() {
            let threads = self.threads.load(Ordering::SeqCst);
            self.start(address, threads);
        }
    }

    /// Most recently measured hashrate in hashes per second
    pub fn get_speed(&self) -> u64 {
        self.inner.current_speed.load(Ordering::Relaxed)
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Placeholder handler target for the initial dangling weak reference
struct Stub;
impl MinerHandler for Stub {
    fn get_block_template(&self, _: &PublicKey, _: &[u8]) -> Option<BlockTemplate> {
        None
    }
    fn handle_block_found(&self, _: Block) -> bool {
        false
    }
}

fn worker_loop(inner: Arc<MinerInner>) {
    let mut local_version = 0;
    let mut job: Option<Job> = None;
    let mut nonce: u32 = rand::random();

    loop {
        if inner.stop.load(Ordering::SeqCst) {
            return;
        }
        if inner.pause_count.load(Ordering::SeqCst) > 0 {
            std::thread::sleep(Duration::from_millis(100));
            continue;
        }

        let version = inner.job_version.load(Ordering::SeqCst);
        if version != local_version {
            local_version = version;
            job = inner.job.lock().unwrap().as_ref().map(|job| Job {
                block: job.block.clone(),
                difficulty: job.difficulty
            });
            nonce = rand::random();
        }

        let current = match job.as_mut() {
            Some(job) => job,
            None => {
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
        };

        for _ in 0..GRIND_BATCH {
            current.block.header.nonce = nonce;
            let hash = current.block.get_hash();
            inner.total_hashes.fetch_add(1, Ordering::Relaxed);

            if check_hash_for_difficulty(hash.data(), current.difficulty) {
                info!("Found block {} at difficulty {}", hash, current.difficulty);
                if let Some(handler) = inner.handler.read().unwrap().upgrade() {
                    if !handler.handle_block_found(current.block.clone()) {
                        warn!("Found block was not accepted by the chain");
                    }
                }
                // The handler refreshes the template; force a reload either way
                local_version = 0;
                break;
            }
            nonce = nonce.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct CountingHandler {
        templates: AtomicUsize,
        found: AtomicUsize
    }

    impl CountingHandler {
        fn new() -> Arc<CountingHandler> {
            Arc::new(CountingHandler {
                templates: AtomicUsize::new(0),
                found: AtomicUsize::new(0)
            })
        }
    }

    impl MinerHandler for CountingHandler {
        fn get_block_template(
            &self,
            address: &PublicKey,
            extra_nonce: &[u8]
        ) -> Option<BlockTemplate> {
            self.templates.fetch_add(1, Ordering::SeqCst);
            Some(BlockTemplate {
                block: Block {
                    header: common::BlockHeader {
                        major_version: 1,
                        minor_version: 0,
                        timestamp: 0,
                        prev_id: crypto::Hash256::null_hash(),
                        nonce: 0
                    },
                    miner_tx: common::construct_miner_tx(1, 100, address, extra_nonce),
                    tx_hashes: Vec::new()
                },
                difficulty: 1,
                height: 1
            })
        }

        fn handle_block_found(&self, _: Block) -> bool {
            self.found.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn handler_weak(handler: &Arc<CountingHandler>) -> Weak<dyn MinerHandler> {
        let as_dyn: Arc<dyn MinerHandler> = handler.clone();
        Arc::downgrade(&as_dyn)
    }

    #[test]
    fn rejects_malformed_mining_address() {
        let miner = Miner::new();
        let handler = CountingHandler::new();
        let config = Config {
            start_mining: Some(String::from("zz")),
            mining_threads: 1
        };
        assert!(miner.init(&config, handler_weak(&handler), false).is_err());

        let config = Config {
            start_mining: Some(String::from("abcd")),
            mining_threads: 1
        };
        assert!(miner.init(&config, handler_weak(&handler), false).is_err());
    }

    #[test]
    fn pause_and_resume_are_reference_counted() {
        let miner = Miner::new();
        miner.pause();
        miner.pause();
        assert_eq!(miner.pause_depth(), 2);
        miner.resume();
        assert_eq!(miner.pause_depth(), 1);
        miner.resume();
        assert_eq!(miner.pause_depth(), 0);
        // An unbalanced resume clamps instead of underflowing
        miner.resume();
        assert_eq!(miner.pause_depth(), 0);
    }

    #[test]
    fn workers_deliver_found_blocks_to_the_handler() {
        let miner = Miner::new();
        let handler = CountingHandler::new();
        let config = Config {
            start_mining: None,
            mining_threads: 1
        };
        miner.init(&config, handler_weak(&handler), false).unwrap();

        miner.start(crypto::KeyPair::generate().public_key, 1);
        assert!(miner.is_mining());

        // Difficulty 1 templates are found instantly
        let deadline = Instant::now() + Duration::from_secs(10);
        while handler.found.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        miner.stop();

        assert!(handler.found.load(Ordering::SeqCst) > 0);
        assert!(handler.templates.load(Ordering::SeqCst) > 0);
        assert!(!miner.is_mining());
    }

    #[test]
    fn paused_miner_does_not_grind() {
        let miner = Miner::new();
        let handler = CountingHandler::new();
        let config = Config {
            start_mining: None,
            mining_threads: 1
        };
        miner.init(&config, handler_weak(&handler), false).unwrap();

        miner.pause();
        miner.start(crypto::KeyPair::generate().public_key, 1);
        std::thread::sleep(Duration::from_millis(300));
        let ground = miner.inner.total_hashes.load(Ordering::Relaxed);
        assert_eq!(ground, 0);

        miner.resume();
        miner.stop();
    }
}
