#![deny(missing_docs)]
//! Protocol constants and per-network parameters for Pyrite

/// Emission schedule and block reward calculation
pub mod emission;

/// Daemon version
pub static VERSION: &str = "v0.1.0";
/// Release codename
pub static RELEASE_NAME: &str = "Fool's Gold";

/// Coin name and ticker
pub const COIN_NAME: (&str, &str) = ("Pyrite", "PYR");

/// Number of atomic units in one coin
pub const COIN: u64 = 1_000_000_000_000;

/// Maximum size of a transaction blob accepted over the network
pub const MAX_TX_SIZE: usize = 1_000_000;
/// Maximum size of a block blob accepted over the network
pub const MAX_BLOCK_SIZE: usize = 8_000_000;

/// Size of a block (in bytes) below which the full block reward is granted
pub const BLOCK_GRANTED_FULL_REWARD_ZONE: usize = 300_000;
/// Bytes reserved in a block template for the coinbase transaction
pub const COINBASE_BLOB_RESERVED_SIZE: usize = 600;
/// Number of trailing blocks over which the median block weight is taken
pub const REWARD_BLOCKS_WINDOW: usize = 100;

/// Target seconds between consecutive blocks
pub const DIFFICULTY_TARGET: u64 = 120;
/// Number of trailing blocks used by the difficulty retarget
pub const DIFFICULTY_WINDOW: usize = 60;

/// Seconds an unconfirmed transaction may stay in the pool
pub const MEMPOOL_TX_LIVETIME: u64 = 86400 * 3;
/// Seconds a transaction carried in by an alternative block may stay in the pool
pub const MEMPOOL_TX_FROM_ALT_BLOCK_LIVETIME: u64 = 604_800;

/// Seconds between refreshes of the DNS checkpoint channel
pub const DNS_CHECKPOINT_REFRESH_INTERVAL: u64 = 3600;
/// Seconds between refreshes of the JSON checkpoint channel
pub const JSON_CHECKPOINT_REFRESH_INTERVAL: u64 = 600;

/// Block id count sent in a synchronization chain entry
pub const BLOCKS_IDS_SYNCHRONIZING_DEFAULT_COUNT: usize = 10_000;
/// Block count sent in a synchronization supplement
pub const BLOCKS_SYNCHRONIZING_DEFAULT_COUNT: usize = 20;

/// File name of the persisted transaction pool state
pub const POOLDATA_FILENAME: &str = "poolstate.bin";
/// File name of the JSON checkpoint hashfile looked up in the data directory
pub const JSON_HASH_FILE_NAME: &str = "checkpoints.json";
/// Seconds between throttled blockchain store calls on the idle loop
pub const STORE_BLOCKCHAIN_INTERVAL: u64 = 60 * 12;

/// Network selector
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    /// The production network
    Mainnet,
    /// The public test network
    Testnet
}

/// Per-network parameters
pub struct NetworkConfig {
    /// Default P2P bind port
    pub p2p_port: u16,
    /// Default RPC bind port
    pub rpc_port: u16,
    /// Subdirectory of the data directory used by this network
    pub data_subdir: &'static str,
    /// Timestamp of the genesis block
    pub genesis_timestamp: u64,
    /// Nonce of the genesis block
    pub genesis_nonce: u32
}

impl Network {
    /// Gets the parameters of the selected network
    pub fn config(self) -> &'static NetworkConfig {
        match self {
            Network::Mainnet => &MAINNET,
            Network::Testnet => &TESTNET
        }
    }
}

static MAINNET: NetworkConfig = NetworkConfig {
    p2p_port: 20180,
    rpc_port: 20181,
    data_subdir: "mainnet",
    genesis_timestamp: 1_577_836_800,
    genesis_nonce: 10_000
};

static TESTNET: NetworkConfig = NetworkConfig {
    p2p_port: 30180,
    rpc_port: 30181,
    data_subdir: "testnet",
    genesis_timestamp: 1_577_836_800,
    genesis_nonce: 10_001
};
