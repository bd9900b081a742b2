use std::path::PathBuf;

use structopt::StructOpt;

use blockchain::Config as BlockchainConfig;
use cryptonote_config::Network;
use miner::Config as MinerConfig;

/// Configuration for the Cryptonote core
#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case")]
pub struct Config {
    /// Run on the test network
    #[structopt(long)]
    pub testnet: bool,

    /// Data directory for the main network
    /// If unset, the default data directory is used
    #[structopt(long)]
    pub data_dir: Option<PathBuf>,

    /// Data directory for the test network
    /// If unset, the default data directory is used
    #[structopt(long)]
    pub testnet_data_dir: Option<PathBuf>,

    /// Enforce checkpoints fetched over the DNS channel
    #[structopt(long)]
    pub dns_checkpoints: bool,

    /// Integration-test hook: report the block download as droppable
    #[structopt(long)]
    pub test_drop_download: bool,

    /// Integration-test hook: report the block download as droppable up to
    /// this height (0 means any height)
    #[structopt(long, default_value = "0")]
    pub test_drop_download_height: u64,

    #[structopt(flatten)]
    pub blockchain_config: BlockchainConfig,

    #[structopt(flatten)]
    pub miner_config: MinerConfig
}

impl Config {
    /// The network this configuration selects
    pub fn network(&self) -> Network {
        if self.testnet {
            Network::Testnet
        } else {
            Network::Mainnet
        }
    }

    /// The resolved per-network data directory
    pub fn resolved_data_dir(&self) -> PathBuf {
        let explicit = if self.testnet {
            &self.testnet_data_dir
        } else {
            &self.data_dir
        };
        match explicit {
            Some(data_dir) => data_dir.clone(),
            None => common::data_dir::get_default_data_dir()
                .join(self.network().config().data_subdir)
        }
    }
}
