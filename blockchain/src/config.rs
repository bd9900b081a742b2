use structopt::StructOpt;

use blockchain_db::Config as BlockchainDBConfig;

/// Configuration for the blockchain store
#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case")]
pub struct Config {
    #[structopt(flatten)]
    pub blockchain_db_config: BlockchainDBConfig
}
