use structopt::StructOpt;

/// Configuration for BlockchainDB
#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case")]
pub struct Config {
    /// Type of database ("lmdb" or "memory")
    #[structopt(long, default_value = "lmdb")]
    pub db_type: String
}
