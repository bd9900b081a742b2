use structopt::StructOpt;

/// Configuration for the in-process miner
#[derive(StructOpt, Clone, Debug)]
#[structopt(rename_all = "kebab-case")]
pub struct Config {
    /// Start mining to the given spend public key (hex) once the node is
    /// synchronized
    #[structopt(long)]
    pub start_mining: Option<String>,

    /// Number of mining threads
    #[structopt(long, default_value = "1")]
    pub mining_threads: usize
}
