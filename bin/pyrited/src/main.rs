use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use signal_hook::consts::{SIGINT, SIGTERM};
use structopt::StructOpt;

use cryptonote_core::CryptonoteCore;

mod config;
use config::Config;

fn main() {
    // Command Line Arguments
    let config = Config::from_args();

    // Logging
    bin_common::logger::init(&config.bin_common_config, "pyrited")
        .expect("Failed to initialise logger");

    // Main
    run(config).unwrap_or_else(|err| error!("Unable to run daemon! {}", err));
    info!("Exiting");
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "Pyrite {} - {}",
        cryptonote_config::VERSION,
        cryptonote_config::RELEASE_NAME
    );

    // Cryptonote Core Hub
    let core = Arc::new(CryptonoteCore::new(&config.cryptonote_core_config)?);
    core.init()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, shutdown.clone())?;
    signal_hook::flag::register(SIGINT, shutdown.clone())?;

    while !shutdown.load(Ordering::SeqCst) {
        core.on_idle();
        std::thread::sleep(Duration::from_secs(1));
    }

    info!("Shutting down");
    core.deinit();
    Ok(())
}
