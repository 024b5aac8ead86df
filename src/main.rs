use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use forecastkit::{DataManager, ForecastKitConfig, logging};

mod cli;

use cli::{Cli, execute};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ForecastKitConfig::load_from_path(cli.config.clone())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    logging::init(&config.logging)?;
    debug!("Using store at {}", config.store.path);

    let manager =
        DataManager::from_config(&config).with_context(|| "Failed to set up forecast manager")?;
    execute(cli.command, &manager).await
}
