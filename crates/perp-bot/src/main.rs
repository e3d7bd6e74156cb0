//! perp-mm entry point.
//!
//! Runs against the in-memory paper venue; a live venue plugs in through the
//! `Exchange` trait.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use perp_order::PaperExchange;
use tracing::info;

/// Perpetual-futures market maker
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PERP_MM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Compute and log order diffs without submitting them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    perp_telemetry::init_logging()?;

    info!("Starting perp-mm v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > PERP_MM_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("PERP_MM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let mut config = perp_bot::AppConfig::load(&config_path)?;
    if args.dry_run {
        config.global.dry_run = true;
    }
    config.validate()?;
    info!(
        symbols = ?config.symbol_names(),
        dry_run = config.global.dry_run,
        "Configuration loaded"
    );

    let exchange = Arc::new(PaperExchange::new());
    let app = perp_bot::Application::new(config, exchange)?;
    app.run().await?;

    Ok(())
}
