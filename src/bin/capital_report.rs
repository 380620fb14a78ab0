//! Capital Report CLI
//!
//! Prints the capital summary from the persisted state file.
//!
//! Usage:
//!   capital-report --config config/flasharb.toml
//!   capital-report --state data/capital_state.json --json

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use flasharb_bot::capital::{CapitalState, JsonStateStore, StateStore};
use flasharb_bot::config::BotConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "capital-report")]
struct Args {
    /// Config file used to locate the state file
    #[arg(short, long, default_value = "config/flasharb.toml")]
    config: PathBuf,

    /// State file (overrides the config)
    #[arg(short, long, env = "FLASHARB_STATE_FILE")]
    state: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let state_path = match args.state {
        Some(path) => path,
        None => {
            let config = BotConfig::load(&args.config)
                .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
            PathBuf::from(config.general.state_file)
        }
    };
    info!("State file: {}", state_path.display());

    let store = JsonStateStore::new(&state_path);
    let state: CapitalState = store
        .load()?
        .with_context(|| format!("No capital state at {}", state_path.display()))?;
    let summary = state.summary_at(Utc::now());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Capital Summary ({})", state.last_updated.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("=========================================");
    println!("Initial capital:        ${:>12.2}", summary.initial_capital);
    println!("Current capital:        ${:>12.2}", summary.current_capital);
    println!("Total profit:           ${:>12.2}", summary.total_profit);
    println!("Profit (1h):            ${:>12.2}", summary.profit_1h);
    println!("Profit (24h):           ${:>12.2}", summary.profit_24h);
    println!("ROI total:               {:>12.2}%", summary.roi_total_percent);
    println!("ROI (24h):               {:>12.2}%", summary.roi_24h_percent);
    println!("Allocation per trade:    {:>12.2}%", summary.allocation_per_trade_percent);
    println!("Max pool impact:         {:>12.2}%", summary.max_pool_impact_percent);
    println!("Transactions:            {:>12}", summary.transaction_count);

    Ok(())
}
