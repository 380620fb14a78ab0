//! Flash-Loan Arbitrage Bot
//!
//! Main entry point. Loads the TOML config, builds the quote sources, price
//! feed, detector, coordinator and capital allocator, then runs the control
//! loop until SIGINT/SIGTERM. In-flight executions are drained before exit.
//!
//! Usage:
//!   flasharb-bot --config config/flasharb.toml
//!   flasharb-bot --config config/flasharb.toml --json-logs
//!
//! Executions are simulated (dry run) unless `--live` is given.

use anyhow::{bail, Result};
use clap::Parser;
use flasharb_bot::alerts::{DiscordNotifier, NotificationSink};
use flasharb_bot::arbitrage::{
    CoordinatorSettings, ExecutionCoordinator, ExecutionService, FilterRanker, OpportunityDetector,
    ScoringStage, SimulatedExecutionService,
};
use flasharb_bot::capital::{CapitalAllocator, JsonStateStore, StateStore};
use flasharb_bot::feed::{build_sources, FeedSettings, PriceFeedAggregator};
use flasharb_bot::config::startup_log_level;
use flasharb_bot::{load_config, AlertPriority, ControlLoop, LoopSettings};
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Flash-loan DEX arbitrage engine (BSC, Polygon)
#[derive(Parser)]
#[command(name = "flasharb-bot", version)]
struct Args {
    /// Path to the TOML configuration
    #[arg(short, long, env = "FLASHARB_CONFIG", default_value = "config/flasharb.toml")]
    config: PathBuf,

    /// Submit real transactions. Executions are simulated unless set.
    #[arg(long)]
    live: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "FLASHARB_JSON_LOGS")]
    json_logs: bool,
}

fn init_logging(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json {
        fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&startup_log_level(&args.config), args.json_logs);

    info!("===========================================");
    info!("   Flash-Loan DEX Arbitrage Engine");
    info!("   Mode: {}", if args.live { "LIVE" } else { "DRY RUN" });
    info!("===========================================");
    info!("Config file: {}", args.config.display());

    let config = load_config(&args.config)?;
    if args.live {
        bail!("--live requires a transaction execution service, none is configured in this build");
    }

    // Alerts
    let notifier: Arc<dyn NotificationSink> = Arc::new(DiscordNotifier::new(
        config.alerts.discord_webhook.clone(),
        config.alerts.history_size,
    ));

    // Capital
    let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::new(&config.general.state_file));
    let allocator = Arc::new(CapitalAllocator::load_or_default(&config.capital, Some(store)));
    let summary = allocator.capital_summary().await;
    info!(
        "Capital: ${:.2} (initial ${:.2}, profit ${:.2}, {:.2}% per trade)",
        summary.current_capital,
        summary.initial_capital,
        summary.total_profit,
        summary.allocation_per_trade_percent
    );

    // Price feed
    let sources = build_sources(&config)?;
    if sources.is_empty() {
        warn!("No quote sources configured");
    }
    let feed = Arc::new(PriceFeedAggregator::new(
        sources,
        config.trading.token_pairs.clone(),
        FeedSettings::from_config(&config),
    ));

    let (networks, dexes) = feed.networks_and_dexes();
    for (node, amount) in allocator.redistribute_capital(&networks, &dexes).await {
        info!("Capital plan: {} -> ${:.2}", node, amount);
    }

    // Detection and execution
    let detector = OpportunityDetector::from_config(&config);
    info!(
        "Loan bounds ${:.0}-${:.0}, flash loan fee {} bps, min profit ${:.2}",
        detector.sizing().min_loan_usd,
        detector.sizing().max_loan_usd,
        detector.fees().flash_loan_fee_bps(),
        config.trading.min_profit_threshold_usd
    );
    let service: Arc<dyn ExecutionService> = Arc::new(SimulatedExecutionService::new(detector.fees().clone()));
    let coordinator = Arc::new(ExecutionCoordinator::new(
        service,
        allocator.clone(),
        notifier.clone(),
        *detector.sizing(),
        CoordinatorSettings::from_config(&config),
    ));

    let control = ControlLoop::new(
        feed,
        detector,
        ScoringStage::default(),
        FilterRanker::from_config(&config),
        coordinator,
        allocator.clone(),
        notifier.clone(),
        LoopSettings::from_config(&config),
    );

    // Shutdown on SIGINT / SIGTERM
    let cancel = CancellationToken::new();
    let signals = Signals::new([SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();
    let signal_task = tokio::spawn({
        let cancel = cancel.clone();
        let mut signals = signals;
        async move {
            while let Some(sig) = signals.next().await {
                info!("Received signal {} - shutting down", sig);
                cancel.cancel();
            }
        }
    });

    notifier
        .send_alert("Arbitrage engine started", AlertPriority::Normal, None)
        .await;

    let result = control.run(cancel).await;

    signals_handle.close();
    let _ = signal_task.await;

    let summary = allocator.capital_summary().await;
    info!(
        "Final capital: ${:.2} | total profit ${:.2} ({:.2}%) | {} transactions",
        summary.current_capital, summary.total_profit, summary.roi_total_percent, summary.transaction_count
    );

    result
}
