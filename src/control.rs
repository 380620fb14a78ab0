//! Control Loop
//!
//! Ties the pipeline together: snapshot -> detect -> score -> rank ->
//! dispatch. The price feed runs as its own task; execution tasks are owned
//! by the coordinator. A failing cycle is logged and followed by a longer
//! backoff; a dead price feed is fatal and returned to the caller.
//!
//! On cancellation the loop stops dispatching, waits for in-flight
//! executions, then stops the feed.

use crate::alerts::NotificationSink;
use crate::arbitrage::{ExecutionCoordinator, FilterRanker, OpportunityDetector, ScoringStage};
use crate::capital::CapitalAllocator;
use crate::config::BotConfig;
use crate::feed::PriceFeedAggregator;
use crate::types::AlertPriority;
use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub loop_interval: Duration,
    pub error_backoff: Duration,
    /// Cycles between status lines
    pub status_every: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            loop_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(5),
            status_every: 100,
        }
    }
}

impl LoopSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            loop_interval: Duration::from_millis(config.general.loop_interval_ms),
            error_backoff: Duration::from_millis(config.general.error_backoff_ms),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    detected: AtomicU64,
    dispatched: AtomicU64,
    cycle_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub opportunities_detected: u64,
    pub dispatched: u64,
    pub cycle_errors: u64,
}

pub struct ControlLoop {
    feed: Arc<PriceFeedAggregator>,
    detector: OpportunityDetector,
    scoring: ScoringStage,
    ranker: FilterRanker,
    coordinator: Arc<ExecutionCoordinator>,
    allocator: Arc<CapitalAllocator>,
    notifier: Arc<dyn NotificationSink>,
    settings: LoopSettings,
    counters: Counters,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feed: Arc<PriceFeedAggregator>,
        detector: OpportunityDetector,
        scoring: ScoringStage,
        ranker: FilterRanker,
        coordinator: Arc<ExecutionCoordinator>,
        allocator: Arc<CapitalAllocator>,
        notifier: Arc<dyn NotificationSink>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            feed,
            detector,
            scoring,
            ranker,
            coordinator,
            allocator,
            notifier,
            settings,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            opportunities_detected: self.counters.detected.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            cycle_errors: self.counters.cycle_errors.load(Ordering::Relaxed),
        }
    }

    /// One pass of the pipeline. Returns the number of dispatched executions.
    pub async fn run_cycle(&self) -> Result<usize> {
        let quotes = self.feed.latest_snapshot().await;
        let opportunities = self.detector.detect(&quotes);
        self.counters
            .detected
            .fetch_add(opportunities.len() as u64, Ordering::Relaxed);

        let scored = self.scoring.score_all(opportunities).await;
        let ranked = self.ranker.rank(scored, self.scoring.is_active());

        let dispatched = ranked.len();
        for opportunity in ranked {
            debug!("Dispatching {}", opportunity);
            self.coordinator.dispatch(opportunity).await;
        }
        self.counters
            .dispatched
            .fetch_add(dispatched as u64, Ordering::Relaxed);
        Ok(dispatched)
    }

    /// Run a cycle, turning a panic into an error
    async fn guarded_cycle(&self) -> Result<usize> {
        match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(anyhow!("cycle panicked: {}", msg))
            }
        }
    }

    /// Cycle plus the sleep that follows it
    async fn tick(&self) {
        let cycle = self.counters.cycles.fetch_add(1, Ordering::Relaxed) + 1;

        let pause = match self.guarded_cycle().await {
            Ok(_) => self.settings.loop_interval,
            Err(e) => {
                self.counters.cycle_errors.fetch_add(1, Ordering::Relaxed);
                error!("Error in opportunity loop: {:#}", e);
                self.settings.error_backoff
            }
        };

        if self.settings.status_every > 0 && cycle % self.settings.status_every == 0 {
            self.log_status().await;
        }
        tokio::time::sleep(pause).await;
    }

    async fn log_status(&self) {
        let stats = self.stats();
        let exec = self.coordinator.stats();
        let capital = self.allocator.capital_summary().await;
        info!(
            "Status: {} cycles | {} detected | {} dispatched | {} ok / {} failed / {} timed out | {} errors | capital ${:.2} ({:+.2}%)",
            stats.cycles,
            stats.opportunities_detected,
            stats.dispatched,
            exec.succeeded,
            exec.failed,
            exec.timed_out,
            stats.cycle_errors,
            capital.current_capital,
            capital.roi_total_percent
        );
    }

    /// Run until cancelled or until the price feed dies
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let feed_cancel = cancel.child_token();
        let mut feed_task = tokio::spawn({
            let feed = Arc::clone(&self.feed);
            let token = feed_cancel.clone();
            async move { feed.start(token).await }
        });

        info!("Control loop started");

        let fatal = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                joined = &mut feed_task => {
                    let err = match joined {
                        Ok(Ok(())) => anyhow!("price feed stopped unexpectedly"),
                        Ok(Err(e)) => e,
                        Err(e) => anyhow!("price feed task failed: {}", e),
                    };
                    break Some(err);
                }
                _ = self.tick() => {}
            }
        };

        match fatal {
            None => {
                info!("Shutdown requested, draining executions");
                feed_cancel.cancel();
                let outcomes = self.coordinator.drain().await;
                if let Err(e) = feed_task.await {
                    error!("Price feed task failed during shutdown: {}", e);
                }
                info!("Control loop stopped ({} executions drained)", outcomes.len());
                self.log_status().await;
                Ok(())
            }
            Some(e) => {
                error!("Critical error in price feed: {:#}", e);
                self.notifier
                    .send_alert(
                        &format!("Critical error in price feed: {:#}", e),
                        AlertPriority::High,
                        None,
                    )
                    .await;
                self.coordinator.drain().await;
                Err(e.context("price feed failed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::LogNotifier;
    use crate::arbitrage::{
        CoordinatorSettings, FeeModel, LoanSizing, OpportunityScorer, SimulatedExecutionService,
    };
    use crate::config::CapitalConfig;
    use crate::feed::{FeedSettings, QuoteSource, StaticQuoteSource};
    use crate::types::{Opportunity, PriceData};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct PanickingScorer;

    #[async_trait]
    impl OpportunityScorer for PanickingScorer {
        async fn score(&self, _opportunity: &Opportunity) -> Result<f64> {
            panic!("model weights missing");
        }
    }

    fn static_source(dex: &str, price: f64, liquidity: f64) -> Arc<dyn QuoteSource> {
        Arc::new(StaticQuoteSource::new(
            dex,
            "BSC",
            HashMap::from([(
                "ETH-USDT".to_string(),
                PriceData {
                    price,
                    liquidity_usd: liquidity,
                },
            )]),
        ))
    }

    struct Fixture {
        control: ControlLoop,
        allocator: Arc<CapitalAllocator>,
        coordinator: Arc<ExecutionCoordinator>,
        notifier: Arc<LogNotifier>,
    }

    fn fixture(sources: Vec<Arc<dyn QuoteSource>>, scoring: ScoringStage) -> Fixture {
        let feed = Arc::new(PriceFeedAggregator::new(
            sources,
            vec!["ETH-USDT".to_string()],
            FeedSettings::default(),
        ));
        let allocator = Arc::new(CapitalAllocator::load_or_default(&CapitalConfig::default(), None));
        let notifier = Arc::new(LogNotifier::default());
        let service = Arc::new(
            SimulatedExecutionService::new(FeeModel::default())
                .with_fixed_slippage(0.2)
                .with_latency(Duration::from_millis(30)),
        );
        let coordinator = Arc::new(ExecutionCoordinator::new(
            service,
            allocator.clone(),
            notifier.clone(),
            LoanSizing::default(),
            CoordinatorSettings::default(),
        ));
        let control = ControlLoop::new(
            feed,
            OpportunityDetector::default(),
            scoring,
            FilterRanker::default(),
            coordinator.clone(),
            allocator.clone(),
            notifier.clone(),
            LoopSettings::default(),
        );
        Fixture {
            control,
            allocator,
            coordinator,
            notifier,
        }
    }

    fn scenario_sources() -> Vec<Arc<dyn QuoteSource>> {
        vec![
            static_source("PANCAKESWAP", 1800.0, 2_000_000.0),
            static_source("SUSHISWAP", 1830.0, 1_500_000.0),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_cycle_dispatches_and_books_profit() {
        let f = fixture(scenario_sources(), ScoringStage::default());

        assert_eq!(f.control.run_cycle().await.unwrap(), 1);
        let outcomes = f.coordinator.drain().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);

        let state = f.allocator.snapshot().await;
        // 151.75 estimated, 20% slippage
        assert!((state.total_profit_usd - 121.4).abs() < 1e-6);
        let stats = f.control.stats();
        assert_eq!(stats.opportunities_detected, 1);
        assert_eq!(stats.dispatched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_cancelled_drains_executions() {
        let f = fixture(scenario_sources(), ScoringStage::default());
        let cancel = CancellationToken::new();

        let stopper = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1050)).await;
                cancel.cancel();
            }
        };
        let (result, _) = tokio::join!(f.control.run(cancel.clone()), stopper);

        assert!(result.is_ok());
        assert!(f.control.stats().cycles >= 5);
        assert!(f.control.stats().dispatched >= 1);
        assert_eq!(f.coordinator.in_flight(), 0);
        assert_eq!(f.coordinator.pending().await, 0);
        assert!(f.allocator.snapshot().await.total_profit_usd > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_panic_is_contained() {
        let scoring = ScoringStage::new(Some(Arc::new(PanickingScorer)));
        let f = fixture(scenario_sources(), scoring);

        assert!(f.control.guarded_cycle().await.is_err());

        let start = tokio::time::Instant::now();
        f.control.tick().await;
        assert_eq!(f.control.stats().cycle_errors, 1);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_feed_is_fatal_and_alerted() {
        let f = fixture(Vec::new(), ScoringStage::default());

        let result = f.control.run(CancellationToken::new()).await;
        assert!(result.is_err());

        let high = f.notifier.recent_alerts(10, AlertPriority::High).await;
        assert_eq!(high.len(), 1);
        assert!(high[0].message.contains("price feed"));
    }
}
