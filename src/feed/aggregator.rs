//! Price Feed Aggregator
//!
//! Polls every (source, token pair) combination on a fixed cadence and keeps
//! the latest quote for each in the [`QuoteCache`].
//!
//! Per fetch:
//! - the source's minimum call interval is respected
//! - up to `fetch_attempts` tries with exponential backoff (1s, 2s, ...)
//! - exhausted or unsupported combinations are removed from the cache
//! - each quote is written as soon as it resolves, so a slow or failing
//!   source never holds back the others
//!
//! Fan-out is bounded by `fetch_concurrency` in-flight fetches.

use super::cache::QuoteCache;
use super::rate_limiter::SourceRateLimiter;
use super::source::QuoteSource;
use crate::config::BotConfig;
use crate::errors::QuoteError;
use crate::types::{PriceData, Quote, QuoteKey};
use anyhow::{bail, Result};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fetch cadence and retry policy
#[derive(Debug, Clone, Copy)]
pub struct FeedSettings {
    pub update_interval: Duration,
    pub fetch_concurrency: usize,
    pub fetch_attempts: u32,
    pub fetch_base_delay: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(1000),
            fetch_concurrency: 50,
            fetch_attempts: 3,
            fetch_base_delay: Duration::from_secs(1),
        }
    }
}

impl FeedSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            update_interval: Duration::from_millis(config.general.update_interval_ms),
            fetch_concurrency: config.general.fetch_concurrency.max(1),
            fetch_attempts: config.general.fetch_attempts.max(1),
            fetch_base_delay: Duration::from_millis(config.general.fetch_base_delay_ms),
        }
    }
}

pub struct PriceFeedAggregator {
    sources: Vec<Arc<dyn QuoteSource>>,
    token_pairs: Vec<String>,
    settings: FeedSettings,
    cache: QuoteCache,
    limiter: SourceRateLimiter,
    /// Time of the last completed refresh
    last_refresh: Mutex<Option<Instant>>,
    /// Held for the duration of a refresh
    refreshing: Mutex<()>,
}

impl PriceFeedAggregator {
    pub fn new(sources: Vec<Arc<dyn QuoteSource>>, token_pairs: Vec<String>, settings: FeedSettings) -> Self {
        Self {
            sources,
            token_pairs,
            settings,
            cache: QuoteCache::new(),
            limiter: SourceRateLimiter::new(),
            last_refresh: Mutex::new(None),
            refreshing: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &QuoteCache {
        &self.cache
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    /// Distinct networks and DEXes served by the configured sources
    pub fn networks_and_dexes(&self) -> (Vec<String>, Vec<String>) {
        let mut networks: Vec<String> = self.sources.iter().map(|s| s.network().to_string()).collect();
        let mut dexes: Vec<String> = self.sources.iter().map(|s| s.dex().to_string()).collect();
        networks.sort();
        networks.dedup();
        dexes.sort();
        dexes.dedup();
        (networks, dexes)
    }

    /// Poll until cancelled. Errors only if there is nothing to poll.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        if self.sources.is_empty() || self.token_pairs.is_empty() {
            bail!(
                "price feed has nothing to monitor ({} sources, {} pairs)",
                self.sources.len(),
                self.token_pairs.len()
            );
        }

        info!(
            "Starting price feed: {} sources x {} pairs every {:?}",
            self.sources.len(),
            self.token_pairs.len(),
            self.settings.update_interval
        );

        let mut ticker = tokio::time::interval(self.settings.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.refresh() => {}
                    }
                }
            }
        }

        info!("Price feed stopped");
        Ok(())
    }

    /// Fetch every combination once and update the cache. Returns the number
    /// of quotes stored. Concurrent calls are serialized.
    pub async fn refresh(&self) -> usize {
        let _refreshing = self.refreshing.lock().await;
        self.refresh_all().await
    }

    async fn refresh_all(&self) -> usize {
        let jobs: Vec<BoxFuture<'_, bool>> = self
            .sources
            .iter()
            .flat_map(|source| {
                self.token_pairs
                    .iter()
                    .map(move |pair| self.fetch_and_store(Arc::clone(source), pair.clone()).boxed())
            })
            .collect();
        let total = jobs.len();

        let results: Vec<bool> = stream::iter(jobs)
            .buffer_unordered(self.settings.fetch_concurrency)
            .collect()
            .await;
        let stored = results.into_iter().filter(|stored| *stored).count();
        *self.last_refresh.lock().await = Some(Instant::now());

        debug!("Updated {}/{} quotes", stored, total);
        stored
    }

    /// Fetch one combination and write the result straight into the cache.
    /// A combination without a quote this cycle is removed from the cache.
    async fn fetch_and_store(&self, source: Arc<dyn QuoteSource>, token_pair: String) -> bool {
        let key = QuoteKey::new(&token_pair, source.dex(), source.network());
        match self.fetch_with_retry(source.as_ref(), &key).await {
            Some(quote) => {
                self.cache.upsert(quote);
                true
            }
            None => {
                if self.cache.remove(&key).is_some() {
                    debug!("Dropped cached quote for {}", key);
                }
                false
            }
        }
    }

    async fn fetch_with_retry(&self, source: &dyn QuoteSource, key: &QuoteKey) -> Option<Quote> {
        let source_id = source.id();
        let attempts = self.settings.fetch_attempts;

        for attempt in 0..attempts {
            self.limiter.acquire(&source_id, source.min_fetch_interval()).await;

            match source.get_price(&key.token_pair).await {
                Ok(Some(data)) => {
                    return match validate_price(key, data) {
                        Ok(quote) => Some(quote),
                        Err(e) => {
                            debug!("Discarding {}: {}", key, e);
                            None
                        }
                    };
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!("Error fetching {} (attempt {}/{}): {}", key, attempt + 1, attempts, e);
                    if attempt + 1 < attempts {
                        let backoff = self.settings.fetch_base_delay * 2u32.saturating_pow(attempt);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        warn!("Failed to get {} after {} attempts", key, attempts);
        None
    }

    /// Whether the cache needs a refresh before being read
    async fn is_stale(&self) -> bool {
        if self.cache.is_empty() {
            return true;
        }
        match *self.last_refresh.lock().await {
            Some(at) => at.elapsed() > self.settings.update_interval * 2,
            None => true,
        }
    }

    /// Refresh when stale, unless a refresh is already writing into the cache
    async fn refresh_if_stale(&self) {
        if !self.is_stale().await {
            return;
        }
        if let Ok(_refreshing) = self.refreshing.try_lock() {
            self.refresh_all().await;
        }
    }

    /// Current quotes, refreshed first when empty or older than two intervals
    pub async fn latest_snapshot(&self) -> Vec<Quote> {
        self.refresh_if_stale().await;
        self.cache.snapshot()
    }

    /// Latest quotes for one pair, optionally narrowed by DEX and network
    pub async fn prices_for_pair(&self, token_pair: &str, dex: Option<&str>, network: Option<&str>) -> Vec<Quote> {
        self.refresh_if_stale().await;
        self.cache.for_pair(token_pair, dex, network)
    }
}

fn validate_price(key: &QuoteKey, data: PriceData) -> Result<Quote, QuoteError> {
    if !(data.price.is_finite() && data.price > 0.0) {
        return Err(QuoteError::InvalidData(format!("price {} for {}", data.price, key.token_pair)));
    }
    Ok(Quote::new(key, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::OpportunityDetector;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Fails `failures` times, then returns a fixed price until `fail_after` calls
    struct FlakySource {
        dex: String,
        failures: u32,
        fail_after: u32,
        calls: AtomicU32,
        price: f64,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        latency: Duration,
        min_interval: Duration,
        call_times: StdMutex<Vec<Instant>>,
    }

    impl FlakySource {
        fn new(dex: &str, failures: u32, price: f64) -> Self {
            Self {
                dex: dex.to_string(),
                failures,
                fail_after: u32::MAX,
                calls: AtomicU32::new(0),
                price,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                latency: Duration::ZERO,
                min_interval: Duration::ZERO,
                call_times: StdMutex::new(Vec::new()),
            }
        }

        fn call_times(&self) -> Vec<Instant> {
            self.call_times.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QuoteSource for FlakySource {
        fn dex(&self) -> &str {
            &self.dex
        }

        fn network(&self) -> &str {
            "BSC"
        }

        fn min_fetch_interval(&self) -> Duration {
            self.min_interval
        }

        async fn get_price(&self, token_pair: &str) -> Result<Option<PriceData>, QuoteError> {
            self.call_times.lock().unwrap().push(Instant::now());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if token_pair == "UNSUPPORTED" {
                return Ok(None);
            }
            if call < self.failures || call >= self.fail_after {
                return Err(QuoteError::Unavailable("rpc down".to_string()));
            }
            Ok(Some(PriceData {
                price: self.price,
                liquidity_usd: 1_000_000.0,
            }))
        }
    }

    fn pairs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let source = Arc::new(FlakySource::new("PANCAKESWAP", 2, 1800.0));
        let feed = PriceFeedAggregator::new(vec![source.clone()], pairs(&["ETH-USDT"]), FeedSettings::default());

        let start = Instant::now();
        assert_eq!(feed.refresh().await, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_source_is_omitted() {
        let bad = Arc::new(FlakySource::new("PANCAKESWAP", 10, 1800.0));
        let good = Arc::new(FlakySource::new("SUSHISWAP", 0, 1830.0));
        let feed = PriceFeedAggregator::new(
            vec![bad.clone(), good],
            pairs(&["ETH-USDT", "UNSUPPORTED"]),
            FeedSettings::default(),
        );

        assert_eq!(feed.refresh().await, 1);
        let snapshot = feed.cache().snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].dex_name, "SUSHISWAP");
        // 3 attempts for ETH-USDT, unsupported pair answered once
        assert_eq!(bad.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quote_from_dead_source_is_dropped() {
        let mut dying = FlakySource::new("PANCAKESWAP", 0, 1800.0);
        dying.fail_after = 1;
        let dying = Arc::new(dying);
        let healthy = Arc::new(FlakySource::new("SUSHISWAP", 0, 1830.0));
        let feed = PriceFeedAggregator::new(vec![dying.clone(), healthy], pairs(&["ETH-USDT"]), FeedSettings::default());

        assert_eq!(feed.refresh().await, 2);
        assert_eq!(feed.cache().len(), 2);

        assert_eq!(feed.refresh().await, 1);
        let snapshot = feed.latest_snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].dex_name, "SUSHISWAP");
        assert!(OpportunityDetector::default().detect(&snapshot).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_source_does_not_hold_back_others() {
        let failing = Arc::new(FlakySource::new("PANCAKESWAP", 100, 1800.0));
        let healthy = Arc::new(FlakySource::new("SUSHISWAP", 0, 1830.0));
        let feed = Arc::new(PriceFeedAggregator::new(
            vec![failing, healthy],
            pairs(&["ETH-USDT"]),
            FeedSettings::default(),
        ));

        let refresh = tokio::spawn({
            let feed = feed.clone();
            async move { feed.refresh().await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(feed.cache().len(), 1);

        // Stale, but the running refresh is not waited on
        tokio::time::sleep(Duration::from_millis(2400)).await;
        let start = Instant::now();
        let snapshot = feed.latest_snapshot().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].dex_name, "SUSHISWAP");

        assert_eq!(refresh.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_interval_spaces_calls() {
        let mut limited = FlakySource::new("PANCAKESWAP", 0, 1800.0);
        limited.min_interval = Duration::from_millis(500);
        let limited = Arc::new(limited);
        let free = Arc::new(FlakySource::new("SUSHISWAP", 0, 1830.0));
        let feed = PriceFeedAggregator::new(
            vec![limited.clone(), free.clone()],
            pairs(&["ETH-USDT", "ETH-USDC", "WBNB-BUSD", "CAKE-BUSD"]),
            FeedSettings::default(),
        );

        let start = Instant::now();
        assert_eq!(feed.refresh().await, 8);

        let mut times = limited.call_times();
        times.sort();
        assert_eq!(times.len(), 4);
        assert!(times.windows(2).all(|w| w[1] - w[0] >= Duration::from_millis(500)));
        assert!(start.elapsed() >= Duration::from_millis(1500));

        let free_times = free.call_times();
        assert_eq!(free_times.len(), 4);
        assert!(free_times.iter().all(|t| *t - start < Duration::from_millis(10)));
    }

    #[test]
    fn test_invalid_prices_are_rejected() {
        let key = QuoteKey::new("ETH-USDT", "PANCAKESWAP", "BSC");
        for price in [0.0, -3.0, f64::NAN, f64::INFINITY] {
            let data = PriceData {
                price,
                liquidity_usd: 1.0,
            };
            assert!(matches!(validate_price(&key, data), Err(QuoteError::InvalidData(_))));
        }
        let quote = validate_price(&key, PriceData { price: 1800.0, liquidity_usd: 1.0 }).unwrap();
        assert_eq!(quote.key(), key);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_is_bounded() {
        let mut source = FlakySource::new("PANCAKESWAP", 0, 1800.0);
        source.latency = Duration::from_millis(50);
        let source = Arc::new(source);
        let token_pairs: Vec<String> = (0..20).map(|i| format!("T{}-USDT", i)).collect();
        let settings = FeedSettings {
            fetch_concurrency: 4,
            ..FeedSettings::default()
        };
        let feed = PriceFeedAggregator::new(vec![source.clone()], token_pairs, settings);

        assert_eq!(feed.refresh().await, 20);
        assert!(source.peak.load(Ordering::SeqCst) <= 4);
        assert!(source.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_snapshot_refreshes_when_stale() {
        let source = Arc::new(FlakySource::new("PANCAKESWAP", 0, 1800.0));
        let feed = PriceFeedAggregator::new(vec![source.clone()], pairs(&["ETH-USDT"]), FeedSettings::default());

        assert_eq!(feed.latest_snapshot().await.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // Fresh: served from cache
        feed.latest_snapshot().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(2500)).await;
        feed.latest_snapshot().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prices_for_pair() {
        let feed = PriceFeedAggregator::new(
            vec![
                Arc::new(FlakySource::new("PANCAKESWAP", 0, 1800.0)),
                Arc::new(FlakySource::new("SUSHISWAP", 0, 1830.0)),
            ],
            pairs(&["ETH-USDT", "WBNB-BUSD"]),
            FeedSettings::default(),
        );

        assert_eq!(feed.prices_for_pair("ETH-USDT", None, None).await.len(), 2);
        let only = feed.prices_for_pair("ETH-USDT", Some("SUSHISWAP"), Some("BSC")).await;
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].price, 1830.0);
        assert!(feed.prices_for_pair("ETH-USDT", None, Some("POLYGON")).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stops_on_cancel() {
        let feed = Arc::new(PriceFeedAggregator::new(
            vec![Arc::new(FlakySource::new("PANCAKESWAP", 0, 1800.0))],
            pairs(&["ETH-USDT"]),
            FeedSettings::default(),
        ));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let feed = feed.clone();
            let cancel = cancel.clone();
            async move { feed.start(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(feed.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_start_without_sources_fails() {
        let feed = PriceFeedAggregator::new(Vec::new(), pairs(&["ETH-USDT"]), FeedSettings::default());
        assert!(feed.start(CancellationToken::new()).await.is_err());
    }
}
