//! Quote Sources
//!
//! One [`QuoteSource`] per (DEX, network). Sources return `Ok(None)` for
//! pairs they do not carry; errors are transient and retried by the
//! aggregator.

use crate::config::{BotConfig, SourceConfig, SourceKind};
use crate::errors::{ConfigError, QuoteError};
use crate::types::PriceData;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn dex(&self) -> &str;

    fn network(&self) -> &str;

    /// Minimum spacing between two calls to this source
    fn min_fetch_interval(&self) -> Duration;

    /// Latest price and liquidity for `token_pair`, `None` if unsupported
    async fn get_price(&self, token_pair: &str) -> Result<Option<PriceData>, QuoteError>;

    /// Rate-limit key
    fn id(&self) -> String {
        format!("{}_{}", self.dex(), self.network())
    }
}

fn interval_from_secs(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

/// JSON body returned by a price endpoint
#[derive(Debug, Deserialize)]
struct HttpPriceResponse {
    price: Option<f64>,
    #[serde(default, alias = "liquidity")]
    liquidity_usd: Option<f64>,
}

/// Source backed by an HTTP endpoint: `GET {endpoint}?pair=ETH-USDT`
pub struct HttpQuoteSource {
    dex: String,
    network: String,
    endpoint: String,
    min_interval: Duration,
    client: reqwest::Client,
}

impl HttpQuoteSource {
    pub fn new(dex: &str, network: &str, endpoint: &str, min_interval: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            dex: dex.to_string(),
            network: network.to_string(),
            endpoint: endpoint.to_string(),
            min_interval,
            client,
        }
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    fn dex(&self) -> &str {
        &self.dex
    }

    fn network(&self) -> &str {
        &self.network
    }

    fn min_fetch_interval(&self) -> Duration {
        self.min_interval
    }

    async fn get_price(&self, token_pair: &str) -> Result<Option<PriceData>, QuoteError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("pair", token_pair)])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!("{} does not quote {}", self.id(), token_pair);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(QuoteError::Status {
                pair: token_pair.to_string(),
                status: status.as_u16(),
            });
        }

        let body: HttpPriceResponse = response.json().await?;
        Ok(body.price.map(|price| PriceData {
            price,
            liquidity_usd: body.liquidity_usd.unwrap_or(0.0),
        }))
    }
}

/// Fixed prices, used for dry runs and tests
pub struct StaticQuoteSource {
    dex: String,
    network: String,
    prices: HashMap<String, PriceData>,
    min_interval: Duration,
}

impl StaticQuoteSource {
    pub fn new(dex: &str, network: &str, prices: HashMap<String, PriceData>) -> Self {
        Self {
            dex: dex.to_string(),
            network: network.to_string(),
            prices,
            min_interval: Duration::ZERO,
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }
}

#[async_trait]
impl QuoteSource for StaticQuoteSource {
    fn dex(&self) -> &str {
        &self.dex
    }

    fn network(&self) -> &str {
        &self.network
    }

    fn min_fetch_interval(&self) -> Duration {
        self.min_interval
    }

    async fn get_price(&self, token_pair: &str) -> Result<Option<PriceData>, QuoteError> {
        Ok(self.prices.get(token_pair).copied())
    }
}

fn build_source(cfg: &SourceConfig) -> Result<Arc<dyn QuoteSource>, ConfigError> {
    let min_interval = interval_from_secs(cfg.min_fetch_interval_secs);
    let dex = cfg.dex.to_uppercase();
    let network = cfg.network.to_uppercase();

    match cfg.kind {
        SourceKind::Http => {
            let endpoint = cfg.endpoint.as_deref().filter(|e| !e.trim().is_empty()).ok_or_else(|| {
                ConfigError::Invalid(format!("source {}@{} of kind http needs an endpoint", dex, network))
            })?;
            Ok(Arc::new(HttpQuoteSource::new(&dex, &network, endpoint, min_interval)))
        }
        SourceKind::Static => {
            let prices = cfg
                .prices
                .iter()
                .map(|(pair, p)| {
                    (
                        pair.clone(),
                        PriceData {
                            price: p.price,
                            liquidity_usd: p.liquidity_usd,
                        },
                    )
                })
                .collect();
            Ok(Arc::new(
                StaticQuoteSource::new(&dex, &network, prices).with_min_interval(min_interval),
            ))
        }
    }
}

/// Build every enabled source from the `[[sources]]` config section
pub fn build_sources(config: &BotConfig) -> Result<Vec<Arc<dyn QuoteSource>>, ConfigError> {
    let sources = config
        .enabled_sources()
        .into_iter()
        .map(build_source)
        .collect::<Result<Vec<_>, _>>()?;

    for source in &sources {
        info!(
            "Quote source {} (min interval {:?})",
            source.id(),
            source.min_fetch_interval()
        );
    }
    Ok(sources)
}
