//! Configuration management
//!
//! Reads the engine configuration from a TOML file, then applies a small set
//! of `.env` / environment overrides. Every field has a default, so an empty
//! file yields a working dry-run configuration.

use crate::errors::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Lower and upper bound for the per-trade allocation percentage
pub const MIN_ALLOCATION_PER_TRADE_PERCENT: f64 = 5.0;
pub const MAX_ALLOCATION_PER_TRADE_PERCENT: f64 = 50.0;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub capital: CapitalConfig,
    #[serde(default = "default_networks")]
    pub networks: Vec<NetworkGasConfig>,
    /// DEX name -> fee in basis points (extends the built-in table)
    #[serde(default)]
    pub dex_fees: HashMap<String, u32>,
    /// Flash-loan provider -> fee in basis points (extends the built-in table)
    #[serde(default)]
    pub flash_loan_fees: HashMap<String, u32>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub alerts: AlertConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            trading: TradingConfig::default(),
            capital: CapitalConfig::default(),
            networks: default_networks(),
            dex_fees: HashMap::new(),
            flash_loan_fees: HashMap::new(),
            sources: Vec::new(),
            alerts: AlertConfig::default(),
        }
    }
}

/// Loop cadence, fetch policy, persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_update_interval")]
    pub update_interval_ms: u64,
    #[serde(default = "default_loop_interval")]
    pub loop_interval_ms: u64,
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_fetch_base_delay")]
    pub fetch_base_delay_ms: u64,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_update_interval() -> u64 { 1000 }
fn default_loop_interval() -> u64 { 100 }
fn default_error_backoff() -> u64 { 5000 }
fn default_fetch_concurrency() -> usize { 50 }
fn default_fetch_attempts() -> u32 { 3 }
fn default_fetch_base_delay() -> u64 { 1000 }
fn default_state_file() -> String { "data/capital_state.json".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval(),
            loop_interval_ms: default_loop_interval(),
            error_backoff_ms: default_error_backoff(),
            fetch_concurrency: default_fetch_concurrency(),
            fetch_attempts: default_fetch_attempts(),
            fetch_base_delay_ms: default_fetch_base_delay(),
            state_file: default_state_file(),
            log_level: default_log_level(),
        }
    }
}

/// Detection thresholds and execution admission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_min_loan")]
    pub min_loan_usd: f64,
    #[serde(default = "default_max_loan")]
    pub max_loan_usd: f64,
    /// Fraction of the shallower pool a loan may consume (0.01 = 1%)
    #[serde(default = "default_liquidity_fraction")]
    pub liquidity_fraction: f64,
    #[serde(default = "default_min_profit")]
    pub min_profit_threshold_usd: f64,
    #[serde(default = "default_confidence_threshold")]
    pub ai_confidence_threshold: f64,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
    #[serde(default = "default_execution_interval")]
    pub execution_interval_ms: u64,
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_token_pairs")]
    pub token_pairs: Vec<String>,
    /// Preferred flash-loan provider (AAVE, DODO, DYDX, UNISWAP_V3)
    #[serde(default)]
    pub flash_loan_provider: Option<String>,
}

fn default_min_loan() -> f64 { 1000.0 }
fn default_max_loan() -> f64 { 50_000.0 }
fn default_liquidity_fraction() -> f64 { 0.01 }
fn default_min_profit() -> f64 { 10.0 }
fn default_confidence_threshold() -> f64 { 0.6 }
fn default_top_n() -> usize { 5 }
fn default_max_concurrent() -> usize { 3 }
fn default_execution_interval() -> u64 { 500 }
fn default_execution_timeout() -> u64 { 90 }
fn default_token_pairs() -> Vec<String> {
    ["ETH-USDT", "ETH-USDC", "WBNB-BUSD", "WMATIC-USDC"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            min_loan_usd: default_min_loan(),
            max_loan_usd: default_max_loan(),
            liquidity_fraction: default_liquidity_fraction(),
            min_profit_threshold_usd: default_min_profit(),
            ai_confidence_threshold: default_confidence_threshold(),
            top_n: default_top_n(),
            max_concurrent_executions: default_max_concurrent(),
            execution_interval_ms: default_execution_interval(),
            execution_timeout_secs: default_execution_timeout(),
            token_pairs: default_token_pairs(),
            flash_loan_provider: None,
        }
    }
}

/// Capital allocation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital_usd: f64,
    #[serde(default = "default_allocation_per_trade")]
    pub max_allocation_per_trade_percent: f64,
    /// Share of capital that may be spread across network/DEX nodes
    #[serde(default = "default_max_allocation")]
    pub max_allocation_percent: f64,
    #[serde(default = "default_min_reserve")]
    pub min_reserve_percent: f64,
    #[serde(default = "default_max_pool_impact")]
    pub max_pool_impact_percent: f64,
    /// Rolling ROI (%) above which per-trade allocation grows
    #[serde(default = "default_increase_threshold")]
    pub allocation_increase_threshold_percent: f64,
}

fn default_initial_capital() -> f64 { 1000.0 }
fn default_allocation_per_trade() -> f64 { 25.0 }
fn default_max_allocation() -> f64 { 80.0 }
fn default_min_reserve() -> f64 { 20.0 }
fn default_max_pool_impact() -> f64 { 2.0 }
fn default_increase_threshold() -> f64 { 5.0 }

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            initial_capital_usd: default_initial_capital(),
            max_allocation_per_trade_percent: default_allocation_per_trade(),
            max_allocation_percent: default_max_allocation(),
            min_reserve_percent: default_min_reserve(),
            max_pool_impact_percent: default_max_pool_impact(),
            allocation_increase_threshold_percent: default_increase_threshold(),
        }
    }
}

/// Constant gas model for one network: units x price x native token price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkGasConfig {
    pub name: String,
    pub gas_units: u64,
    pub gas_price_gwei: f64,
    pub native_token_price_usd: f64,
}

fn default_networks() -> Vec<NetworkGasConfig> {
    vec![
        NetworkGasConfig {
            name: "BSC".to_string(),
            gas_units: 500_000,
            gas_price_gwei: 5.0,
            native_token_price_usd: 300.0,
        },
        NetworkGasConfig {
            name: "POLYGON".to_string(),
            gas_units: 800_000,
            gas_price_gwei: 30.0,
            native_token_price_usd: 1.0,
        },
    ]
}

/// How a configured quote source is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// GET {endpoint}?pair=ETH-USDT -> {"price": .., "liquidity_usd": ..}
    Http,
    /// Fixed prices from the config file (dry runs)
    Static,
}

/// One fixed price entry of a static source
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StaticPrice {
    pub price: f64,
    #[serde(default)]
    pub liquidity_usd: f64,
}

/// One quote source: a DEX on a network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub dex: String,
    pub network: String,
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_min_fetch_interval")]
    pub min_fetch_interval_secs: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Prices for `kind = "static"`, keyed by token pair
    #[serde(default)]
    pub prices: HashMap<String, StaticPrice>,
}

fn default_source_kind() -> SourceKind { SourceKind::Http }
fn default_min_fetch_interval() -> f64 { 0.5 }
fn default_true() -> bool { true }

/// Alerting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub discord_webhook: Option<String>,
    #[serde(default = "default_alert_history")]
    pub history_size: usize,
}

fn default_alert_history() -> usize { 100 }

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            discord_webhook: None,
            history_size: default_alert_history(),
        }
    }
}

impl BotConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply environment overrides on top of the file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("FLASHARB_STATE_FILE") {
            self.general.state_file = path;
        }
        if let Ok(url) = std::env::var("DISCORD_WEBHOOK") {
            if !url.trim().is_empty() {
                self.alerts.discord_webhook = Some(url);
            }
        }
        if let Ok(v) = std::env::var("MIN_PROFIT_THRESHOLD_USD") {
            self.trading.min_profit_threshold_usd =
                v.parse().context("MIN_PROFIT_THRESHOLD_USD must be a number")?;
        }
        if let Ok(v) = std::env::var("MAX_CONCURRENT_EXECUTIONS") {
            self.trading.max_concurrent_executions =
                v.parse().context("MAX_CONCURRENT_EXECUTIONS must be an integer")?;
        }
        if let Ok(v) = std::env::var("INITIAL_CAPITAL_USD") {
            self.capital.initial_capital_usd =
                v.parse().context("INITIAL_CAPITAL_USD must be a number")?;
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let g = &self.general;
        if g.update_interval_ms == 0 || g.loop_interval_ms == 0 {
            return Err(ConfigError::Invalid("intervals must be > 0".to_string()));
        }
        if g.fetch_concurrency == 0 || g.fetch_attempts == 0 {
            return Err(ConfigError::Invalid(
                "fetch_concurrency and fetch_attempts must be > 0".to_string(),
            ));
        }

        let t = &self.trading;
        if t.min_loan_usd <= 0.0 || t.min_loan_usd > t.max_loan_usd {
            return Err(ConfigError::Invalid(format!(
                "loan bounds invalid: min {} / max {}",
                t.min_loan_usd, t.max_loan_usd
            )));
        }
        if !(0.0..=1.0).contains(&t.liquidity_fraction) || !(0.0..=1.0).contains(&t.ai_confidence_threshold) {
            return Err(ConfigError::Invalid(
                "liquidity_fraction and ai_confidence_threshold must be within [0, 1]".to_string(),
            ));
        }
        if t.max_concurrent_executions == 0 || t.top_n == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_executions and top_n must be > 0".to_string(),
            ));
        }

        let c = &self.capital;
        for (name, value) in [
            ("max_allocation_percent", c.max_allocation_percent),
            ("min_reserve_percent", c.min_reserve_percent),
            ("max_pool_impact_percent", c.max_pool_impact_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{} must be within [0, 100], got {}", name, value)));
            }
        }
        if c.initial_capital_usd < 0.0 {
            return Err(ConfigError::Invalid("initial_capital_usd must be >= 0".to_string()));
        }

        let clamped = self.capital.max_allocation_per_trade_percent
            .clamp(MIN_ALLOCATION_PER_TRADE_PERCENT, MAX_ALLOCATION_PER_TRADE_PERCENT);
        if clamped != self.capital.max_allocation_per_trade_percent {
            warn!(
                "max_allocation_per_trade_percent {} clamped to {}",
                self.capital.max_allocation_per_trade_percent, clamped
            );
            self.capital.max_allocation_per_trade_percent = clamped;
        }

        Ok(())
    }

    /// Enabled sources only
    pub fn enabled_sources(&self) -> Vec<&SourceConfig> {
        self.sources.iter().filter(|s| s.enabled).collect()
    }
}

/// Log level from the config file, read before logging is set up so that
/// config loading itself is logged. Falls back to the default level.
pub fn startup_log_level<P: AsRef<Path>>(path: P) -> String {
    BotConfig::load(path)
        .map(|config| config.general.log_level)
        .unwrap_or_else(|_| default_log_level())
}

/// Load `.env`, the TOML file, env overrides, then validate
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BotConfig> {
    dotenv::dotenv().ok();

    let mut config = BotConfig::load(path.as_ref())
        .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;
    config.apply_env_overrides()?;
    config.validate()?;

    info!(
        "Configuration loaded: {} sources, {} pairs, {} networks",
        config.sources.len(),
        config.trading.token_pairs.len(),
        config.networks.len()
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let mut config = BotConfig::from_toml_str("").unwrap();
        config.validate().unwrap();

        assert_eq!(config.general.update_interval_ms, 1000);
        assert_eq!(config.general.fetch_concurrency, 50);
        assert_eq!(config.trading.min_loan_usd, 1000.0);
        assert_eq!(config.trading.max_loan_usd, 50_000.0);
        assert_eq!(config.trading.min_profit_threshold_usd, 10.0);
        assert_eq!(config.trading.ai_confidence_threshold, 0.6);
        assert_eq!(config.trading.top_n, 5);
        assert_eq!(config.trading.max_concurrent_executions, 3);
        assert_eq!(config.trading.execution_interval_ms, 500);
        assert_eq!(config.networks.len(), 2);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[general]
update_interval_ms = 2000

[trading]
min_profit_threshold_usd = 25.0
flash_loan_provider = "AAVE"

[dex_fees]
MYDEX = 15

[[networks]]
name = "BSC"
gas_units = 400000
gas_price_gwei = 3.0
native_token_price_usd = 600.0

[[sources]]
dex = "PANCAKESWAP"
network = "BSC"
kind = "static"

[sources.prices."ETH-USDT"]
price = 1800.0
liquidity_usd = 2000000.0

[[sources]]
dex = "SUSHISWAP"
network = "BSC"
endpoint = "http://localhost:8080/price"
min_fetch_interval_secs = 1.0
"#;

        let config = BotConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.general.update_interval_ms, 2000);
        assert_eq!(config.general.loop_interval_ms, 100);
        assert_eq!(config.trading.flash_loan_provider.as_deref(), Some("AAVE"));
        assert_eq!(config.dex_fees.get("MYDEX"), Some(&15));
        assert_eq!(config.networks.len(), 1);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].kind, SourceKind::Static);
        assert_eq!(config.sources[0].prices["ETH-USDT"].price, 1800.0);
        assert_eq!(config.sources[1].kind, SourceKind::Http);
        assert_eq!(config.sources[1].min_fetch_interval_secs, 1.0);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let mut config = BotConfig::from_toml_str(include_str!("../config/flasharb.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.enabled_sources().len(), 2);
        assert_eq!(config.trading.flash_loan_provider.as_deref(), Some("AAVE"));
    }

    #[test]
    fn test_startup_log_level() {
        let missing = std::env::temp_dir().join("flasharb-no-such-config.toml");
        assert_eq!(startup_log_level(&missing), "info");

        let path = std::env::temp_dir().join(format!("flasharb-log-level-{}.toml", std::process::id()));
        std::fs::write(&path, "[general]\nlog_level = \"debug,flasharb_bot=trace\"\n").unwrap();
        assert_eq!(startup_log_level(&path), "debug,flasharb_bot=trace");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_validate_rejects_inverted_loan_bounds() {
        let mut config = BotConfig::default();
        config.trading.min_loan_usd = 60_000.0;
        tokio_test::assert_err!(config.validate());

        let mut config = BotConfig::default();
        config.capital.min_reserve_percent = 120.0;
        tokio_test::assert_err!(config.validate());
    }

    #[test]
    fn test_validate_clamps_allocation_per_trade() {
        let mut config = BotConfig::default();
        config.capital.max_allocation_per_trade_percent = 80.0;
        config.validate().unwrap();
        assert_eq!(config.capital.max_allocation_per_trade_percent, 50.0);

        config.capital.max_allocation_per_trade_percent = 1.0;
        config.validate().unwrap();
        assert_eq!(config.capital.max_allocation_per_trade_percent, 5.0);
    }
}
