//! Fee and Gas Model
//!
//! Basis-point fee tables for DEX swaps and flash-loan providers, plus a
//! constant per-network gas model. Built-in defaults are extended or
//! overridden by the `[dex_fees]`, `[flash_loan_fees]` and `[[networks]]`
//! config sections.

use crate::config::{BotConfig, NetworkGasConfig};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::debug;

/// Fee charged by a DEX not found in the table (0.3%)
pub const DEFAULT_DEX_FEE_BPS: u32 = 30;

/// Flash-loan fee when the provider is unknown or unset (0.1%)
pub const DEFAULT_FLASH_LOAN_FEE_BPS: u32 = 10;

/// Flat gas estimate for networks without a gas model
pub const DEFAULT_GAS_COST_USD: f64 = 10.0;

static DEFAULT_DEX_FEES: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    HashMap::from([
        ("PANCAKESWAP", 25),
        ("SUSHISWAP", 30),
        ("UNISWAP", 30),
        ("UNISWAP_V3", 30),
        ("QUICKSWAP", 30),
        ("APESWAP", 30),
        ("1INCH", 30),
        ("DODO", 10),
        ("CURVE", 4),
        ("BALANCER", 20),
        ("KYBERSWAP", 30),
    ])
});

static DEFAULT_FLASH_LOAN_FEES: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    HashMap::from([("AAVE", 9), ("DYDX", 0), ("DODO", 10), ("UNISWAP_V3", 5)])
});

fn bps_to_fraction(bps: u32) -> f64 {
    bps as f64 / 10_000.0
}

/// Constant gas model: units x gas price x native token price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasModel {
    pub gas_units: u64,
    pub gas_price_gwei: f64,
    pub native_token_price_usd: f64,
}

impl GasModel {
    pub fn cost_usd(&self) -> f64 {
        self.gas_units as f64 * self.gas_price_gwei * 1e-9 * self.native_token_price_usd
    }
}

impl From<&NetworkGasConfig> for GasModel {
    fn from(cfg: &NetworkGasConfig) -> Self {
        Self {
            gas_units: cfg.gas_units,
            gas_price_gwei: cfg.gas_price_gwei,
            native_token_price_usd: cfg.native_token_price_usd,
        }
    }
}

/// Fee-aware cost model used by the detector
#[derive(Debug, Clone)]
pub struct FeeModel {
    dex_fees_bps: HashMap<String, u32>,
    flash_loan_fee_bps: u32,
    gas_models: HashMap<String, GasModel>,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self::from_config(&BotConfig::default())
    }
}

impl FeeModel {
    pub fn from_config(config: &BotConfig) -> Self {
        let mut dex_fees_bps: HashMap<String, u32> = DEFAULT_DEX_FEES
            .iter()
            .map(|(name, bps)| (name.to_string(), *bps))
            .collect();
        for (name, bps) in &config.dex_fees {
            dex_fees_bps.insert(name.to_uppercase(), *bps);
        }

        let mut flash_fees: HashMap<String, u32> = DEFAULT_FLASH_LOAN_FEES
            .iter()
            .map(|(name, bps)| (name.to_string(), *bps))
            .collect();
        for (name, bps) in &config.flash_loan_fees {
            flash_fees.insert(name.to_uppercase(), *bps);
        }
        let flash_loan_fee_bps = config
            .trading
            .flash_loan_provider
            .as_ref()
            .and_then(|provider| flash_fees.get(&provider.to_uppercase()).copied())
            .unwrap_or(DEFAULT_FLASH_LOAN_FEE_BPS);

        let gas_models = config
            .networks
            .iter()
            .map(|n| (n.name.to_uppercase(), GasModel::from(n)))
            .collect();

        debug!(
            "Fee model: {} DEX fees, flash loan {} bps",
            dex_fees_bps.len(),
            flash_loan_fee_bps
        );

        Self {
            dex_fees_bps,
            flash_loan_fee_bps,
            gas_models,
        }
    }

    /// Swap fee for a DEX, case-insensitive
    pub fn dex_fee_bps(&self, dex: &str) -> u32 {
        self.dex_fees_bps
            .get(&dex.to_uppercase())
            .copied()
            .unwrap_or(DEFAULT_DEX_FEE_BPS)
    }

    pub fn flash_loan_fee_bps(&self) -> u32 {
        self.flash_loan_fee_bps
    }

    pub fn flash_loan_fee_usd(&self, loan_usd: f64) -> f64 {
        loan_usd * bps_to_fraction(self.flash_loan_fee_bps)
    }

    /// Swap fees for both legs of the round trip
    pub fn dex_fees_usd(&self, loan_usd: f64, buy_dex: &str, sell_dex: &str) -> f64 {
        loan_usd * bps_to_fraction(self.dex_fee_bps(buy_dex))
            + loan_usd * bps_to_fraction(self.dex_fee_bps(sell_dex))
    }

    pub fn gas_cost_usd(&self, network: &str) -> f64 {
        self.gas_models
            .get(&network.to_uppercase())
            .map(GasModel::cost_usd)
            .unwrap_or(DEFAULT_GAS_COST_USD)
    }

    /// Net profit after flash-loan fee, both swap fees and gas
    pub fn net_profit_usd(
        &self,
        loan_usd: f64,
        price_diff_pct: f64,
        buy_dex: &str,
        sell_dex: &str,
        network: &str,
    ) -> f64 {
        let gross = loan_usd * price_diff_pct / 100.0;
        gross
            - self.flash_loan_fee_usd(loan_usd)
            - self.dex_fees_usd(loan_usd, buy_dex, sell_dex)
            - self.gas_cost_usd(network)
    }
}
