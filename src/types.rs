//! Core data structures
//!
//! Quotes flow in from the price feed, opportunities flow out of the
//! detector, and execution outcomes flow back into the capital allocator.

use crate::errors::ExecutionErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key for a quote: one entry per (pair, DEX, network)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteKey {
    pub token_pair: String,
    pub dex: String,
    pub network: String,
}

impl QuoteKey {
    pub fn new(token_pair: &str, dex: &str, network: &str) -> Self {
        Self {
            token_pair: token_pair.to_string(),
            dex: dex.to_string(),
            network: network.to_string(),
        }
    }
}

impl fmt::Display for QuoteKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} on {}@{}", self.token_pair, self.dex, self.network)
    }
}

/// Raw price/liquidity returned by a quote source for one pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceData {
    pub price: f64,
    #[serde(default)]
    pub liquidity_usd: f64,
}

/// A single observed price on one DEX/network. Replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub token_pair: String,
    pub dex_name: String,
    pub network: String,
    pub price: f64,
    pub liquidity_usd: f64,
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(key: &QuoteKey, data: PriceData) -> Self {
        Self {
            token_pair: key.token_pair.clone(),
            dex_name: key.dex.clone(),
            network: key.network.clone(),
            price: data.price,
            liquidity_usd: data.liquidity_usd.max(0.0),
            observed_at: Utc::now(),
        }
    }

    pub fn key(&self) -> QuoteKey {
        QuoteKey::new(&self.token_pair, &self.dex_name, &self.network)
    }

    /// Liquidity as an optional value: zero means the source did not report it
    pub fn known_liquidity(&self) -> Option<f64> {
        if self.liquidity_usd > 0.0 {
            Some(self.liquidity_usd)
        } else {
            None
        }
    }
}

/// Cross-DEX arbitrage opportunity (immutable once created)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub token_pair: String,
    pub buy_dex: String,
    pub sell_dex: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub price_diff_pct: f64,
    pub estimated_profit_usd: f64,
    pub network: String,
    pub loan_amount_usd: f64,
    pub buy_liquidity_usd: Option<f64>,
    pub sell_liquidity_usd: Option<f64>,
    pub gas_cost_usd: f64,
    /// 0.0 - 1.0, 0.5 when no scorer is active
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl Opportunity {
    /// Confidence assigned when no scorer is configured
    pub const DEFAULT_CONFIDENCE: f64 = 0.5;

    /// Request handed to the execution service for this opportunity
    pub fn to_request(&self, amount_usd: f64) -> FlashLoanRequest {
        FlashLoanRequest {
            opportunity_ref: self.reference(),
            token_pair: self.token_pair.clone(),
            source_dex: self.buy_dex.clone(),
            target_dex: self.sell_dex.clone(),
            amount_usd,
            network: self.network.clone(),
            expected_profit_usd: self.estimated_profit_usd,
        }
    }

    /// Stable reference used to correlate outcomes and alerts
    pub fn reference(&self) -> String {
        format!(
            "{}:{}->{}@{}:{}",
            self.token_pair,
            self.buy_dex,
            self.sell_dex,
            self.network,
            self.created_at.timestamp_millis()
        )
    }

    /// Smallest known liquidity of the two legs
    pub fn min_liquidity_usd(&self) -> Option<f64> {
        match (self.buy_liquidity_usd, self.sell_liquidity_usd) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            Self::DEFAULT_CONFIDENCE
        };
        self
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} | Buy {} @ {:.6} | Sell {} @ {:.6} | {} | spread {:.3}% | est ${:.2} | loan ${:.0}",
            self.token_pair,
            self.buy_dex,
            self.buy_price,
            self.sell_dex,
            self.sell_price,
            self.network,
            self.price_diff_pct,
            self.estimated_profit_usd,
            self.loan_amount_usd
        )
    }
}

/// Parameters handed to the execution service for one flash-loan arbitrage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashLoanRequest {
    pub opportunity_ref: String,
    pub token_pair: String,
    pub source_dex: String,
    pub target_dex: String,
    pub amount_usd: f64,
    pub network: String,
    /// Detector estimate, informational only
    pub expected_profit_usd: f64,
}

/// Structured result reported back by the execution service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub opportunity_ref: String,
    pub success: bool,
    pub tx_ref: Option<String>,
    pub realized_profit_usd: f64,
    pub gas_cost_usd: f64,
    pub error_kind: Option<ExecutionErrorKind>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    pub fn succeeded(opportunity_ref: String, tx_ref: Option<String>, profit: f64, gas: f64) -> Self {
        Self {
            opportunity_ref,
            success: true,
            tx_ref,
            realized_profit_usd: profit,
            gas_cost_usd: gas,
            error_kind: None,
            error: None,
            execution_time_ms: 0,
        }
    }

    pub fn failed(opportunity_ref: String, kind: ExecutionErrorKind, error: impl Into<String>) -> Self {
        Self {
            opportunity_ref,
            success: false,
            tx_ref: None,
            realized_profit_usd: 0.0,
            gas_cost_usd: 0.0,
            error_kind: Some(kind),
            error: Some(error.into()),
            execution_time_ms: 0,
        }
    }

    pub fn with_tx_ref(mut self, tx_ref: Option<String>) -> Self {
        self.tx_ref = tx_ref;
        self
    }

    pub fn error_message(&self) -> String {
        match (&self.error, self.error_kind) {
            (Some(msg), _) => msg.clone(),
            (None, Some(kind)) => kind.to_string(),
            (None, None) => "Unknown".to_string(),
        }
    }
}

/// Alert priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Normal,
    Medium,
    High,
}

impl fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AlertPriority::Low => write!(f, "low"),
            AlertPriority::Normal => write!(f, "normal"),
            AlertPriority::Medium => write!(f, "medium"),
            AlertPriority::High => write!(f, "high"),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn quote(pair: &str, dex: &str, network: &str, price: f64, liquidity: f64) -> Quote {
        Quote::new(
            &QuoteKey::new(pair, dex, network),
            PriceData {
                price,
                liquidity_usd: liquidity,
            },
        )
    }

    pub fn opportunity(pair: &str, profit: f64) -> Opportunity {
        Opportunity {
            token_pair: pair.to_string(),
            buy_dex: "PANCAKESWAP".to_string(),
            sell_dex: "SUSHISWAP".to_string(),
            buy_price: 1800.0,
            sell_price: 1830.0,
            price_diff_pct: 1.67,
            estimated_profit_usd: profit,
            network: "BSC".to_string(),
            loan_amount_usd: 15_000.0,
            buy_liquidity_usd: Some(2_000_000.0),
            sell_liquidity_usd: Some(1_500_000.0),
            gas_cost_usd: 0.75,
            confidence: Opportunity::DEFAULT_CONFIDENCE,
            created_at: Utc::now(),
        }
    }
}
