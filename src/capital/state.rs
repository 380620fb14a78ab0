//! Capital state
//!
//! The single mutable record of the engine's capital: balances, realized
//! profit history and the current allocation policy. Serialized as JSON by
//! the state store.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum realized-profit entries kept
pub const PROFIT_HISTORY_CAP: usize = 1000;

/// Entries used for the rolling ROI
pub const ROI_WINDOW: usize = 50;

/// One realized profit event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfitEntry {
    pub amount_usd: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalState {
    pub initial_capital_usd: f64,
    pub current_capital_usd: f64,
    pub total_profit_usd: f64,
    #[serde(default)]
    pub profit_history: VecDeque<ProfitEntry>,
    /// Clamped to [5, 50]
    pub max_allocation_per_trade_percent: f64,
    pub min_reserve_percent: f64,
    pub max_pool_impact_percent: f64,
    pub last_updated: DateTime<Utc>,
}

impl CapitalState {
    pub fn new(
        initial_capital_usd: f64,
        max_allocation_per_trade_percent: f64,
        min_reserve_percent: f64,
        max_pool_impact_percent: f64,
    ) -> Self {
        Self {
            initial_capital_usd,
            current_capital_usd: initial_capital_usd,
            total_profit_usd: 0.0,
            profit_history: VecDeque::new(),
            max_allocation_per_trade_percent,
            min_reserve_percent,
            max_pool_impact_percent,
            last_updated: Utc::now(),
        }
    }

    /// Append a profit entry, evicting the oldest beyond the cap
    pub fn push_profit(&mut self, amount_usd: f64, timestamp: DateTime<Utc>) {
        self.profit_history.push_back(ProfitEntry { amount_usd, timestamp });
        while self.profit_history.len() > PROFIT_HISTORY_CAP {
            self.profit_history.pop_front();
        }
    }

    /// Sum of the most recent `window` profit entries
    pub fn recent_profit(&self, window: usize) -> f64 {
        self.profit_history
            .iter()
            .rev()
            .take(window)
            .map(|e| e.amount_usd)
            .sum()
    }

    /// Sum of profits recorded after `since`
    pub fn profit_since(&self, since: DateTime<Utc>) -> f64 {
        self.profit_history
            .iter()
            .filter(|e| e.timestamp > since)
            .map(|e| e.amount_usd)
            .sum()
    }

    /// Reporting view at `now`
    pub fn summary_at(&self, now: DateTime<Utc>) -> CapitalSummary {
        let profit_1h = self.profit_since(now - Duration::hours(1));
        let profit_24h = self.profit_since(now - Duration::hours(24));
        let (roi_total, roi_24h) = if self.initial_capital_usd > 0.0 {
            (
                self.total_profit_usd / self.initial_capital_usd * 100.0,
                profit_24h / self.initial_capital_usd * 100.0,
            )
        } else {
            (0.0, 0.0)
        };

        CapitalSummary {
            initial_capital: round2(self.initial_capital_usd),
            current_capital: round2(self.current_capital_usd),
            total_profit: round2(self.total_profit_usd),
            profit_1h: round2(profit_1h),
            profit_24h: round2(profit_24h),
            roi_total_percent: round2(roi_total),
            roi_24h_percent: round2(roi_24h),
            allocation_per_trade_percent: round2(self.max_allocation_per_trade_percent),
            max_pool_impact_percent: self.max_pool_impact_percent,
            transaction_count: self.profit_history.len(),
        }
    }
}

/// Round a USD figure to cents
pub fn round2(value: f64) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(2))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Capital status for external reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalSummary {
    pub initial_capital: f64,
    pub current_capital: f64,
    pub total_profit: f64,
    pub profit_1h: f64,
    pub profit_24h: f64,
    pub roi_total_percent: f64,
    pub roi_24h_percent: f64,
    pub allocation_per_trade_percent: f64,
    pub max_pool_impact_percent: f64,
    pub transaction_count: usize,
}
