//! Opportunity Detector
//!
//! Scans a quote snapshot for cross-DEX price deltas on the same token pair.
//! Each unordered pair of sources (DEX + network) is compared once; the
//! cheaper side is the buy leg. Loans are sized off the shallower pool and
//! only opportunities with positive net profit (after flash-loan fee, both
//! swap fees and gas) are emitted.
//!
//! Detection is a pure function of the snapshot and the fee model.

use super::fees::FeeModel;
use crate::config::BotConfig;
use crate::types::{Opportunity, Quote};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Loan sizing bounds
#[derive(Debug, Clone, Copy)]
pub struct LoanSizing {
    pub min_loan_usd: f64,
    pub max_loan_usd: f64,
    /// Fraction of the shallower pool a loan may take (0.01 = 1%)
    pub liquidity_fraction: f64,
}

impl Default for LoanSizing {
    fn default() -> Self {
        Self {
            min_loan_usd: 1000.0,
            max_loan_usd: 50_000.0,
            liquidity_fraction: 0.01,
        }
    }
}

impl LoanSizing {
    /// Loan for the given leg liquidities, `None` when the pools are too shallow
    /// to carry even the minimum loan.
    ///
    /// Unknown liquidity on both legs sizes at the maximum loan.
    pub fn determine_loan_amount(&self, buy_liquidity: Option<f64>, sell_liquidity: Option<f64>) -> Option<f64> {
        let min_liquidity = match (buy_liquidity, sell_liquidity) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => return Some(self.max_loan_usd),
        };

        let liquidity_limit = min_liquidity * self.liquidity_fraction;
        if liquidity_limit < self.min_loan_usd {
            return None;
        }
        Some(liquidity_limit.min(self.max_loan_usd))
    }
}

/// Opportunity detector for cross-DEX arbitrage
#[derive(Debug, Clone, Default)]
pub struct OpportunityDetector {
    fees: FeeModel,
    sizing: LoanSizing,
}

impl OpportunityDetector {
    pub fn new(fees: FeeModel, sizing: LoanSizing) -> Self {
        Self { fees, sizing }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(
            FeeModel::from_config(config),
            LoanSizing {
                min_loan_usd: config.trading.min_loan_usd,
                max_loan_usd: config.trading.max_loan_usd,
                liquidity_fraction: config.trading.liquidity_fraction,
            },
        )
    }

    pub fn fees(&self) -> &FeeModel {
        &self.fees
    }

    pub fn sizing(&self) -> &LoanSizing {
        &self.sizing
    }

    /// Find every profitable opportunity in a snapshot
    pub fn detect(&self, quotes: &[Quote]) -> Vec<Opportunity> {
        // BTreeMap keeps per-cycle output order stable across runs
        let mut by_pair: BTreeMap<&str, Vec<&Quote>> = BTreeMap::new();
        for quote in quotes {
            by_pair.entry(quote.token_pair.as_str()).or_default().push(quote);
        }

        let mut opportunities = Vec::new();
        for (pair, pair_quotes) in by_pair {
            if pair_quotes.len() < 2 {
                continue;
            }
            for i in 0..pair_quotes.len() {
                for j in (i + 1)..pair_quotes.len() {
                    if let Some(opp) = self.evaluate(pair_quotes[i], pair_quotes[j]) {
                        debug!("Opportunity: {}", opp);
                        opportunities.push(opp);
                    }
                }
            }
            trace!("{}: {} quotes compared", pair, pair_quotes.len());
        }

        opportunities
    }

    /// Compare two quotes of the same pair
    fn evaluate(&self, a: &Quote, b: &Quote) -> Option<Opportunity> {
        if !(a.price > 0.0 && b.price > 0.0) || !a.price.is_finite() || !b.price.is_finite() {
            return None;
        }
        if a.dex_name == b.dex_name && a.network == b.network {
            return None;
        }

        let (buy, sell) = if a.price <= b.price { (a, b) } else { (b, a) };
        let price_diff_pct = (sell.price - buy.price) / buy.price * 100.0;
        if price_diff_pct <= 0.0 {
            return None;
        }

        let buy_liquidity = buy.known_liquidity();
        let sell_liquidity = sell.known_liquidity();
        let Some(loan) = self.sizing.determine_loan_amount(buy_liquidity, sell_liquidity) else {
            trace!(
                "{} {} -> {}: insufficient liquidity",
                buy.token_pair, buy.dex_name, sell.dex_name
            );
            return None;
        };

        // Execution happens on the buy-side network
        let network = buy.network.clone();
        let net_profit = self
            .fees
            .net_profit_usd(loan, price_diff_pct, &buy.dex_name, &sell.dex_name, &network);
        if net_profit <= 0.0 {
            return None;
        }

        Some(Opportunity {
            token_pair: buy.token_pair.clone(),
            buy_dex: buy.dex_name.clone(),
            sell_dex: sell.dex_name.clone(),
            buy_price: buy.price,
            sell_price: sell.price,
            price_diff_pct,
            estimated_profit_usd: net_profit,
            gas_cost_usd: self.fees.gas_cost_usd(&network),
            network,
            loan_amount_usd: loan,
            buy_liquidity_usd: buy_liquidity,
            sell_liquidity_usd: sell_liquidity,
            confidence: Opportunity::DEFAULT_CONFIDENCE,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::quote;

    #[test]
    fn test_eth_usdt_scenario() {
        let detector = OpportunityDetector::default();
        let quotes = vec![
            quote("ETH-USDT", "PANCAKESWAP", "BSC", 1800.0, 2_000_000.0),
            quote("ETH-USDT", "SUSHISWAP", "BSC", 1830.0, 1_500_000.0),
        ];

        let opps = detector.detect(&quotes);
        assert_eq!(opps.len(), 1);

        let opp = &opps[0];
        assert_eq!(opp.buy_dex, "PANCAKESWAP");
        assert_eq!(opp.sell_dex, "SUSHISWAP");
        assert_eq!(opp.network, "BSC");
        assert_eq!(opp.loan_amount_usd, 15_000.0);
        assert!(opp.price_diff_pct > 1.6 && opp.price_diff_pct < 1.7);
        assert!((opp.gas_cost_usd - 0.75).abs() < 1e-9);
        // 250 gross - 15 flash - 82.5 swaps - 0.75 gas
        assert!((opp.estimated_profit_usd - 151.75).abs() < 1e-6);
        assert_eq!(opp.confidence, Opportunity::DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_order_of_quotes_does_not_matter() {
        let detector = OpportunityDetector::default();
        let quotes = vec![
            quote("ETH-USDT", "SUSHISWAP", "BSC", 1830.0, 1_500_000.0),
            quote("ETH-USDT", "PANCAKESWAP", "BSC", 1800.0, 2_000_000.0),
        ];
        let opps = detector.detect(&quotes);
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].buy_dex, "PANCAKESWAP");
    }

    #[test]
    fn test_identical_prices_yield_nothing() {
        let detector = OpportunityDetector::default();
        let quotes = vec![
            quote("ETH-USDT", "PANCAKESWAP", "BSC", 1800.0, 2_000_000.0),
            quote("ETH-USDT", "SUSHISWAP", "BSC", 1800.0, 1_500_000.0),
        ];
        assert!(detector.detect(&quotes).is_empty());
    }

    #[test]
    fn test_non_positive_prices_are_ignored() {
        let detector = OpportunityDetector::default();
        let quotes = vec![
            quote("ETH-USDT", "PANCAKESWAP", "BSC", 0.0, 2_000_000.0),
            quote("ETH-USDT", "SUSHISWAP", "BSC", 1830.0, 1_500_000.0),
            quote("ETH-USDT", "APESWAP", "BSC", -5.0, 1_500_000.0),
            quote("ETH-USDT", "BISWAP", "BSC", 1790.0, 1_500_000.0),
        ];
        let opps = detector.detect(&quotes);
        assert_eq!(opps.len(), 1);
        for opp in &opps {
            assert!(opp.buy_price > 0.0 && opp.sell_price > 0.0);
            assert_ne!(opp.buy_dex, "PANCAKESWAP");
            assert_ne!(opp.buy_dex, "APESWAP");
        }
    }

    #[test]
    fn test_single_quote_and_unprofitable_spread() {
        let detector = OpportunityDetector::default();
        assert!(detector
            .detect(&[quote("ETH-USDT", "PANCAKESWAP", "BSC", 1800.0, 2_000_000.0)])
            .is_empty());

        // 0.2% spread does not cover 0.55% of swap fees
        let quotes = vec![
            quote("ETH-USDT", "PANCAKESWAP", "BSC", 1800.0, 2_000_000.0),
            quote("ETH-USDT", "SUSHISWAP", "BSC", 1803.6, 1_500_000.0),
        ];
        assert!(detector.detect(&quotes).is_empty());
    }

    #[test]
    fn test_pairs_are_not_mixed() {
        let detector = OpportunityDetector::default();
        let quotes = vec![
            quote("ETH-USDT", "PANCAKESWAP", "BSC", 1800.0, 2_000_000.0),
            quote("WBNB-BUSD", "SUSHISWAP", "BSC", 1830.0, 1_500_000.0),
        ];
        assert!(detector.detect(&quotes).is_empty());
    }

    #[test]
    fn test_loan_sizing() {
        let sizing = LoanSizing::default();
        assert_eq!(sizing.determine_loan_amount(Some(2_000_000.0), Some(1_500_000.0)), Some(15_000.0));
        assert_eq!(sizing.determine_loan_amount(Some(100_000_000.0), None), Some(50_000.0));
        assert_eq!(sizing.determine_loan_amount(None, None), Some(50_000.0));
        // 1% of 50k is below the 1000 minimum
        assert_eq!(sizing.determine_loan_amount(Some(50_000.0), Some(1_000_000.0)), None);

        let capped = LoanSizing {
            max_loan_usd: 10_000.0,
            ..LoanSizing::default()
        };
        assert_eq!(capped.determine_loan_amount(Some(2_000_000.0), Some(1_500_000.0)), Some(10_000.0));
    }

    #[test]
    fn test_emitted_opportunities_respect_invariants() {
        let detector = OpportunityDetector::default();
        let sizing = *detector.sizing();
        let mut quotes = Vec::new();
        let dexes = ["PANCAKESWAP", "SUSHISWAP", "APESWAP", "CURVE", "DODO"];
        for (i, dex) in dexes.iter().enumerate() {
            let price = 1800.0 + (i as f64) * 17.0;
            let liquidity = 150_000.0 * (i as f64 + 1.0);
            quotes.push(quote("ETH-USDT", dex, "BSC", price, liquidity));
            quotes.push(quote("ETH-USDT", dex, "POLYGON", price * 1.01, 0.0));
        }

        let opps = detector.detect(&quotes);
        assert!(!opps.is_empty());
        for opp in &opps {
            assert!(opp.estimated_profit_usd > 0.0);
            assert!(opp.loan_amount_usd >= sizing.min_loan_usd);
            assert!(opp.loan_amount_usd <= sizing.max_loan_usd);
            if let Some(min_liq) = opp.min_liquidity_usd() {
                assert!(opp.loan_amount_usd <= min_liq * 0.01 + 1e-9);
            }
            assert!(opp.sell_price > opp.buy_price);
        }
    }
}
