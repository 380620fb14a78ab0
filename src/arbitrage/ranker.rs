//! Opportunity filter and ranker
//!
//! Drops opportunities under the profit threshold (and under the confidence
//! threshold when a scorer is active), sorts by estimated profit and keeps
//! the top N for dispatch.

use crate::config::BotConfig;
use crate::types::Opportunity;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct FilterRanker {
    pub min_profit_threshold_usd: f64,
    pub confidence_threshold: f64,
    pub top_n: usize,
}

impl Default for FilterRanker {
    fn default() -> Self {
        Self {
            min_profit_threshold_usd: 10.0,
            confidence_threshold: 0.6,
            top_n: 5,
        }
    }
}

impl FilterRanker {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            min_profit_threshold_usd: config.trading.min_profit_threshold_usd,
            confidence_threshold: config.trading.ai_confidence_threshold,
            top_n: config.trading.top_n,
        }
    }

    /// Filter, sort descending by estimated profit, truncate to top N
    pub fn rank(&self, opportunities: Vec<Opportunity>, scorer_active: bool) -> Vec<Opportunity> {
        let total = opportunities.len();
        let mut viable: Vec<Opportunity> = opportunities
            .into_iter()
            .filter(|o| o.estimated_profit_usd >= self.min_profit_threshold_usd)
            .filter(|o| !scorer_active || o.confidence >= self.confidence_threshold)
            .collect();

        viable.sort_by(|a, b| {
            b.estimated_profit_usd
                .partial_cmp(&a.estimated_profit_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        viable.truncate(self.top_n);

        if total > 0 {
            debug!("Ranked {} of {} opportunities", viable.len(), total);
        }
        viable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::opportunity;

    #[test]
    fn test_profit_threshold_and_ordering() {
        let ranker = FilterRanker::default();
        let opps = vec![
            opportunity("A", 12.0),
            opportunity("B", 9.99),
            opportunity("C", 150.0),
            opportunity("D", 10.0),
        ];

        let ranked = ranker.rank(opps, false);
        let pairs: Vec<&str> = ranked.iter().map(|o| o.token_pair.as_str()).collect();
        assert_eq!(pairs, vec!["C", "A", "D"]);
    }

    #[test]
    fn test_truncates_to_top_n() {
        let ranker = FilterRanker::default();
        let opps: Vec<Opportunity> = (0..12).map(|i| opportunity("ETH-USDT", 20.0 + i as f64)).collect();

        let ranked = ranker.rank(opps, false);
        assert_eq!(ranked.len(), 5);
        assert!(ranked.windows(2).all(|w| w[0].estimated_profit_usd >= w[1].estimated_profit_usd));
        assert_eq!(ranked[0].estimated_profit_usd, 31.0);
    }

    #[test]
    fn test_confidence_filter_only_when_scored() {
        let ranker = FilterRanker::default();
        let opps = vec![
            opportunity("LOW", 50.0).with_confidence(0.3),
            opportunity("DEFAULT", 40.0),
            opportunity("HIGH", 30.0).with_confidence(0.9),
        ];

        assert_eq!(ranker.rank(opps.clone(), false).len(), 3);

        let ranked = ranker.rank(opps, true);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].token_pair, "HIGH");
    }
}
