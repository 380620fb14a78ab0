//! Opportunity scoring
//!
//! The confidence model lives outside this crate; it plugs in through
//! [`OpportunityScorer`]. Without a scorer every opportunity keeps the
//! default confidence of 0.5 and confidence filtering is disabled.

use crate::types::Opportunity;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// External confidence model
#[async_trait]
pub trait OpportunityScorer: Send + Sync {
    /// Confidence in [0, 1] that the opportunity executes profitably
    async fn score(&self, opportunity: &Opportunity) -> Result<f64>;

    fn name(&self) -> &str {
        "scorer"
    }
}

/// Scoring step of the control loop
#[derive(Clone, Default)]
pub struct ScoringStage {
    scorer: Option<Arc<dyn OpportunityScorer>>,
}

impl ScoringStage {
    pub fn new(scorer: Option<Arc<dyn OpportunityScorer>>) -> Self {
        Self { scorer }
    }

    /// True when confidences carry information and may be filtered on
    pub fn is_active(&self) -> bool {
        self.scorer.is_some()
    }

    /// Attach confidences. A scorer error leaves that opportunity at the default.
    pub async fn score_all(&self, opportunities: Vec<Opportunity>) -> Vec<Opportunity> {
        let Some(scorer) = &self.scorer else {
            return opportunities;
        };

        let mut scored = Vec::with_capacity(opportunities.len());
        for opp in opportunities {
            match scorer.score(&opp).await {
                Ok(confidence) => scored.push(opp.with_confidence(confidence)),
                Err(e) => {
                    warn!("{} failed for {}: {}", scorer.name(), opp.token_pair, e);
                    scored.push(opp.with_confidence(Opportunity::DEFAULT_CONFIDENCE));
                }
            }
        }
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::opportunity;

    struct ProfitScorer;

    #[async_trait]
    impl OpportunityScorer for ProfitScorer {
        async fn score(&self, opportunity: &Opportunity) -> Result<f64> {
            if opportunity.estimated_profit_usd < 0.0 {
                anyhow::bail!("model unavailable");
            }
            Ok(opportunity.estimated_profit_usd / 100.0)
        }
    }

    #[tokio::test]
    async fn test_no_scorer_keeps_default() {
        let stage = ScoringStage::default();
        assert!(!stage.is_active());
        let scored = stage.score_all(vec![opportunity("ETH-USDT", 80.0)]).await;
        assert_eq!(scored[0].confidence, Opportunity::DEFAULT_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_scores_are_clamped_and_errors_default() {
        let stage = ScoringStage::new(Some(Arc::new(ProfitScorer)));
        assert!(stage.is_active());

        let scored = stage
            .score_all(vec![
                opportunity("ETH-USDT", 80.0),
                opportunity("ETH-USDC", 500.0),
                opportunity("WBNB-BUSD", -1.0),
            ])
            .await;
        assert_eq!(scored.len(), 3);
        assert!((scored[0].confidence - 0.8).abs() < 1e-9);
        assert_eq!(scored[1].confidence, 1.0);
        assert_eq!(scored[2].confidence, Opportunity::DEFAULT_CONFIDENCE);
    }
}
