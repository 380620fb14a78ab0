//! Capital Allocator (reinvestment)
//!
//! Owns the capital state behind an async mutex so concurrent execution
//! outcomes update it one at a time. Realized profit grows capital and feeds
//! a rolling-ROI policy that scales the per-trade allocation within [5, 50]%.

use super::state::{round2, CapitalState, CapitalSummary, ROI_WINDOW};
use super::store::StateStore;
use crate::config::{CapitalConfig, MAX_ALLOCATION_PER_TRADE_PERCENT, MIN_ALLOCATION_PER_TRADE_PERCENT};
use crate::types::Opportunity;
use chrono::Utc;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Factor applied to the per-trade allocation after a losing window
const ALLOCATION_DECREASE_FACTOR: f64 = 0.8;

/// Policy knobs that are not part of the persisted state
#[derive(Debug, Clone, Copy)]
pub struct AllocationPolicy {
    pub max_allocation_percent: f64,
    pub allocation_increase_threshold_percent: f64,
}

pub struct CapitalAllocator {
    state: Mutex<CapitalState>,
    policy: AllocationPolicy,
    store: Option<Arc<dyn StateStore>>,
}

impl CapitalAllocator {
    pub fn new(state: CapitalState, policy: AllocationPolicy, store: Option<Arc<dyn StateStore>>) -> Self {
        Self {
            state: Mutex::new(state),
            policy,
            store,
        }
    }

    /// Start from the persisted state, or from config defaults if there is
    /// none or it cannot be read
    pub fn load_or_default(config: &CapitalConfig, store: Option<Arc<dyn StateStore>>) -> Self {
        let mut state = CapitalState::new(
            config.initial_capital_usd,
            config.max_allocation_per_trade_percent,
            config.min_reserve_percent,
            config.max_pool_impact_percent,
        );

        if let Some(store) = &store {
            match store.load() {
                Ok(Some(saved)) => {
                    info!(
                        "Loaded capital state: Capital=${:.2}, Total Profit=${:.2}",
                        saved.current_capital_usd, saved.total_profit_usd
                    );
                    state = saved;
                    // Reserve and impact limits always follow the current config
                    state.min_reserve_percent = config.min_reserve_percent;
                    state.max_pool_impact_percent = config.max_pool_impact_percent;
                    state.max_allocation_per_trade_percent = state
                        .max_allocation_per_trade_percent
                        .clamp(MIN_ALLOCATION_PER_TRADE_PERCENT, MAX_ALLOCATION_PER_TRADE_PERCENT);
                }
                Ok(None) => info!("No saved capital state, starting with ${:.2}", config.initial_capital_usd),
                Err(e) => error!("Error loading capital state, using defaults: {}", e),
            }
        }

        let policy = AllocationPolicy {
            max_allocation_percent: config.max_allocation_percent,
            allocation_increase_threshold_percent: config.allocation_increase_threshold_percent,
        };
        Self::new(state, policy, store)
    }

    fn persist(&self, state: &CapitalState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(state) {
                error!("Error saving capital state: {}", e);
            }
        }
    }

    /// Record realized profit. Non-positive amounts are ignored.
    pub async fn update_capital(&self, profit_usd: f64) {
        if profit_usd <= 0.0 || !profit_usd.is_finite() {
            return;
        }

        let mut state = self.state.lock().await;
        let now = Utc::now();
        state.total_profit_usd += profit_usd;
        state.current_capital_usd += profit_usd;
        state.push_profit(profit_usd, now);
        state.last_updated = now;

        info!(
            "Capital updated: +${:.2}, Total: ${:.2}",
            profit_usd, state.current_capital_usd
        );

        self.adjust_allocation_locked(&mut state);
        self.persist(&state);
    }

    /// Record a realized loss: capital drops by exactly `loss_usd`, never
    /// below zero. Profit totals and history are untouched.
    pub async fn record_loss(&self, loss_usd: f64) {
        if loss_usd <= 0.0 || !loss_usd.is_finite() {
            return;
        }

        let mut state = self.state.lock().await;
        state.current_capital_usd = (state.current_capital_usd - loss_usd).max(0.0);
        state.last_updated = Utc::now();
        warn!(
            "Capital reduced: -${:.2}, Total: ${:.2}",
            loss_usd, state.current_capital_usd
        );
        self.persist(&state);
    }

    /// Re-run the ROI policy against the current state
    pub async fn adjust_allocation(&self) {
        let mut state = self.state.lock().await;
        self.adjust_allocation_locked(&mut state);
    }

    fn adjust_allocation_locked(&self, state: &mut CapitalState) {
        let recent_profit = state.recent_profit(ROI_WINDOW);
        let roi_percent = recent_profit / (state.current_capital_usd - recent_profit).max(1.0) * 100.0;
        debug!("Recent performance: ${:.2}, ROI: {:.2}%", recent_profit, roi_percent);

        let current = state.max_allocation_per_trade_percent;
        let adjusted = if roi_percent > self.policy.allocation_increase_threshold_percent {
            (current * (1.0 + roi_percent / 100.0)).min(MAX_ALLOCATION_PER_TRADE_PERCENT)
        } else if roi_percent < 0.0 {
            (current * ALLOCATION_DECREASE_FACTOR).max(MIN_ALLOCATION_PER_TRADE_PERCENT)
        } else {
            current
        };
        let adjusted = adjusted.clamp(MIN_ALLOCATION_PER_TRADE_PERCENT, MAX_ALLOCATION_PER_TRADE_PERCENT);

        if adjusted != current {
            info!(
                "Max allocation per trade {:.2}% -> {:.2}% (ROI {:.2}%)",
                current, adjusted, roi_percent
            );
        }
        state.max_allocation_per_trade_percent = adjusted;
    }

    /// Capital to commit to an opportunity, in USD rounded to cents
    pub async fn allocation_for_opportunity(&self, opportunity: &Opportunity) -> f64 {
        let state = self.state.lock().await;

        let base = state.current_capital_usd * state.max_allocation_per_trade_percent / 100.0;
        let available = state.current_capital_usd * (1.0 - state.min_reserve_percent / 100.0);
        let base = base.min(available).max(0.0);

        let confidence = if opportunity.confidence.is_finite() {
            opportunity.confidence
        } else {
            Opportunity::DEFAULT_CONFIDENCE
        };
        let profit_factor = (opportunity.estimated_profit_usd / 100.0).min(5.0);
        let mut allocation = base * confidence * (1.0 + profit_factor / 10.0);

        if let Some(liquidity) = opportunity.min_liquidity_usd() {
            allocation = allocation.min(liquidity * state.max_pool_impact_percent / 100.0);
        }

        let rounded = round2(allocation.max(0.0));
        debug!("Allocation for {}: ${:.2}", opportunity.token_pair, rounded);
        rounded
    }

    pub async fn capital_summary(&self) -> CapitalSummary {
        self.state.lock().await.summary_at(Utc::now())
    }

    /// Consistent copy of the current state
    pub async fn snapshot(&self) -> CapitalState {
        self.state.lock().await.clone()
    }

    /// Split the deployable share of capital evenly over every NETWORK_DEX node
    pub async fn redistribute_capital(&self, networks: &[String], dexes: &[String]) -> BTreeMap<String, f64> {
        let total_nodes = networks.len() * dexes.len();
        if total_nodes == 0 {
            return BTreeMap::new();
        }

        let current = self.state.lock().await.current_capital_usd;
        let available = current * self.policy.max_allocation_percent / 100.0;
        let per_node = Decimal::from_f64(available / total_nodes as f64)
            .map(|d| d.round_dp(2))
            .and_then(|d| d.to_f64())
            .unwrap_or(0.0);

        let mut allocations = BTreeMap::new();
        for network in networks {
            for dex in dexes {
                allocations.insert(format!("{}_{}", network, dex), per_node);
            }
        }
        allocations
    }
}
