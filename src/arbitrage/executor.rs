//! Execution Service
//!
//! [`ExecutionService`] is the seam to the signing/submission layer: it takes
//! a flash-loan request and returns a structured outcome, bounding its own
//! confirmation wait.
//!
//! [`SimulatedExecutionService`] is the dry-run implementation:
//! - Slippage modeling (15% +/- 10% of expected profit, clamped 5-40%)
//! - Per-network gas from the fee model
//! - Short execution delay

use super::fees::FeeModel;
use crate::errors::ExecutionErrorKind;
use crate::types::{ExecutionOutcome, FlashLoanRequest};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Signs, submits and confirms flash-loan arbitrage transactions.
///
/// Implementations must bound their own execution time. An `Err` means the
/// service itself broke (not a reverted trade) and is alerted at high priority.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn execute_flash_loan(&self, request: &FlashLoanRequest) -> Result<ExecutionOutcome>;

    fn name(&self) -> &str;
}

/// Dry-run executor that models realistic trade outcomes
pub struct SimulatedExecutionService {
    fees: FeeModel,
    /// Fixed slippage rate, or `None` for the time-seeded model
    fixed_slippage: Option<f64>,
    latency: Option<Duration>,
    counter: AtomicU64,
}

impl SimulatedExecutionService {
    pub fn new(fees: FeeModel) -> Self {
        Self {
            fees,
            fixed_slippage: None,
            latency: None,
            counter: AtomicU64::new(0),
        }
    }

    /// Deterministic slippage rate (fraction of expected profit)
    pub fn with_fixed_slippage(mut self, rate: f64) -> Self {
        self.fixed_slippage = Some(rate);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn seed() -> f64 {
        Utc::now().timestamp_nanos_opt().unwrap_or(0) as f64
    }

    /// Slippage loss as a share of expected profit
    fn simulate_slippage_loss(&self, expected_profit: f64) -> f64 {
        let rate = match self.fixed_slippage {
            Some(rate) => rate,
            None => {
                let base_slippage = 0.15;
                let variance = 0.10;
                let random_factor = ((Self::seed() % 1000.0) / 1000.0) * variance * 2.0 - variance;
                (base_slippage + random_factor).clamp(0.05, 0.40)
            }
        };
        expected_profit.max(0.0) * rate
    }

    /// 10-50ms unless a fixed latency is set
    async fn simulate_execution_delay(&self) {
        let delay = self.latency.unwrap_or_else(|| {
            let seed = Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
            Duration::from_millis(10 + (seed % 40))
        });
        tokio::time::sleep(delay).await;
    }

    fn next_tx_ref(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("sim-{}-{}", Utc::now().timestamp_millis(), n)
    }
}

#[async_trait]
impl ExecutionService for SimulatedExecutionService {
    async fn execute_flash_loan(&self, request: &FlashLoanRequest) -> Result<ExecutionOutcome> {
        let start = Instant::now();

        if request.amount_usd <= 0.0 {
            return Ok(ExecutionOutcome::failed(
                request.opportunity_ref.clone(),
                ExecutionErrorKind::Rejected,
                format!("invalid loan amount {:.2}", request.amount_usd),
            ));
        }

        let slippage_loss = self.simulate_slippage_loss(request.expected_profit_usd);
        let realized = request.expected_profit_usd - slippage_loss;
        let gas_cost = self.fees.gas_cost_usd(&request.network);

        self.simulate_execution_delay().await;
        let tx_ref = Some(self.next_tx_ref());

        let mut outcome = if realized > 0.0 {
            ExecutionOutcome::succeeded(request.opportunity_ref.clone(), tx_ref, realized, gas_cost)
        } else {
            let mut failed = ExecutionOutcome::failed(
                request.opportunity_ref.clone(),
                ExecutionErrorKind::Reverted,
                "Unprofitable after slippage",
            )
            .with_tx_ref(tx_ref);
            // Reverted transactions still pay gas
            failed.gas_cost_usd = gas_cost;
            failed
        };
        outcome.execution_time_ms = start.elapsed().as_millis() as u64;

        debug!(
            "Simulated {} {} -> {} ${:.0}: slippage ${:.2}",
            request.token_pair, request.source_dex, request.target_dex, request.amount_usd, slippage_loss
        );
        info!(
            "[dry-run] {} {} | realized ${:.2} | gas ${:.2} | {}ms",
            request.token_pair,
            if outcome.success { "executed" } else { "reverted" },
            outcome.realized_profit_usd,
            outcome.gas_cost_usd,
            outcome.execution_time_ms
        );

        Ok(outcome)
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
