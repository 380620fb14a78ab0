//! Execution Coordinator
//!
//! Admission control for flash-loan executions. Every execution holds a
//! semaphore permit for its whole lifetime (including the inter-dispatch
//! delay), so at most `max_concurrent` trades are ever in flight. The permit
//! is taken before the task is spawned: once the cap is reached `dispatch`
//! suspends its caller until a slot frees. Dispatched executions are tracked
//! in a JoinSet so shutdown can drain them.
//!
//! Outcome routing:
//! - success: realized profit to the allocator, medium alert at >= 2x threshold
//! - failure: gas loss to the allocator, high alert if the estimate was >= 5x threshold
//! - service error: high alert
//!
//! Failed executions are never retried.

use super::detector::LoanSizing;
use super::executor::ExecutionService;
use crate::alerts::NotificationSink;
use crate::capital::CapitalAllocator;
use crate::config::BotConfig;
use crate::errors::ExecutionErrorKind;
use crate::types::{AlertPriority, ExecutionOutcome, Opportunity};
use futures::FutureExt;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub max_concurrent: usize,
    pub execution_interval: Duration,
    pub execution_timeout: Duration,
    pub min_profit_threshold_usd: f64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            execution_interval: Duration::from_millis(500),
            execution_timeout: Duration::from_secs(90),
            min_profit_threshold_usd: 10.0,
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            max_concurrent: config.trading.max_concurrent_executions.max(1),
            execution_interval: Duration::from_millis(config.trading.execution_interval_ms),
            execution_timeout: Duration::from_secs(config.trading.execution_timeout_secs),
            min_profit_threshold_usd: config.trading.min_profit_threshold_usd,
        }
    }
}

/// Execution counters
#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
}

struct Inner {
    service: Arc<dyn ExecutionService>,
    allocator: Arc<CapitalAllocator>,
    notifier: Arc<dyn NotificationSink>,
    sizing: LoanSizing,
    settings: CoordinatorSettings,
    permits: Arc<Semaphore>,
    counters: Counters,
}

pub struct ExecutionCoordinator {
    inner: Arc<Inner>,
    tasks: Mutex<JoinSet<ExecutionOutcome>>,
}

impl ExecutionCoordinator {
    pub fn new(
        service: Arc<dyn ExecutionService>,
        allocator: Arc<CapitalAllocator>,
        notifier: Arc<dyn NotificationSink>,
        sizing: LoanSizing,
        settings: CoordinatorSettings,
    ) -> Self {
        let max_concurrent = settings.max_concurrent.max(1);
        info!(
            "Execution coordinator via {} service, max {} concurrent",
            service.name(),
            max_concurrent
        );
        Self {
            inner: Arc::new(Inner {
                service,
                allocator,
                notifier,
                sizing,
                settings,
                permits: Arc::new(Semaphore::new(max_concurrent)),
                counters: Counters::default(),
            }),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Wait for a free execution slot, then spawn the execution holding it
    pub async fn dispatch(&self, opportunity: Opportunity) {
        let Some(permit) = self.inner.acquire().await else {
            warn!("Coordinator closed, dropping {}", opportunity.reference());
            return;
        };
        self.inner.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);

        let mut tasks = self.tasks.lock().await;
        // Reap finished executions so the set stays small
        while let Some(Some(result)) = tasks.join_next().now_or_never() {
            if let Err(e) = result {
                error!("Execution task failed: {}", e);
            }
        }
        tasks.spawn(async move { inner.execute(permit, opportunity).await });
    }

    /// Run one execution in the caller's task, waiting for a permit first
    pub async fn execute(&self, opportunity: Opportunity) -> ExecutionOutcome {
        let Some(permit) = self.inner.acquire().await else {
            return ExecutionOutcome::failed(
                opportunity.reference(),
                ExecutionErrorKind::Rejected,
                "coordinator closed",
            );
        };
        self.inner.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        self.inner.execute(permit, opportunity).await
    }

    /// Executions currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.inner.settings.max_concurrent.max(1) - self.inner.permits.available_permits()
    }

    /// Dispatched executions not yet joined
    pub async fn pending(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub fn stats(&self) -> ExecutionStats {
        let c = &self.inner.counters;
        ExecutionStats {
            dispatched: c.dispatched.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
        }
    }

    /// Wait for every dispatched execution to finish
    pub async fn drain(&self) -> Vec<ExecutionOutcome> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            info!("Waiting for {} in-flight executions", tasks.len());
        }

        let mut outcomes = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("Execution task failed: {}", e),
            }
        }
        outcomes
    }
}

impl Inner {
    /// Execution slot; `None` only if the semaphore was closed
    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).acquire_owned().await.ok()
    }

    async fn execute(&self, _permit: OwnedSemaphorePermit, opportunity: Opportunity) -> ExecutionOutcome {
        info!(
            "Executing arbitrage for {}: {} -> {} on {}, expected profit ${:.2}",
            opportunity.token_pair,
            opportunity.buy_dex,
            opportunity.sell_dex,
            opportunity.network,
            opportunity.estimated_profit_usd
        );

        let outcome = self.run(&opportunity).await;
        self.route_outcome(&opportunity, &outcome).await;

        // Throttle submissions while still holding the permit
        tokio::time::sleep(self.settings.execution_interval).await;
        outcome
    }

    fn resolve_loan_amount(&self, opportunity: &Opportunity) -> Option<f64> {
        if opportunity.loan_amount_usd.is_finite() && opportunity.loan_amount_usd > 0.0 {
            return Some(opportunity.loan_amount_usd);
        }
        self.sizing
            .determine_loan_amount(opportunity.buy_liquidity_usd, opportunity.sell_liquidity_usd)
    }

    async fn run(&self, opportunity: &Opportunity) -> ExecutionOutcome {
        let reference = opportunity.reference();

        let Some(amount) = self.resolve_loan_amount(opportunity) else {
            return ExecutionOutcome::failed(reference, ExecutionErrorKind::Rejected, "no valid loan amount");
        };

        let allocation = self.allocator.allocation_for_opportunity(opportunity).await;
        if allocation <= 0.0 {
            return ExecutionOutcome::failed(reference, ExecutionErrorKind::Rejected, "no capital allocated");
        }
        debug!("{}: loan ${:.2}, capital allocation ${:.2}", reference, amount, allocation);

        let request = opportunity.to_request(amount);
        let start = Instant::now();
        let result = tokio::time::timeout(
            self.settings.execution_timeout,
            self.service.execute_flash_loan(&request),
        )
        .await;

        let mut outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!("Error executing arbitrage opportunity {}: {:#}", reference, e);
                self.notify(
                    &format!("Error executing arbitrage: {}", e),
                    AlertPriority::High,
                    json!({ "opportunity": reference, "token_pair": opportunity.token_pair }),
                )
                .await;
                ExecutionOutcome::failed(reference.clone(), ExecutionErrorKind::Internal, format!("{:#}", e))
            }
            Err(_) => {
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                ExecutionOutcome::failed(
                    reference.clone(),
                    ExecutionErrorKind::Timeout,
                    format!("no result after {:?}", self.settings.execution_timeout),
                )
            }
        };
        if outcome.execution_time_ms == 0 {
            outcome.execution_time_ms = start.elapsed().as_millis() as u64;
        }
        outcome.opportunity_ref = reference;
        outcome
    }

    async fn route_outcome(&self, opportunity: &Opportunity, outcome: &ExecutionOutcome) {
        let threshold = self.settings.min_profit_threshold_usd;

        if outcome.success {
            self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
            info!(
                "Arbitrage executed successfully: {}, Profit: ${:.2}",
                outcome.tx_ref.as_deref().unwrap_or("-"),
                outcome.realized_profit_usd
            );

            if outcome.realized_profit_usd >= threshold * 2.0 {
                self.notify(
                    &format!(
                        "Profitable arbitrage executed!\nToken: {}\nRoute: {} -> {}\nProfit: ${:.2}\nTransaction: {}",
                        opportunity.token_pair,
                        opportunity.buy_dex,
                        opportunity.sell_dex,
                        outcome.realized_profit_usd,
                        outcome.tx_ref.as_deref().unwrap_or("-")
                    ),
                    AlertPriority::Medium,
                    json!({
                        "token_pair": opportunity.token_pair,
                        "network": opportunity.network,
                        "profit_usd": outcome.realized_profit_usd,
                        "tx_ref": outcome.tx_ref,
                    }),
                )
                .await;
            }

            if outcome.realized_profit_usd > 0.0 {
                self.allocator.update_capital(outcome.realized_profit_usd).await;
            } else if outcome.realized_profit_usd < 0.0 {
                self.allocator.record_loss(-outcome.realized_profit_usd).await;
            }
            return;
        }

        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        let error = outcome.error_message();
        warn!(
            "Arbitrage execution failed for {}: {} (tx: {})",
            opportunity.token_pair,
            error,
            outcome.tx_ref.as_deref().unwrap_or("none")
        );

        if outcome.gas_cost_usd > 0.0 {
            self.allocator.record_loss(outcome.gas_cost_usd).await;
        }

        if outcome.error_kind.is_some_and(|kind| kind.needs_reconciliation()) {
            if let Some(tx_ref) = &outcome.tx_ref {
                warn!("Transaction {} has unknown final state, reconcile manually", tx_ref);
            }
        }

        // Service errors were already alerted when they happened
        let already_alerted = outcome.error_kind == Some(ExecutionErrorKind::Internal);
        if !already_alerted && opportunity.estimated_profit_usd >= threshold * 5.0 {
            self.notify(
                &format!(
                    "High-value arbitrage failed!\nToken: {}\nRoute: {} -> {}\nExpected profit: ${:.2}\nError: {}",
                    opportunity.token_pair,
                    opportunity.buy_dex,
                    opportunity.sell_dex,
                    opportunity.estimated_profit_usd,
                    error
                ),
                AlertPriority::High,
                json!({
                    "token_pair": opportunity.token_pair,
                    "network": opportunity.network,
                    "expected_profit_usd": opportunity.estimated_profit_usd,
                    "error_kind": outcome.error_kind,
                    "tx_ref": outcome.tx_ref,
                }),
            )
            .await;
        }
    }

    async fn notify(&self, message: &str, priority: AlertPriority, details: serde_json::Value) {
        if !self.notifier.send_alert(message, priority, Some(details)).await {
            warn!("Alert delivery failed ({} priority)", priority);
        }
    }
}
