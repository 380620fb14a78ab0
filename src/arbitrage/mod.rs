//! Arbitrage Module
//!
//! Fee-aware opportunity detection, scoring, ranking and bounded-concurrency
//! execution of flash-loan arbitrage.

pub mod coordinator;
pub mod detector;
pub mod executor;
pub mod fees;
pub mod ranker;
pub mod scorer;

pub use coordinator::{CoordinatorSettings, ExecutionCoordinator, ExecutionStats};
pub use detector::{LoanSizing, OpportunityDetector};
pub use executor::{ExecutionService, SimulatedExecutionService};
pub use fees::{FeeModel, GasModel};
pub use ranker::FilterRanker;
pub use scorer::{OpportunityScorer, ScoringStage};
