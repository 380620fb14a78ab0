//! Flash-Loan DEX Arbitrage Engine
//!
//! Scans DEX quotes across networks for cross-venue price gaps, sizes and
//! ranks fee-aware flash-loan arbitrage opportunities, executes them under a
//! concurrency cap, and reinvests realized profit through an adaptive
//! capital-allocation policy.

pub mod alerts;
pub mod arbitrage;
pub mod capital;
pub mod config;
pub mod control;
pub mod errors;
pub mod feed;
pub mod types;

// Re-export commonly used types
pub use config::{load_config, BotConfig};
pub use control::{ControlLoop, LoopSettings};
pub use errors::{ConfigError, ExecutionErrorKind, QuoteError, StoreError};
pub use types::{AlertPriority, ExecutionOutcome, FlashLoanRequest, Opportunity, PriceData, Quote, QuoteKey};
