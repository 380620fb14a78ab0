//! Price Feed Module
//!
//! Quote sources, per-source rate limiting, the quote cache and the
//! aggregator that polls them.

pub mod aggregator;
pub mod cache;
pub mod rate_limiter;
pub mod source;

pub use aggregator::{FeedSettings, PriceFeedAggregator};
pub use cache::QuoteCache;
pub use rate_limiter::SourceRateLimiter;
pub use source::{build_sources, HttpQuoteSource, QuoteSource, StaticQuoteSource};
