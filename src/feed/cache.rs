//! Quote cache
//!
//! Latest quote per (pair, DEX, network) in a DashMap. Entries are replaced
//! whole, never mutated in place, and removed when their source stops
//! answering.

use crate::types::{Quote, QuoteKey};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct QuoteCache {
    quotes: Arc<DashMap<QuoteKey, Quote>>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the quote for its key
    pub fn upsert(&self, quote: Quote) {
        debug!("Updating quote: {} = {:.6}", quote.key(), quote.price);
        self.quotes.insert(quote.key(), quote);
    }

    /// Drop the quote for a key that no longer answers
    pub fn remove(&self, key: &QuoteKey) -> Option<Quote> {
        self.quotes.remove(key).map(|(_, quote)| quote)
    }

    pub fn get(&self, key: &QuoteKey) -> Option<Quote> {
        self.quotes.get(key).map(|entry| entry.value().clone())
    }

    /// Copy of every cached quote
    pub fn snapshot(&self) -> Vec<Quote> {
        self.quotes.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Quotes for one pair, optionally narrowed to a DEX and/or network
    pub fn for_pair(&self, token_pair: &str, dex: Option<&str>, network: Option<&str>) -> Vec<Quote> {
        self.quotes
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.token_pair == token_pair
                    && dex.map_or(true, |d| key.dex == d)
                    && network.map_or(true, |n| key.network == n)
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::quote;

    #[test]
    fn test_upsert_replaces_by_key() {
        let cache = QuoteCache::new();
        cache.upsert(quote("ETH-USDT", "PANCAKESWAP", "BSC", 1800.0, 1.0));
        cache.upsert(quote("ETH-USDT", "PANCAKESWAP", "BSC", 1805.0, 1.0));
        cache.upsert(quote("ETH-USDT", "PANCAKESWAP", "POLYGON", 1790.0, 1.0));

        assert_eq!(cache.len(), 2);
        let key = QuoteKey::new("ETH-USDT", "PANCAKESWAP", "BSC");
        assert_eq!(cache.get(&key).map(|q| q.price), Some(1805.0));

        assert!(cache.remove(&key).is_some());
        assert!(cache.remove(&key).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_for_pair_filters() {
        let cache = QuoteCache::new();
        cache.upsert(quote("ETH-USDT", "PANCAKESWAP", "BSC", 1800.0, 1.0));
        cache.upsert(quote("ETH-USDT", "SUSHISWAP", "POLYGON", 1801.0, 1.0));
        cache.upsert(quote("WBNB-BUSD", "PANCAKESWAP", "BSC", 300.0, 1.0));

        assert_eq!(cache.for_pair("ETH-USDT", None, None).len(), 2);
        assert_eq!(cache.for_pair("ETH-USDT", Some("SUSHISWAP"), None).len(), 1);
        assert_eq!(cache.for_pair("ETH-USDT", None, Some("BSC")).len(), 1);
        assert!(cache.for_pair("ETH-USDT", Some("SUSHISWAP"), Some("BSC")).is_empty());
        assert_eq!(cache.snapshot().len(), 3);
    }
}
