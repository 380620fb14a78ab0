//! Per-source rate limiting
//!
//! Each source declares a minimum interval between calls. Callers reserve
//! the next free slot for a source and sleep until it arrives, so concurrent
//! fetches against one source are spaced out rather than bunched.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Default)]
pub struct SourceRateLimiter {
    next_slot: DashMap<String, Instant>,
}

impl SourceRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next call slot for `source_id` and return when it opens
    pub fn reserve(&self, source_id: &str, min_interval: Duration) -> Instant {
        let now = Instant::now();
        let mut entry = self.next_slot.entry(source_id.to_string()).or_insert(now);
        let slot = (*entry).max(now);
        *entry = slot + min_interval;
        slot
    }

    /// Wait until `source_id` may be called again
    pub async fn acquire(&self, source_id: &str, min_interval: Duration) {
        if min_interval.is_zero() {
            return;
        }
        let slot = self.reserve(source_id, min_interval);
        if slot > Instant::now() {
            trace!("Rate limiting {} for {:?}", source_id, slot - Instant::now());
            tokio::time::sleep_until(slot).await;
        }
    }
}
