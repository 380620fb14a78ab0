//! Alerting
//!
//! [`NotificationSink`] is the best-effort alert channel used by the
//! execution coordinator and the control loop. Sinks never fail the caller:
//! delivery problems are logged and reported as `false`.
//!
//! Every sink keeps a bounded history of recent alerts.

pub mod discord;

pub use discord::DiscordNotifier;

use crate::types::AlertPriority;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Recent alerts kept per sink
pub const DEFAULT_ALERT_HISTORY: usize = 100;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver an alert. Returns whether delivery succeeded.
    async fn send_alert(&self, message: &str, priority: AlertPriority, details: Option<serde_json::Value>) -> bool;

    /// Most recent alerts at or above `min_priority`, newest last
    async fn recent_alerts(&self, limit: usize, min_priority: AlertPriority) -> Vec<AlertRecord>;
}

/// One alert as recorded in history
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub message: String,
    pub priority: AlertPriority,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Bounded alert history, oldest evicted first
#[derive(Debug)]
pub struct AlertHistory {
    capacity: usize,
    entries: Mutex<VecDeque<AlertRecord>>,
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn push(&self, record: AlertRecord) {
        let mut entries = self.entries.lock().await;
        entries.push_back(record);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub async fn recent(&self, limit: usize, min_priority: AlertPriority) -> Vec<AlertRecord> {
        let entries = self.entries.lock().await;
        let matching: Vec<AlertRecord> = entries
            .iter()
            .filter(|a| a.priority >= min_priority)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).collect()
    }
}

/// Log an alert at a level matching its priority
pub(crate) fn log_alert(message: &str, priority: AlertPriority) {
    if priority == AlertPriority::High {
        warn!("ALERT [{}]: {}", priority, message);
    } else {
        info!("ALERT [{}]: {}", priority, message);
    }
}

/// Sink that only logs
#[derive(Debug)]
pub struct LogNotifier {
    history: AlertHistory,
}

impl LogNotifier {
    pub fn new(history_size: usize) -> Self {
        Self {
            history: AlertHistory::new(history_size),
        }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_HISTORY)
    }
}

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send_alert(&self, message: &str, priority: AlertPriority, details: Option<serde_json::Value>) -> bool {
        log_alert(message, priority);
        self.history
            .push(AlertRecord {
                message: message.to_string(),
                priority,
                details,
                timestamp: Utc::now(),
            })
            .await;
        true
    }

    async fn recent_alerts(&self, limit: usize, min_priority: AlertPriority) -> Vec<AlertRecord> {
        self.history.recent(limit, min_priority).await
    }
}
