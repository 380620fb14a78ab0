//! Discord Alerts
//!
//! Sends high-priority alerts to a Discord webhook as an embed. Lower
//! priorities are only logged and recorded in history.
//!
//! Usage:
//!   Set DISCORD_WEBHOOK (or `[alerts] discord_webhook`) to your webhook URL

use super::{log_alert, AlertHistory, AlertRecord, NotificationSink};
use crate::types::AlertPriority;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// Discord webhook message structure
#[derive(Serialize)]
struct DiscordMessage {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

/// Discord embed structure for rich formatting
#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    fields: Vec<DiscordField>,
    footer: Option<DiscordFooter>,
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct DiscordField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Serialize)]
struct DiscordFooter {
    text: String,
}

/// Discord webhook notifier
pub struct DiscordNotifier {
    webhook_url: Option<String>,
    client: reqwest::Client,
    history: AlertHistory,
}

impl DiscordNotifier {
    pub fn new(webhook_url: Option<String>, history_size: usize) -> Self {
        if webhook_url.is_some() {
            info!("Discord alerts enabled");
        } else {
            warn!("No Discord webhook configured - alerts are logged only");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            webhook_url,
            client,
            history: AlertHistory::new(history_size),
        }
    }

    /// Check if Discord delivery is enabled
    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    fn build_message(message: &str, priority: AlertPriority, details: Option<&serde_json::Value>) -> DiscordMessage {
        let color = match priority {
            AlertPriority::High => 0xFF0000,
            AlertPriority::Medium => 0xFFA500,
            AlertPriority::Normal => 0x00FF00,
            AlertPriority::Low => 0x808080,
        };

        // Flat objects become one field per key; anything else is a single block
        let fields = match details {
            Some(serde_json::Value::Object(map)) => map
                .iter()
                .map(|(k, v)| DiscordField {
                    name: k.clone(),
                    value: match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    },
                    inline: true,
                })
                .collect(),
            Some(other) => vec![DiscordField {
                name: "Details".to_string(),
                value: format!("```\n{}\n```", other),
                inline: false,
            }],
            None => Vec::new(),
        };

        DiscordMessage {
            content: None,
            embeds: vec![DiscordEmbed {
                title: format!("{} priority alert", priority.to_string().to_uppercase()),
                description: message.to_string(),
                color,
                fields,
                footer: Some(DiscordFooter {
                    text: "Flash-Loan Arbitrage | BSC / Polygon".to_string(),
                }),
                timestamp: Some(Utc::now().to_rfc3339()),
            }],
        }
    }

    async fn post(&self, webhook_url: &str, body: &DiscordMessage) -> bool {
        match self.client.post(webhook_url).json(body).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Discord alert sent");
                    true
                } else {
                    warn!("Discord webhook returned status: {}", response.status());
                    false
                }
            }
            Err(e) => {
                error!("Failed to send Discord alert: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl NotificationSink for DiscordNotifier {
    async fn send_alert(&self, message: &str, priority: AlertPriority, details: Option<serde_json::Value>) -> bool {
        log_alert(message, priority);

        let delivered = match (&self.webhook_url, priority) {
            (Some(url), AlertPriority::High) => {
                let body = Self::build_message(message, priority, details.as_ref());
                self.post(url, &body).await
            }
            _ => true,
        };

        self.history
            .push(AlertRecord {
                message: message.to_string(),
                priority,
                details,
                timestamp: Utc::now(),
            })
            .await;
        delivered
    }

    async fn recent_alerts(&self, limit: usize, min_priority: AlertPriority) -> Vec<AlertRecord> {
        self.history.recent(limit, min_priority).await
    }
}
