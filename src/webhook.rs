//! Bridge to the external automation webhook (n8n).
//!
//! Outbound: every chat event is normalized and POSTed to the configured URL.
//! Inbound: webhook-originated send requests are validated and counted here
//! before the gateway delivers them to chat.

use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::platform::{deserialize_keyboard, Event, KeyboardMarkup};

/// `source` tag on every forwarded payload.
pub const SOURCE_TAG: &str = "vk_teams";

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct WebhookStats {
    pub sent_count: u64,
    pub received_count: u64,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_received_at: Option<DateTime<Utc>>,
}

/// Stats plus destination, as reported by the status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookStatus {
    pub webhook_configured: bool,
    pub webhook_url: String,
    pub stats: WebhookStats,
}

/// A send request from the automation side. The keyboard is decoded here, so
/// a malformed one rejects the whole request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutboundMessageRequest {
    pub chat_id: String,
    pub message: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(
        default,
        alias = "inline_keyboard_markup",
        deserialize_with = "deserialize_keyboard",
        skip_serializing_if = "Option::is_none"
    )]
    pub keyboard: Option<KeyboardMarkup>,
}

fn default_message_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AcceptanceRecord {
    pub status: String,
    pub chat_id: String,
    pub message: String,
    pub message_type: String,
    pub timestamp: String,
    pub message_length: usize,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("chat_id must not be empty")]
    EmptyChatId,
    #[error("message must not be empty")]
    EmptyMessage,
}

#[derive(Debug, Serialize)]
struct ForwardPayload<'a> {
    timestamp: String,
    source: &'static str,
    event_type: &'a str,
    data: ForwardData<'a>,
}

#[derive(Debug, Serialize)]
struct ForwardData<'a> {
    text: &'a str,
    chat_id: &'a str,
    user_name: &'a str,
    user_id: &'a str,
    timestamp: i64,
    msg_id: &'a str,
    callback_data: Option<&'a str>,
}

fn now_local() -> String {
    Local::now().to_rfc3339()
}

pub struct ForwardingBridge {
    client: reqwest::Client,
    url: Option<String>,
    timeout: Duration,
    stats: Mutex<WebhookStats>,
}

impl ForwardingBridge {
    pub fn new(url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            timeout,
            stats: Mutex::new(WebhookStats::default()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// POST a normalized copy of `event`. Returns `false` without any network
    /// call when no destination is configured.
    pub async fn forward(&self, event: &Event) -> bool {
        let Some(url) = self.url.as_deref() else {
            debug!("Webhook URL not configured, skipping forward");
            return false;
        };

        let payload = ForwardPayload {
            timestamp: now_local(),
            source: SOURCE_TAG,
            event_type: &event.event_type,
            data: ForwardData {
                text: &event.text,
                chat_id: &event.chat_id,
                user_name: &event.sender_name,
                user_id: &event.sender_id,
                timestamp: event.timestamp,
                msg_id: &event.msg_id,
                callback_data: event.callback_data.as_deref(),
            },
        };

        info!("Forwarding event {} to webhook {}", event.event_id, url);

        let result = self
            .client
            .post(url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                let mut stats = self.stats.lock().await;
                stats.sent_count += 1;
                stats.last_sent_at = Some(Utc::now());
                info!("Event {} forwarded", event.event_id);
                true
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(
                    "Webhook returned status {}: {}",
                    status,
                    body.chars().take(200).collect::<String>()
                );
                false
            }
            Err(e) if e.is_timeout() => {
                error!("Webhook request timed out after {:?}", self.timeout);
                false
            }
            Err(e) => {
                error!("Webhook request failed: {}", e);
                false
            }
        }
    }

    /// Validate and count a webhook-originated send request.
    pub async fn accept_inbound(
        &self,
        request: &OutboundMessageRequest,
    ) -> Result<AcceptanceRecord, ValidationError> {
        if request.chat_id.is_empty() {
            return Err(ValidationError::EmptyChatId);
        }
        if request.message.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }

        info!(
            "Inbound webhook message for chat {}: {}",
            request.chat_id,
            request.message.chars().take(50).collect::<String>()
        );

        {
            let mut stats = self.stats.lock().await;
            stats.received_count += 1;
            stats.last_received_at = Some(Utc::now());
        }

        Ok(AcceptanceRecord {
            status: "accepted".to_string(),
            chat_id: request.chat_id.clone(),
            message: request.message.clone(),
            message_type: request.message_type.clone(),
            timestamp: now_local(),
            message_length: request.message.chars().count(),
        })
    }

    pub async fn stats(&self) -> WebhookStats {
        self.stats.lock().await.clone()
    }

    pub async fn status(&self) -> WebhookStatus {
        WebhookStatus {
            webhook_configured: self.is_configured(),
            webhook_url: self
                .url
                .clone()
                .unwrap_or_else(|| "Not configured".to_string()),
            stats: self.stats().await,
        }
    }
}
