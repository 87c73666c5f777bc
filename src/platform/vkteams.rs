use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::platform::{ChatClient, Event, KeyboardMarkup, PollError};

/// Extra time on top of `pollTime` before a long-poll request is abandoned.
const POLL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct EventsEnvelope {
    #[serde(default)]
    events: Vec<Value>,
}

/// Client for the VK Teams Bot API (`/events/get`, `/messages/sendText`).
pub struct VkTeamsClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
    poll_time: u64,
    poll_grace: Duration,
    send_timeout: Duration,
}

fn transport_error(e: reqwest::Error) -> PollError {
    if e.is_timeout() {
        PollError::Timeout
    } else {
        PollError::Http(e)
    }
}

/// Log helper: first `max` chars of a message.
fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

impl VkTeamsClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.vkteams.api_url.clone(),
            token: config.vkteams.bot_token.clone(),
            poll_time: config.vkteams.poll_time,
            poll_grace: POLL_GRACE,
            send_timeout: config.webhook_timeout(),
        }
    }

    #[cfg(test)]
    fn with_poll_grace(mut self, grace: Duration) -> Self {
        self.poll_grace = grace;
        self
    }

    fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_time) + self.poll_grace
    }

    async fn post_text(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&KeyboardMarkup>,
    ) -> Result<bool, reqwest::Error> {
        let mut form: Vec<(&str, String)> = vec![
            ("token", self.token.clone()),
            ("chatId", chat_id.to_string()),
            ("text", text.to_string()),
        ];

        if let Some(markup) = keyboard {
            let rows = match markup.form_value() {
                Ok(rows) => rows,
                Err(e) => {
                    error!("Invalid keyboard markup for chat {}: {}", chat_id, e);
                    return Ok(false);
                }
            };
            if let Some(rows) = rows {
                form.push(("inlineKeyboardMarkup", rows));
            }
        }

        debug!("Sending message to {}: {}", chat_id, preview(text, 50));

        let response = self
            .client
            .post(format!("{}/messages/sendText", self.api_url))
            .form(&form)
            .timeout(self.send_timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!("sendText response: status {}, body {}", status, preview(&body, 500));

        if status != reqwest::StatusCode::OK {
            error!("sendText failed for chat {}: status {}, body {}", chat_id, status, body);
            return Ok(false);
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(parsed) => {
                if parsed.get("ok").and_then(Value::as_bool).unwrap_or(false) {
                    info!("Message delivered to chat {}", chat_id);
                    Ok(true)
                } else {
                    error!("sendText rejected for chat {}: {}", chat_id, parsed);
                    Ok(false)
                }
            }
            Err(_) => {
                warn!("sendText returned non-JSON body: {}", preview(&body, 200));
                info!("Message delivered to chat {} (status 200)", chat_id);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl ChatClient for VkTeamsClient {
    async fn fetch_events(&self, last_event_id: i64) -> Result<Vec<Event>, PollError> {
        let url = format!("{}/events/get", self.api_url);
        debug!("Polling {} (lastEventId={})", url, last_event_id);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("token", self.token.clone()),
                ("lastEventId", last_event_id.to_string()),
                ("pollTime", self.poll_time.to_string()),
            ])
            .timeout(self.poll_timeout())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if status != reqwest::StatusCode::OK {
            return Err(PollError::Status {
                status: status.as_u16(),
                body: preview(&body, 500),
            });
        }

        let envelope: EventsEnvelope = serde_json::from_str(&body)?;

        let events = envelope
            .events
            .iter()
            .filter_map(|raw| match Event::from_value(raw) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Dropping undecodable event: {} ({})", e, preview(&raw.to_string(), 200));
                    None
                }
            })
            .collect::<Vec<_>>();

        debug!("Received {} event(s)", events.len());
        Ok(events)
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&KeyboardMarkup>,
    ) -> bool {
        match self.post_text(chat_id, text, keyboard).await {
            Ok(delivered) => delivered,
            Err(e) => {
                error!("sendText to chat {} failed: {}", chat_id, e);
                false
            }
        }
    }
}
