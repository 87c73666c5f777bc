pub mod vkteams;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Event types the relay reacts to. Anything else is carried as `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    NewMessage,
    CallbackQuery,
    Other(String),
}

impl EventKind {
    fn from_wire(event_type: &str) -> Self {
        match event_type {
            "newMessage" => EventKind::NewMessage,
            "callbackQuery" => EventKind::CallbackQuery,
            other => EventKind::Other(other.to_string()),
        }
    }
}

/// A single event received from the chat platform's long-poll endpoint.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_id: i64,
    pub kind: EventKind,
    /// Type string as sent upstream, `new_message` when absent.
    pub event_type: String,
    /// Empty when the event carries no chat.
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp: i64,
    pub msg_id: String,
    pub callback_data: Option<String>,
    pub raw_payload: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("event is not a JSON object")]
    NotAnObject,
    #[error("eventId is not an integer: {0}")]
    BadEventId(Value),
}

/// Read a scalar as text; ids arrive as strings or numbers depending on the server.
fn text_at(value: &Value, pointer: &str) -> String {
    match value.pointer(pointer) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

impl Event {
    /// Decode one entry of the `events` array. Missing payload fields become
    /// empty values; only a non-object entry or a non-integer `eventId` fails.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

        let event_id = match obj.get("eventId") {
            None | Some(Value::Null) => 0,
            Some(v) => v.as_i64().ok_or_else(|| DecodeError::BadEventId(v.clone()))?,
        };

        let event_type = obj
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("new_message")
            .to_string();
        let kind = EventKind::from_wire(&event_type);

        let payload = obj.get("payload").cloned().unwrap_or(Value::Null);

        let chat_id = match kind {
            EventKind::CallbackQuery => text_at(&payload, "/message/chat/chatId"),
            _ => text_at(&payload, "/chat/chatId"),
        };

        let first = text_at(&payload, "/from/firstName");
        let last = text_at(&payload, "/from/lastName");
        let sender_name = format!("{} {}", first, last).trim().to_string();

        let callback_data = match payload.get("callbackData") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        Ok(Self {
            event_id,
            kind,
            event_type,
            chat_id,
            sender_id: text_at(&payload, "/from/userId"),
            sender_name,
            text: text_at(&payload, "/text"),
            timestamp: payload.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
            msg_id: text_at(&payload, "/msgId"),
            callback_data,
            raw_payload: payload,
        })
    }
}

/// One inline keyboard button as the platform expects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardButton {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

/// Keyboard markup supplied by webhook callers:
/// `{"inlineKeyboard": [[{"text": "...", "callbackData": "..."}]]}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardMarkup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_keyboard: Option<Vec<Vec<KeyboardButton>>>,
}

impl KeyboardMarkup {
    /// Accepts the markup object itself or a string holding its JSON.
    pub fn parse(value: &Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::String(s) => serde_json::from_str(s),
            other => Self::deserialize(other),
        }
    }

    /// JSON-encoded rows for the `inlineKeyboardMarkup` form field.
    pub fn form_value(&self) -> Result<Option<String>, serde_json::Error> {
        self.inline_keyboard
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
    }
}

/// Serde adapter for optional keyboard fields: null or absent is `None`,
/// anything else must decode via [`KeyboardMarkup::parse`].
pub fn deserialize_keyboard<'de, D>(deserializer: D) -> Result<Option<KeyboardMarkup>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => KeyboardMarkup::parse(&value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Why a long-poll request produced no batch. Never carries partial data.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("long poll timed out")]
    Timeout,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed events response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The remote chat platform as seen by the relay.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Long-poll for events newer than `last_event_id`.
    async fn fetch_events(&self, last_event_id: i64) -> Result<Vec<Event>, PollError>;

    /// Deliver a text message. Failures are logged and reported as `false`.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&KeyboardMarkup>,
    ) -> bool;
}
