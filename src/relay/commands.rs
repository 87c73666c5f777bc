//! Chat commands understood by the relay and their reply texts.

pub const WELCOME_TEXT: &str = "Hi! I'm a VK Teams bot connected to n8n.\n\
Send me any message and I will:\n\
• echo it back\n\
• forward the event to n8n for processing";

pub const HELP_TEXT: &str = "Available commands:\n\
/start - start working with the bot\n\
/help - show this help\n\
/status - show bot and integration status\n\n\
Send me any message and I'll echo it back and forward it to n8n for further processing.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Start,
    Help,
    Status,
    /// Plain text, answered with an echo.
    Echo(&'a str),
    /// Empty text or an unknown slash command: no reply.
    Ignore,
}

impl<'a> Command<'a> {
    /// Exact-match dispatch; no trimming, no arguments.
    pub fn parse(text: &'a str) -> Self {
        match text {
            "" => Command::Ignore,
            "/start" => Command::Start,
            "/help" => Command::Help,
            "/status" => Command::Status,
            t if t.starts_with('/') => Command::Ignore,
            t => Command::Echo(t),
        }
    }
}

/// Values shown by `/status`.
pub struct StatusInfo<'a> {
    pub active_chats: usize,
    pub api_url: &'a str,
    pub webhook_configured: bool,
    pub environment: &'a str,
}

pub fn status_text(info: &StatusInfo<'_>) -> String {
    format!(
        "Bot status: active\n\
         Active chats: {}\n\
         API URL: {}\n\
         n8n webhook: {}\n\
         Environment: {}",
        info.active_chats,
        info.api_url,
        if info.webhook_configured {
            "configured"
        } else {
            "not configured"
        },
        info.environment
    )
}

pub fn echo_text(text: &str) -> String {
    format!("Echo: {}", text)
}

pub fn callback_ack_text(data: &str) -> String {
    format!("You pressed: {}", data)
}
