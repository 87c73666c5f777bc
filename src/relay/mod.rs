pub mod commands;
pub mod registry;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::platform::{ChatClient, Event, EventKind, PollError};
use crate::webhook::ForwardingBridge;

use self::commands::{Command, StatusInfo};
use self::registry::{ActiveChatEntry, ChatRegistry};

pub struct RelaySettings {
    /// Pause after every successful poll.
    pub idle_pause: Duration,
    /// Pause after a failed poll.
    pub error_backoff: Duration,
    pub api_url: String,
    pub environment: String,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            idle_pause: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            api_url: config.vkteams.api_url.clone(),
            environment: config.general.environment.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Processed(usize),
    Empty,
    Failed,
    /// Stop was requested while the poll was in flight; the batch was discarded.
    Stopped,
}

/// Owns the poll cursor and the active-chat registry and drives the
/// fetch -> process -> fetch loop.
pub struct RelayEngine {
    client: Arc<dyn ChatClient>,
    bridge: Arc<ForwardingBridge>,
    registry: ChatRegistry,
    last_event_id: AtomicI64,
    stop_tx: watch::Sender<bool>,
    settings: RelaySettings,
}

impl RelayEngine {
    pub fn new(
        client: Arc<dyn ChatClient>,
        bridge: Arc<ForwardingBridge>,
        settings: RelaySettings,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            client,
            bridge,
            registry: ChatRegistry::new(),
            last_event_id: AtomicI64::new(0),
            stop_tx,
            settings,
        }
    }

    pub fn client(&self) -> &Arc<dyn ChatClient> {
        &self.client
    }

    pub fn last_event_id(&self) -> i64 {
        self.last_event_id.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !*self.stop_tx.borrow()
    }

    /// Request the loop to exit. Takes effect at the next loop check; an
    /// in-flight poll is not interrupted.
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            info!("Relay stop requested");
        }
    }

    pub async fn active_chats(&self) -> HashMap<String, ActiveChatEntry> {
        self.registry.snapshot().await
    }

    pub async fn active_chat_count(&self) -> usize {
        self.registry.len().await
    }

    pub async fn is_known_chat(&self, chat_id: &str) -> bool {
        self.registry.contains(chat_id).await
    }

    /// Long-poll until stopped. Poll failures are never fatal.
    pub async fn run(self: Arc<Self>) {
        info!("Long polling started");

        while self.is_running() {
            let pause = match self.poll_once().await {
                PollOutcome::Stopped => break,
                PollOutcome::Failed => self.settings.error_backoff,
                PollOutcome::Processed(count) => {
                    debug!("Processed {} event(s)", count);
                    self.settings.idle_pause
                }
                PollOutcome::Empty => self.settings.idle_pause,
            };
            self.pause(pause).await;
        }

        info!(last_event_id = self.last_event_id(), "Long polling stopped");
    }

    /// Sleep for `duration`, returning early if stop is requested.
    async fn pause(&self, duration: Duration) {
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = stop_rx.wait_for(|stopped| *stopped) => {}
        }
    }

    /// One fetch followed by full processing of the returned batch.
    pub async fn poll_once(&self) -> PollOutcome {
        let result = self.client.fetch_events(self.last_event_id()).await;

        if !self.is_running() {
            debug!("Stop requested during poll, discarding result");
            return PollOutcome::Stopped;
        }

        match result {
            Ok(events) if events.is_empty() => PollOutcome::Empty,
            Ok(events) => {
                self.process_batch(&events).await;
                PollOutcome::Processed(events.len())
            }
            Err(PollError::Timeout) => {
                debug!("Long poll timed out");
                PollOutcome::Failed
            }
            Err(e) => {
                warn!("Polling failed: {}", e);
                PollOutcome::Failed
            }
        }
    }

    /// Process events in order. A failing event is logged and skipped.
    pub async fn process_batch(&self, events: &[Event]) {
        for event in events {
            match AssertUnwindSafe(self.process_event(event))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Failed to process event {}: {:#}", event.event_id, e),
                Err(_) => error!("Processing event {} panicked", event.event_id),
            }
        }
    }

    async fn process_event(&self, event: &Event) -> Result<()> {
        debug!(
            event_id = event.event_id,
            event_type = %event.event_type,
            payload = %event.raw_payload,
            "Processing event"
        );

        self.last_event_id
            .fetch_max(event.event_id, Ordering::SeqCst);

        if !event.chat_id.is_empty() {
            self.registry
                .record(&event.chat_id, &event.sender_name, &event.sender_id)
                .await;
        }

        self.bridge.forward(event).await;

        match &event.kind {
            EventKind::NewMessage => self.handle_message(event).await,
            EventKind::CallbackQuery => self.handle_callback(event).await,
            EventKind::Other(kind) => {
                debug!("Skipping event of type {}", kind);
                Ok(())
            }
        }
    }

    async fn handle_message(&self, event: &Event) -> Result<()> {
        info!(
            "Message from {} in chat {}: {}",
            event.sender_name, event.chat_id, event.text
        );

        let reply = match Command::parse(&event.text) {
            Command::Ignore => return Ok(()),
            Command::Start => commands::WELCOME_TEXT.to_string(),
            Command::Help => commands::HELP_TEXT.to_string(),
            Command::Status => commands::status_text(&StatusInfo {
                active_chats: self.registry.len().await,
                api_url: &self.settings.api_url,
                webhook_configured: self.bridge.is_configured(),
                environment: &self.settings.environment,
            }),
            Command::Echo(text) => commands::echo_text(text),
        };

        self.reply(event, &reply).await
    }

    async fn handle_callback(&self, event: &Event) -> Result<()> {
        let data = event.callback_data.as_deref().unwrap_or_default();
        info!(
            "Button pressed by {} in chat {}: {}",
            event.sender_name, event.chat_id, data
        );
        self.reply(event, &commands::callback_ack_text(data)).await
    }

    async fn reply(&self, event: &Event, text: &str) -> Result<()> {
        if event.chat_id.is_empty() {
            bail!("{} event has no chat id", event.event_type);
        }
        if !self.client.send_message(&event.chat_id, text, None).await {
            warn!("Reply to chat {} was not delivered", event.chat_id);
        }
        Ok(())
    }
}
