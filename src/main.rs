mod config;
mod gateway;
mod platform;
mod relay;
mod server;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::platform::vkteams::VkTeamsClient;
use crate::relay::{RelayEngine, RelaySettings};
use crate::server::ApiState;
use crate::webhook::ForwardingBridge;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    let debug = std::env::var("DEBUG").is_ok_and(|v| v.eq_ignore_ascii_case("true"));
    let default_filter = if debug {
        "info,vkteams_relay=debug"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    config.log_summary();

    let bridge = Arc::new(ForwardingBridge::new(
        config.webhook.url.clone(),
        config.webhook_timeout(),
    ));
    let client = Arc::new(VkTeamsClient::new(&config));
    let relay = Arc::new(RelayEngine::new(
        client,
        bridge.clone(),
        RelaySettings::from_config(&config),
    ));

    // Long polling runs in the background for the whole process lifetime
    let poller = tokio::spawn(relay.clone().run());
    info!("VK Teams relay started");

    let state = ApiState::new(Arc::new(config), Some(relay.clone()), bridge);
    let served = server::serve(state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    })
    .await;

    relay.stop();
    if let Err(e) = poller.await {
        error!("Polling task ended abnormally: {}", e);
    }
    info!("Relay stopped");

    served
}
