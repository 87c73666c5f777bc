use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub vkteams: VkTeamsConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VkTeamsConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Long-poll duration in seconds, passed upstream as `pollTime`.
    #[serde(default = "default_poll_time")]
    pub poll_time: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Automation endpoint receiving forwarded events. Forwarding is off when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for VkTeamsConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: default_api_url(),
            poll_time: default_poll_time(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_webhook_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.internal.myteam.mail.ru/bot/v1".to_string()
}

fn default_poll_time() -> u64 {
    30
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_environment() -> String {
    "development".to_string()
}

impl Config {
    /// Load `path` if it exists, apply environment overrides, then validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            info!(
                "Config file {} not found, using defaults and environment",
                path.display()
            );
            Config::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    /// Override file values with environment variables, looked up through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("VK_TEAMS_BOT_TOKEN") {
            self.vkteams.bot_token = val;
        }
        if let Some(val) = lookup("VK_TEAMS_API_URL") {
            self.vkteams.api_url = val;
        }
        if let Some(val) = lookup("POLL_TIME") {
            self.vkteams.poll_time = val
                .trim()
                .parse()
                .with_context(|| format!("POLL_TIME must be a number of seconds, got: {}", val))?;
        }
        if let Some(val) = lookup("N8N_WEBHOOK_URL") {
            self.webhook.url = Some(val);
        }
        if let Some(val) = lookup("WEBHOOK_TIMEOUT") {
            self.webhook.timeout_secs = val.trim().parse().with_context(|| {
                format!("WEBHOOK_TIMEOUT must be a number of seconds, got: {}", val)
            })?;
        }
        if let Some(val) = lookup("SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(val) = lookup("SERVER_PORT") {
            self.server.port = val
                .trim()
                .parse()
                .with_context(|| format!("SERVER_PORT must be a valid port number, got: {}", val))?;
        }
        if let Some(val) = lookup("ENVIRONMENT") {
            self.general.environment = val;
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.vkteams.api_url = self.vkteams.api_url.trim().trim_end_matches('/').to_string();
        self.webhook.url = self
            .webhook
            .url
            .take()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
    }

    pub fn validate(&self) -> Result<()> {
        if self.vkteams.bot_token.trim().is_empty() {
            anyhow::bail!(
                "vkteams.bot_token is required (set in config.toml or VK_TEAMS_BOT_TOKEN env var)"
            );
        }
        if self.vkteams.api_url.is_empty() {
            anyhow::bail!(
                "vkteams.api_url is required (set in config.toml or VK_TEAMS_API_URL env var)"
            );
        }
        Ok(())
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook.timeout_secs)
    }

    /// Token rendered for logs: first 10 and last 4 characters.
    pub fn masked_token(&self) -> String {
        let chars: Vec<char> = self.vkteams.bot_token.chars().collect();
        let head: String = chars.iter().take(10).collect();
        if chars.len() > 14 {
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        } else {
            format!("{}...(short)", head)
        }
    }

    pub fn log_summary(&self) {
        info!("  Token: {}", self.masked_token());
        info!("  API URL: {}", self.vkteams.api_url);
        match &self.webhook.url {
            Some(url) => info!("  Webhook: {}", url),
            None => info!("  Webhook: not configured"),
        }
        info!("  Poll time: {}s", self.vkteams.poll_time);
        info!("  HTTP: {}:{}", self.server.host, self.server.port);
        info!("  Environment: {}", self.general.environment);
    }
}
