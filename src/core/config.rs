use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use super::broadcaster::DEFAULT_LOG_CAPACITY;
use super::error::BotError;
use super::poll::PollJob;
use super::scheduler::TriggerSpec;
use crate::platform::{NativePlatform, Platform};

pub const CONFIG_FILE_NAME: &str = "pollbot.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Chat the poll is sent to, e.g. `1203630xxxxxxxxx@g.us`.
    pub group_id: String,
    /// `sqlite://<path>` or `memory://`.
    pub session_store: String,
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub api_token: Option<String>,
    pub log_capacity: usize,
    pub reconnect: bool,
    pub poll: PollConfig,
    pub schedule: ScheduleConfig,
    pub bootstrap: BootstrapConfig,
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub name: String,
    pub options: Vec<String>,
    pub allow_multiple_answers: bool,
    /// Prepended to the poll name for test sends.
    pub test_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Local wall-clock time, `HH:MM`.
    pub daily_at: String,
    pub timezone: String,
    /// When set, fire on a fixed interval instead of daily.
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub store_settle_ms: u64,
    pub client_settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            session_store: default_session_store(),
            client_id: "pollbot-session".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_token: None,
            log_capacity: DEFAULT_LOG_CAPACITY,
            reconnect: true,
            poll: PollConfig::default(),
            schedule: ScheduleConfig::default(),
            bootstrap: BootstrapConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            name: "Are you coming today?".to_string(),
            options: vec!["Yes".to_string(), "No".to_string()],
            allow_multiple_answers: false,
            test_prefix: "[TEST] ".to_string(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: "10:00".to_string(),
            timezone: "Asia/Kolkata".to_string(),
            interval_secs: None,
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            store_settle_ms: 2000,
            client_settle_ms: 1000,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: "pollbot-bridge".to_string(),
            args: Vec::new(),
        }
    }
}

fn default_session_store() -> String {
    format!(
        "sqlite://{}",
        NativePlatform::data_dir().join("sessions.db").display()
    )
}

pub fn default_config_path() -> PathBuf {
    NativePlatform::data_dir().join(CONFIG_FILE_NAME)
}

impl BotConfig {
    /// Read `path` (or the default location), then apply `POLLBOT_*`
    /// environment overrides. A missing file means defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path).await?;
            let config: BotConfig = toml::from_str(&content)
                .map_err(|e| BotError::Config(format!("{}: {}", config_path.display(), e)))?;
            info!("Loaded config from {}", config_path.display());
            config
        } else if path.is_some() {
            return Err(BotError::Config(format!(
                "config file {} does not exist",
                config_path.display()
            ))
            .into());
        } else {
            info!("No {} found, using defaults.", CONFIG_FILE_NAME);
            BotConfig::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Unparseable numeric values are rejected rather than skipped.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), BotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("POLLBOT_GROUP_ID") {
            self.group_id = v;
        }
        if let Some(v) = get("POLLBOT_SESSION_STORE") {
            self.session_store = v;
        }
        if let Some(v) = get("POLLBOT_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = get("POLLBOT_HOST") {
            self.host = v;
        }
        if let Some(v) = get("POLLBOT_PORT") {
            self.port = v.trim().parse().map_err(|_| {
                BotError::Config(format!("POLLBOT_PORT '{}' is not a valid port", v))
            })?;
        }
        if let Some(v) = get("POLLBOT_TIMEZONE") {
            self.schedule.timezone = v;
        }
        if let Some(v) = get("POLLBOT_API_TOKEN") {
            self.api_token = Some(v);
        }
        if let Some(v) = get("POLLBOT_BRIDGE_COMMAND") {
            self.bridge.command = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), BotError> {
        if self.group_id.trim().is_empty() {
            return Err(BotError::Config(
                "group_id is required (set it in the config file or POLLBOT_GROUP_ID)".to_string(),
            ));
        }
        if self.client_id.trim().is_empty() {
            return Err(BotError::Config("client_id must not be empty".to_string()));
        }
        if self.bridge.command.trim().is_empty() {
            return Err(BotError::Config("bridge.command must not be empty".to_string()));
        }
        self.trigger()?;
        PollJob::new(&self.poll.name, &self.poll.options, false, false)
            .map_err(|e| BotError::Config(e.to_string()))?;
        Ok(())
    }

    pub fn trigger(&self) -> Result<TriggerSpec, BotError> {
        if let Some(secs) = self.schedule.interval_secs {
            return TriggerSpec::every(Duration::from_secs(secs));
        }
        let (hour, minute) = parse_hh_mm(&self.schedule.daily_at)?;
        TriggerSpec::daily(hour, minute, &self.schedule.timezone)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn store_settle(&self) -> Duration {
        Duration::from_millis(self.bootstrap.store_settle_ms)
    }

    pub fn client_settle(&self) -> Duration {
        Duration::from_millis(self.bootstrap.client_settle_ms)
    }
}

fn parse_hh_mm(value: &str) -> Result<(u32, u32), BotError> {
    let bad = || BotError::Config(format!("'{}' is not a HH:MM time", value));
    let (h, m) = value.trim().split_once(':').ok_or_else(bad)?;
    let hour: u32 = h.parse().map_err(|_| bad())?;
    let minute: u32 = m.parse().map_err(|_| bad())?;
    if hour > 23 || minute > 59 {
        return Err(bad());
    }
    Ok((hour, minute))
}
