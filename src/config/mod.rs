use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::governor::{Limits, RequesterId};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub discord: DiscordConfig,
    pub bot: BotConfig,
    pub limits: LimitsConfig,
    pub caption: CaptionConfig,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DiscordConfig {
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BotConfig {
    /// 0 disables the admin bypass.
    pub admin_id: u64,
    pub restrict_to_admin: bool,
    /// 0 disables forwarding.
    pub forward_channel: u64,
    /// Guild channels where plain post links are picked up. Direct messages always are.
    pub watch_channels: HashSet<u64>,
    pub download_dir: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            admin_id: 0,
            restrict_to_admin: false,
            forward_channel: 0,
            watch_channels: HashSet::new(),
            download_dir: None,
        }
    }
}

impl BotConfig {
    pub fn admin(&self) -> Option<RequesterId> {
        (self.admin_id != 0).then_some(self.admin_id)
    }

    pub fn forward_channel(&self) -> Option<u64> {
        (self.forward_channel != 0).then_some(self.forward_channel)
    }

    pub fn is_watch_channel(&self, channel_id: u64) -> bool {
        self.watch_channels.contains(&channel_id)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("birdgrab")
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub per_day: u32,
    pub pending: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            per_day: limits.per_day,
            pending: limits.pending,
        }
    }
}

impl From<&LimitsConfig> for Limits {
    fn from(config: &LimitsConfig) -> Self {
        Limits {
            per_day: config.per_day,
            pending: config.pending,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CaptionConfig {
    pub include_text: bool,
    pub include_url: bool,
    pub include_bot_name: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    pub retry_count: u32,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub save_data_dir: Option<PathBuf>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            request_timeout_secs: 60,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            save_data_dir: None,
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }

    /// Token from the config file, falling back to `DISCORD_TOKEN`.
    pub fn get_discord_token(&self) -> Option<String> {
        self.discord
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("DISCORD_TOKEN").ok())
    }
}
