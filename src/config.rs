//! Bot configuration, loaded from a YAML file.
//!
//! ```yaml
//! server:
//!   host: irc.libera.chat
//!   port: 6697
//!   tls: true
//! bot:
//!   nick: lagoonbot
//!   name: Lagoon Bot
//!   admin: wings@lagun.co
//! plugins:
//!   - pong
//!   - channels:
//!       channels: ["#lagoon"]
//!   - commandline
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::irc::codec::TextEncoding;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub bot: BotConfig,
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_tls")]
    pub tls: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub nick: String,
    /// Display name sent in `USER`.
    pub name: String,
    /// `user@host` allowed to use privileged commands.
    #[serde(default)]
    pub admin: Option<String>,
    #[serde(default)]
    pub encoding: TextEncoding,
    /// Minimum spacing between two outgoing lines.
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
    /// Capacity of each plugin's inbound queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl BotConfig {
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }
}

/// One entry of the ordered plugin list: `name` or `{ name: config }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PluginEntry {
    Bare(String),
    Configured(BTreeMap<String, Value>),
}

impl PluginEntry {
    /// Identifier the registry resolves. `None` for a malformed map entry.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Bare(name) => Some(name),
            Self::Configured(map) if map.len() == 1 => map.keys().next().map(String::as_str),
            Self::Configured(_) => None,
        }
    }

    /// Per-entry configuration value, if any.
    pub fn config(&self) -> Option<&Value> {
        match self {
            Self::Bare(_) => None,
            Self::Configured(map) => map.values().next(),
        }
    }
}

/// Where configuration comes from. Reload re-reads through this.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<Config, ConfigError>;
}

/// Configuration backed by a YAML file on disk.
#[derive(Debug, Clone)]
pub struct FileConfig {
    path: PathBuf,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigSource for FileConfig {
    async fn load(&self) -> Result<Config, ConfigError> {
        Config::load(&self.path).await
    }
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.nick.is_empty() || self.bot.nick.contains([' ', ':', '\r', '\n']) {
            return Err(ConfigError::Validation(format!(
                "invalid nick {:?}",
                self.bot.nick
            )));
        }
        if self.bot.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "queue_capacity must be greater than 0".into(),
            ));
        }
        if let Some(ref admin) = self.bot.admin {
            if !admin.contains('@') {
                return Err(ConfigError::Validation(format!(
                    "admin must be a user@host identity, got {admin:?}"
                )));
            }
        }
        for (i, entry) in self.plugins.iter().enumerate() {
            if entry.identifier().is_none() {
                return Err(ConfigError::Validation(format!(
                    "plugin entry {i} must have exactly one name"
                )));
            }
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    6697
}

fn default_tls() -> bool {
    true
}

fn default_send_delay_ms() -> u64 {
    2000
}

fn default_queue_capacity() -> usize {
    64
}
