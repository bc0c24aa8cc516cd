//! Configuration system for fwbroker.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FWBROKER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/fwbroker/config.toml
//!   3. ~/.config/fwbroker/config.toml
//!
//! The deployment environment variables (`IOTHUB_CONNECTION_STRING`,
//! `STORAGE_CONNECTION_STRING`, ...) override whatever the file says.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::{ConnectionString, ConnectionStringError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub hub: HubConfig,
    pub event_log: EventLogConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Device-messaging credential. Required.
    pub connection_string: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Event-log endpoint. Required.
    pub endpoint: String,
    /// Event-log name under the endpoint. Required.
    pub path: String,
    pub consumer_group: String,
    /// Restrict the subscription to one partition. None = all partitions.
    pub partition_id: Option<String>,
    /// How often an idle partition is polled for new events.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Blob-store credential. Required.
    pub connection_string: String,
    /// Container holding firmware blobs and checkpoints. Required.
    pub container: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Wait after every chunk sent.
    pub chunk_send_interval_ms: u64,
    pub pacing: PacingConfig,
    pub failure_isolation: FailureIsolation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Fixed delay before a failed subscription is re-established.
    pub resubscribe_backoff_ms: u64,
}

/// How chunk sends are spaced out on the device channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PacingConfig {
    /// Sleep `chunk_send_interval_ms` after each chunk.
    #[default]
    Fixed,
    /// Token bucket shared by all transfers of this process.
    TokenBucket { rate_per_minute: u32, burst: u32 },
}

/// What a failed event does to the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureIsolation {
    /// Log and contain the failure; keep consuming.
    #[default]
    PerEvent,
    /// Checkpoint the event, then tear the subscription down and resubscribe.
    FailFast,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            path: String::new(),
            consumer_group: "$Default".to_string(),
            partition_id: None,
            poll_interval_ms: 500,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_send_interval_ms: 10_000,
            pacing: PacingConfig::default(),
            failure_isolation: FailureIsolation::default(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            resubscribe_backoff_ms: 5_000,
        }
    }
}

impl TransferConfig {
    pub fn chunk_send_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_send_interval_ms)
    }
}

impl SupervisorConfig {
    pub fn resubscribe_backoff(&self) -> Duration {
        Duration::from_millis(self.resubscribe_backoff_ms)
    }
}

impl EventLogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("fwbroker")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
    #[error("invalid connection string for {0}: {1}")]
    ConnectionString(&'static str, ConnectionStringError),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl BrokerConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            BrokerConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FWBROKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&BrokerConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("IOTHUB_CONNECTION_STRING") {
            self.hub.connection_string = v;
        }
        if let Some(v) = lookup("IOTHUB_EVENT_HUB_COMPATIBLE_ENDPOINT") {
            self.event_log.endpoint = v;
        }
        if let Some(v) = lookup("IOTHUB_EVENT_HUB_COMPATIBLE_PATH") {
            self.event_log.path = v;
        }
        if let Some(v) = lookup("STORAGE_CONNECTION_STRING") {
            self.storage.connection_string = v;
        }
        if let Some(v) = lookup("BLOB_CONTAINER_NAME") {
            self.storage.container = v;
        }
        if let Some(v) = lookup("D2C_PARTITION_ID") {
            self.event_log.partition_id = Some(v).filter(|p| !p.is_empty());
        }
        if let Some(v) = lookup("FWBROKER_CHUNK_SEND_INTERVAL_MS") {
            self.transfer.chunk_send_interval_ms = v.parse().map_err(|_| {
                ConfigError::Invalid("transfer.chunk_send_interval_ms", v.clone())
            })?;
        }
        if let Some(v) = lookup("FWBROKER_RESUBSCRIBE_BACKOFF_MS") {
            self.supervisor.resubscribe_backoff_ms = v.parse().map_err(|_| {
                ConfigError::Invalid("supervisor.resubscribe_backoff_ms", v.clone())
            })?;
        }
        if let Some(v) = lookup("FWBROKER_FAILURE_ISOLATION") {
            self.transfer.failure_isolation = match v.as_str() {
                "per_event" => FailureIsolation::PerEvent,
                "fail_fast" => FailureIsolation::FailFast,
                _ => return Err(ConfigError::Invalid("transfer.failure_isolation", v)),
            };
        }
        Ok(())
    }

    /// Check that every required setting is present and well-formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.connection_string.is_empty() {
            return Err(ConfigError::Missing("hub.connection_string"));
        }
        if self.event_log.endpoint.is_empty() {
            return Err(ConfigError::Missing("event_log.endpoint"));
        }
        if self.event_log.path.is_empty() {
            return Err(ConfigError::Missing("event_log.path"));
        }
        if self.event_log.consumer_group.is_empty() {
            return Err(ConfigError::Missing("event_log.consumer_group"));
        }
        if self.storage.connection_string.is_empty() {
            return Err(ConfigError::Missing("storage.connection_string"));
        }
        if self.storage.container.is_empty() {
            return Err(ConfigError::Missing("storage.container"));
        }
        if let PacingConfig::TokenBucket {
            rate_per_minute,
            burst,
        } = self.transfer.pacing
        {
            if rate_per_minute == 0 || burst == 0 {
                return Err(ConfigError::Invalid(
                    "transfer.pacing",
                    "token bucket rate and burst must be positive".to_string(),
                ));
            }
        }
        self.hub_connection()?;
        self.storage_connection()?;
        Ok(())
    }

    pub fn hub_connection(&self) -> Result<ConnectionString, ConfigError> {
        self.hub
            .connection_string
            .parse()
            .map_err(|e| ConfigError::ConnectionString("hub", e))
    }

    pub fn storage_connection(&self) -> Result<ConnectionString, ConfigError> {
        self.storage
            .connection_string
            .parse()
            .map_err(|e| ConfigError::ConnectionString("storage", e))
    }
}
