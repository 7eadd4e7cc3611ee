//! Configuration system for cmppsim.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CMPPSIM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cmppsim/config.toml
//!   3. ~/.config/cmppsim/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::message::{MessageSplitter, DEFAULT_MAX_MULTIPART, DEFAULT_MAX_SINGLE};
use crate::wire::ProtocolVersion;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub protocol: ProtocolConfig,
    pub cache: CacheConfig,
    pub delivery: DeliveryConfig,
    pub accounts: Vec<AccountConfig>,
    pub load: LoadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub version: ProtocolVersion,
    /// Largest content sent as a single packet, in octets.
    pub max_single: usize,
    /// Part size for concatenated messages, in octets.
    pub max_multipart: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Correlation entries older than this are dropped.
    pub ttl_secs: u64,
    /// Upper bound on live correlation entries.
    pub max_entries: usize,
    pub reap_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Capacity of each per-version delivery report queue.
    pub queue_capacity: usize,
    /// Consumers per queue. More than one may complete sends out of order.
    pub workers: usize,
    /// How long a submit may wait for queue space. 0 = wait forever.
    pub enqueue_timeout_ms: u64,
}

/// An SP account known to the mock server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub user_name: String,
    #[serde(default)]
    pub password: String,
    pub sp_id: String,
    pub sp_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub clients_per_account: usize,
    pub messages_per_client: usize,
    pub phone: String,
    pub content: String,
    pub extend: String,
    pub stats_interval_secs: u64,
    /// A client session ends after this long with nothing left to send and
    /// nothing arriving.
    pub idle_timeout_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            cache: CacheConfig::default(),
            delivery: DeliveryConfig::default(),
            accounts: vec![AccountConfig {
                user_name: "900001".to_string(),
                password: "888888".to_string(),
                sp_id: "900001".to_string(),
                sp_code: "1069000001".to_string(),
            }],
            load: LoadConfig::default(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::V30,
            max_single: DEFAULT_MAX_SINGLE,
            max_multipart: DEFAULT_MAX_MULTIPART,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 100_000,
            reap_interval_secs: 10,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            workers: 1,
            enqueue_timeout_ms: 0,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            clients_per_account: 2,
            messages_per_client: 50,
            phone: "13800138000".to_string(),
            content: "cmppsim load test message".to_string(),
            extend: "01".to_string(),
            stats_interval_secs: 5,
            idle_timeout_ms: 2_000,
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

impl DeliveryConfig {
    /// `None` means block until the queue has room.
    pub fn enqueue_timeout(&self) -> Option<Duration> {
        (self.enqueue_timeout_ms > 0).then(|| Duration::from_millis(self.enqueue_timeout_ms))
    }
}

impl LoadConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.max(1))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }
}

impl ProtocolConfig {
    pub fn splitter(&self) -> Result<MessageSplitter, ConfigError> {
        MessageSplitter::new(self.max_single, self.max_multipart).map_err(|e| {
            ConfigError::Invalid(format!("protocol.max_multipart: {e}"))
        })
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cmppsim")
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
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SimConfig {
    /// Load config: env vars → file → defaults, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            SimConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CMPPSIM_CONFIG")
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
            let text = toml::to_string_pretty(&SimConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol.splitter()?;
        if self.delivery.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "delivery.queue_capacity must be at least 1".into(),
            ));
        }
        if self.delivery.workers == 0 {
            return Err(ConfigError::Invalid("delivery.workers must be at least 1".into()));
        }
        if self.accounts.is_empty() {
            return Err(ConfigError::Invalid("at least one account is required".into()));
        }
        Ok(())
    }

    /// Apply CMPPSIM_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CMPPSIM_PROTOCOL__VERSION") {
            if let Ok(version) = v.parse() {
                self.protocol.version = version;
            }
        }
        if let Ok(v) = std::env::var("CMPPSIM_LOAD__MESSAGES_PER_CLIENT") {
            if let Ok(n) = v.parse() {
                self.load.messages_per_client = n;
            }
        }
        if let Ok(v) = std::env::var("CMPPSIM_DELIVERY__WORKERS") {
            if let Ok(n) = v.parse() {
                self.delivery.workers = n;
            }
        }
        if let Ok(v) = std::env::var("CMPPSIM_DELIVERY__ENQUEUE_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.delivery.enqueue_timeout_ms = ms;
            }
        }
    }
}
