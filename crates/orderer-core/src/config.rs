//! Configuration system for the orderer.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $ORDERER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/orderer/config.toml
//!   3. ~/.config/orderer/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdererConfig {
    pub batch: BatchConfig,
    pub intake: IntakeConfig,
    pub network: NetworkConfig,
    pub sequencer: SequencerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum messages per block. Reaching it cuts immediately.
    pub size: usize,
    /// Maximum time a non-empty buffer waits before being cut.
    pub period_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Bounded queue between intake and cutter. 0 = batch.size.
    pub queue_capacity: usize,
    /// Larger messages are answered with BAD_REQUEST.
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_addr: String,
    /// TCP port for client broadcast streams. 0 = OS-assigned.
    pub broadcast_port: u16,
    /// HTTP status API, always on 127.0.0.1.
    pub api_port: u16,
}

/// Which backend receives cut blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process only. Blocks are lost on exit.
    Memory,
    /// Append-only log file.
    File,
    /// SQLite table.
    Sqlite,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Sqlite => "sqlite",
        })
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(ConfigError::Invalid(format!("unknown backend '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub backend: BackendKind,
    /// Log file (file backend) or database file (sqlite backend).
    pub path: PathBuf,
    /// Extra attempts after a failed send. 0 = fail on first error.
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when RUST_LOG is unset, e.g. "info" or "ordererd=debug".
    pub level: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 10,
            period_ms: 2000,
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 0,
            max_message_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            broadcast_port: 7050,
            api_port: 7051,
        }
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            path: data_dir().join("blocks.log"),
            retry_attempts: 0,
            retry_backoff_ms: 100,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl BatchConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl IntakeConfig {
    /// Effective queue capacity for a given batch size.
    pub fn capacity_for(&self, batch_size: usize) -> usize {
        if self.queue_capacity == 0 {
            batch_size
        } else {
            self.queue_capacity
        }
    }
}

impl SequencerConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("orderer")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("orderer")
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

impl OrdererConfig {
    /// Load config: env vars → file → defaults. The result is validated.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            OrdererConfig::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ORDERER_CONFIG")
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
            let text = toml::to_string_pretty(&OrdererConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the cutter cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.size == 0 {
            return Err(ConfigError::Invalid("batch.size must be positive".into()));
        }
        if self.batch.period_ms == 0 {
            return Err(ConfigError::Invalid("batch.period_ms must be positive".into()));
        }
        if self.intake.max_message_bytes == 0 {
            return Err(ConfigError::Invalid(
                "intake.max_message_bytes must be positive".into(),
            ));
        }
        if self.intake.max_message_bytes > crate::wire::MAX_FRAME {
            return Err(ConfigError::Invalid(format!(
                "intake.max_message_bytes exceeds the {} byte frame limit",
                crate::wire::MAX_FRAME
            )));
        }
        Ok(())
    }

    /// Apply ORDERER_* env var overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overrides from any key lookup; split out so tests don't touch the
    /// process environment.
    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(key: &str, v: String) -> Result<T, ConfigError> {
            v.parse()
                .map_err(|_| ConfigError::Invalid(format!("{key}: cannot parse '{v}'")))
        }

        if let Some(v) = lookup("ORDERER_BATCH__SIZE") {
            self.batch.size = parse("ORDERER_BATCH__SIZE", v)?;
        }
        if let Some(v) = lookup("ORDERER_BATCH__PERIOD_MS") {
            self.batch.period_ms = parse("ORDERER_BATCH__PERIOD_MS", v)?;
        }
        if let Some(v) = lookup("ORDERER_INTAKE__QUEUE_CAPACITY") {
            self.intake.queue_capacity = parse("ORDERER_INTAKE__QUEUE_CAPACITY", v)?;
        }
        if let Some(v) = lookup("ORDERER_INTAKE__MAX_MESSAGE_BYTES") {
            self.intake.max_message_bytes = parse("ORDERER_INTAKE__MAX_MESSAGE_BYTES", v)?;
        }
        if let Some(v) = lookup("ORDERER_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(v) = lookup("ORDERER_NETWORK__BROADCAST_PORT") {
            self.network.broadcast_port = parse("ORDERER_NETWORK__BROADCAST_PORT", v)?;
        }
        if let Some(v) = lookup("ORDERER_NETWORK__API_PORT") {
            self.network.api_port = parse("ORDERER_NETWORK__API_PORT", v)?;
        }
        if let Some(v) = lookup("ORDERER_SEQUENCER__BACKEND") {
            self.sequencer.backend = v.parse()?;
        }
        if let Some(v) = lookup("ORDERER_SEQUENCER__PATH") {
            self.sequencer.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ORDERER_SEQUENCER__RETRY_ATTEMPTS") {
            self.sequencer.retry_attempts = parse("ORDERER_SEQUENCER__RETRY_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("ORDERER_LOG__LEVEL") {
            self.log.level = v;
        }
        Ok(())
    }
}
