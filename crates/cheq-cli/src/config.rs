use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use cheq_projection::{ProjectorConfig, RetryPolicy};
use cheq_store::{LogConfig, SyncMode};
use cheq_types::KeyFormat;
use serde::{Deserialize, Serialize};

/// Indexer configuration, read from TOML. Every field has a default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub store_path: PathBuf,
    pub key_format: KeyFormat,
    pub sync_mode: SyncMode,
    pub follow_interval_ms: u64,
    pub retry: RetryConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("cheq-index.log"),
            key_format: KeyFormat::Hex,
            sync_mode: SyncMode::OsDefault,
            follow_interval_ms: 1_000,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl IndexerConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid indexer config")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("serializing config")
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            sync_mode: self.sync_mode,
        }
    }

    pub fn projector_config(&self) -> ProjectorConfig {
        ProjectorConfig {
            key_format: self.key_format,
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            },
        }
    }

    pub fn follow_interval(&self) -> Duration {
        Duration::from_millis(self.follow_interval_ms.max(1))
    }
}
