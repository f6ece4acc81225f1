use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backfill::BackfillOptions;
use crate::ingest::RetryPolicy;
use crate::summary::DEFAULT_PAGE_CEILING;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "authtrace.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub split: SplitConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Maximum rows one store query returns before truncation is logged.
    #[serde(default = "default_page_ceiling")]
    pub page_ceiling: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            page_ceiling: default_page_ceiling(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl IngestConfig {
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitConfig {
    #[serde(default = "default_max_concepts")]
    pub max_concepts: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            max_concepts: default_max_concepts(),
        }
    }
}

impl Config {
    /// Backfill options derived from `[backfill]` and `[store]`.
    #[must_use]
    pub fn backfill_options(&self) -> BackfillOptions {
        BackfillOptions {
            batch_size: self.backfill.batch_size,
            page_ceiling: self.store.page_ceiling,
            ..BackfillOptions::default()
        }
        .with_window_days(self.backfill.window_days)
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".authtrace/activities.db")
}

const fn default_page_ceiling() -> usize {
    DEFAULT_PAGE_CEILING
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_retry_backoff_ms() -> u64 {
    250
}

const fn default_window_days() -> u32 {
    1
}

const fn default_batch_size() -> usize {
    500
}

const fn default_max_concepts() -> usize {
    1_000
}

/// Load configuration from `path`.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<Config>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}
