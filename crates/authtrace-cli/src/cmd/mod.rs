//! Subcommand handlers and the context they share.

pub mod activities;
pub mod archive_diff;
pub mod backfill;
pub mod ingest;
pub mod init;
pub mod patch;
pub mod promoted_to;
pub mod split;
pub mod summary;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use authtrace_core::config::{CONFIG_FILE_NAME, Config, load_config};
use authtrace_core::db;
use authtrace_core::error::ErrorCode;
use chrono::DateTime;
use rusqlite::Connection;

use crate::output::{OutputMode, fail};

/// Resolved configuration, store location and output mode.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub store_path: PathBuf,
    pub output: OutputMode,
}

impl Context {
    /// Load the config file and apply command-line overrides.
    ///
    /// `--store` wins over `[store] path`.
    pub fn resolve(
        config_path: Option<&Path>,
        store_override: Option<&Path>,
        output: OutputMode,
    ) -> anyhow::Result<Self> {
        let config_path = config_path.map_or_else(|| PathBuf::from(CONFIG_FILE_NAME), Path::to_path_buf);
        let config = load_config(&config_path)
            .map_err(|err| fail(output, ErrorCode::ConfigParseError, format!("{err:#}")))?;
        let store_path = store_override.map_or_else(|| config.store.path.clone(), Path::to_path_buf);
        Ok(Self {
            config,
            store_path,
            output,
        })
    }

    /// Open the store, failing with `E1001` when it has not been created.
    pub fn open_existing(&self) -> anyhow::Result<Connection> {
        match db::try_open_store(&self.store_path) {
            Ok(Some(conn)) => Ok(conn),
            Ok(None) => Err(fail(
                self.output,
                ErrorCode::StoreNotInitialized,
                format!("no activity store at {}", self.store_path.display()),
            )),
            Err(err) => Err(fail(self.output, ErrorCode::StoreUnavailable, format!("{err:#}"))),
        }
    }

    /// Open the store, creating it when missing.
    pub fn open_or_create(&self) -> anyhow::Result<Connection> {
        db::open_store(&self.store_path)
            .map_err(|err| fail(self.output, ErrorCode::StoreUnavailable, format!("{err:#}")))
    }
}

/// A point in time given as epoch milliseconds or RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(pub i64);

impl FromStr for Timestamp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(ms) = s.parse::<i64>() {
            return Ok(Self(ms));
        }
        DateTime::parse_from_rfc3339(s)
            .map(|at| Self(at.timestamp_millis()))
            .map_err(|err| format!("expected epoch milliseconds or RFC 3339, got '{s}': {err}"))
    }
}
