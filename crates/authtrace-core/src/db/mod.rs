//! SQLite activity store.
//!
//! One writer (the ingestion consumer) and any number of report readers
//! share a store file. Connections run in WAL mode so a summary's read
//! transaction sees a fixed snapshot while ingestion appends, wait up to
//! [`DEFAULT_BUSY_TIMEOUT`] on a locked database, and enforce foreign keys
//! so component changes disappear with their activity.

pub mod migrations;
pub mod query;
pub mod record;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

/// How long a connection waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the store at `path`, creating the file and its directory when
/// missing, then migrate it.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the database
/// cannot be opened, configured or migrated.
pub fn open_store(path: &Path) -> Result<Connection> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .with_context(|| format!("create store directory {}", dir.display()))?,
        _ => {}
    }

    let conn = Connection::open(path)
        .with_context(|| format!("open activity store {}", path.display()))?;
    prepare(conn, true)
}

/// Like [`open_store`], but `None` when no store file exists yet.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be opened or migrated.
pub fn try_open_store(path: &Path) -> Result<Option<Connection>> {
    if path.exists() {
        open_store(path).map(Some)
    } else {
        Ok(None)
    }
}

/// A migrated in-memory store for tests and one-shot tooling.
///
/// # Errors
///
/// Returns an error if migration fails.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory store")?;
    prepare(conn, false)
}

fn prepare(mut conn: Connection, on_disk: bool) -> Result<Connection> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("enable foreign keys")?;
    if on_disk {
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("enable WAL journal")?;
        tracing::debug!(journal_mode = %mode, "store journal mode");
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("set synchronous mode")?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .context("set busy timeout")?;
    }
    migrations::migrate(&mut conn).context("apply store migrations")?;
    Ok(conn)
}
