//! SQLite schema migrations for the activity store.

use super::schema;
use rusqlite::{Connection, types::Type};
use tracing::debug;

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 3;

struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "activities and component changes",
        sql: schema::MIGRATION_V1_SQL,
    },
    Step {
        version: 2,
        name: "report indexes",
        sql: schema::MIGRATION_V2_SQL,
    },
    Step {
        version: 3,
        name: "split tombstones",
        sql: schema::MIGRATION_V3_SQL,
    },
];

/// Schema version recorded in `PRAGMA user_version`.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read or holds a negative or
/// oversized value.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let raw: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(err)))
}

/// Bring the store up to [`LATEST_SCHEMA_VERSION`].
///
/// Steps at or below the recorded version are skipped, and each remaining
/// step commits together with its version bump. Returns the resulting
/// version.
///
/// # Errors
///
/// Returns an error if a step fails; earlier steps stay applied.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let from = current_schema_version(conn)?;
    let mut version = from;

    for step in STEPS.iter().filter(|step| step.version > from) {
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)?;
        let stamped = i64::from(step.version);
        tx.pragma_update(None, "user_version", stamped)?;
        tx.execute("UPDATE store_meta SET schema_version = ?1 WHERE id = 1", [stamped])?;
        tx.commit()?;
        debug!(version = step.version, step = step.name, "applied store migration");
        version = step.version;
    }

    Ok(version)
}
