//! Write helpers for the activity store.
//!
//! All functions take a plain `&Connection` so callers decide the unit of
//! work: ingestion wraps one message in one transaction, backfill wraps one
//! batch.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::branch;
use crate::model::Activity;

/// Register `username` if it has not been seen before.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn ensure_user(conn: &Connection, username: &str, seen_at: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO users (username, first_seen_at) VALUES (?1, ?2)
         ON CONFLICT(username) DO NOTHING",
        params![username, seen_at],
    )
    .with_context(|| format!("ensure user '{username}'"))?;
    Ok(())
}

/// Register `path` and every ancestor not seen before.
///
/// Only a primary-key conflict is ignored; a path failing the table's
/// checks is an error.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn ensure_branch(conn: &Connection, path: &str, seen_at: i64) -> Result<()> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO branches (path, depth, is_code_system_root, first_seen_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO NOTHING",
        )
        .context("prepare branch insert")?;
    for level in std::iter::once(path).chain(branch::ancestors(path)) {
        let depth = i64::try_from(branch::depth(level)).unwrap_or(i64::MAX);
        stmt.execute(params![level, depth, branch::is_code_system_root(level), seen_at])
            .with_context(|| format!("ensure branch '{level}'"))?;
    }
    Ok(())
}

/// True when an activity with `activity_id` is stored, or was stored and
/// later split.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn activity_exists(conn: &Connection, activity_id: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM activities WHERE activity_id = ?1)
             OR EXISTS(SELECT 1 FROM split_activities WHERE activity_id = ?1)",
        params![activity_id],
        |row| row.get(0),
    )
    .with_context(|| format!("check activity '{activity_id}'"))
}

/// Insert an activity with all of its component changes.
///
/// Creates the referenced user and branches first. Returns `false` without
/// writing anything when the id is already present.
///
/// # Errors
///
/// Returns an error if any insert fails.
pub fn insert_activity(conn: &Connection, activity: &Activity) -> Result<bool> {
    if activity_exists(conn, &activity.id)? {
        return Ok(false);
    }

    ensure_user(conn, &activity.user, activity.commit_date)?;
    ensure_branch(conn, &activity.branch, activity.commit_date)?;
    if let Some(source) = activity.source_branch.as_deref() {
        ensure_branch(conn, source, activity.commit_date)?;
    }

    conn.execute(
        "INSERT INTO activities (
            activity_id, username, branch, source_branch, activity_type,
            commit_date, highest_promoted_branch, promotion_date
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            activity.id,
            activity.user,
            activity.branch,
            activity.source_branch,
            activity.activity_type.as_str(),
            activity.commit_date,
            activity.highest_promoted_branch,
            activity.promotion_date,
        ],
    )
    .with_context(|| format!("insert activity {}", activity.id))?;

    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO component_changes (
                activity_id, concept_id, component_id, change_type,
                component_type, component_sub_type, effective_time_null
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .context("prepare component change insert")?;

    for (concept_id, change) in activity.component_changes() {
        stmt.execute(params![
            activity.id,
            concept_id,
            change.component_id,
            change.change_type.as_str(),
            change.component_type.as_str(),
            change.component_sub_type.as_ref().map(|sub| sub.as_str().to_string()),
            change.effective_time_null,
        ])
        .with_context(|| {
            format!(
                "insert component change {} for {}",
                change.component_id, activity.id
            )
        })?;
    }

    conn.execute(
        "UPDATE store_meta
         SET last_ingested_at = MAX(last_ingested_at, ?1), last_activity_id = ?2
         WHERE id = 1",
        params![activity.commit_date, activity.id],
    )
    .context("update store_meta")?;

    Ok(true)
}

/// Delete an activity; its component changes cascade.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_activity(conn: &Connection, activity_id: &str) -> Result<bool> {
    let removed = conn
        .execute(
            "DELETE FROM activities WHERE activity_id = ?1",
            params![activity_id],
        )
        .with_context(|| format!("delete activity {activity_id}"))?;
    Ok(removed > 0)
}

/// Remember that `activity_id` was replaced by `pieces` split activities.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn record_split(conn: &Connection, activity_id: &str, pieces: usize) -> Result<()> {
    conn.execute(
        "INSERT INTO split_activities (activity_id, pieces) VALUES (?1, ?2)
         ON CONFLICT(activity_id) DO UPDATE SET pieces = excluded.pieces",
        params![activity_id, i64::try_from(pieces).unwrap_or(i64::MAX)],
    )
    .with_context(|| format!("record split of {activity_id}"))?;
    Ok(())
}

/// Overwrite the promotion fields of one activity.
///
/// Returns `false` if the stored values already match (no write).
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn set_promotion(
    conn: &Connection,
    activity_id: &str,
    highest_promoted_branch: &str,
    promotion_date: Option<i64>,
) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE activities
             SET highest_promoted_branch = ?2, promotion_date = ?3
             WHERE activity_id = ?1
               AND (highest_promoted_branch <> ?2 OR promotion_date IS NOT ?3)",
            params![activity_id, highest_promoted_branch, promotion_date],
        )
        .with_context(|| format!("set promotion fields for {activity_id}"))?;
    Ok(changed > 0)
}

/// Last activity id written by ingestion, if any.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn last_activity_id(conn: &Connection) -> Result<Option<String>> {
    conn.query_row(
        "SELECT last_activity_id FROM store_meta WHERE id = 1",
        [],
        |row| row.get::<_, Option<String>>(0),
    )
    .optional()
    .map(Option::flatten)
    .context("read store_meta")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::model::{ActivityType, ChangeType, ComponentChange, ComponentType, ConceptChange};

    fn sample() -> Activity {
        let mut concept = ConceptChange::new("100005");
        concept.add_first(ComponentChange::new(
            "100005",
            ChangeType::Create,
            ComponentType::Concept,
            true,
        ));
        Activity::new("act-0001", "alice", "MAIN/PROJ/PROJ-1", ActivityType::ContentChange, 1_000)
            .with_concept_changes(vec![concept])
    }

    #[test]
    fn insert_creates_user_and_branch_lazily() -> Result<()> {
        let conn = open_in_memory()?;
        assert!(insert_activity(&conn, &sample())?);

        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        assert_eq!(users, 1);
        let (depth, root): (i64, bool) = conn.query_row(
            "SELECT depth, is_code_system_root FROM branches WHERE path = 'MAIN/PROJ/PROJ-1'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(depth, 3);
        assert!(!root);
        let branches: i64 = conn.query_row("SELECT COUNT(*) FROM branches", [], |row| row.get(0))?;
        assert_eq!(branches, 3);
        assert_eq!(last_activity_id(&conn)?.as_deref(), Some("act-0001"));
        Ok(())
    }

    #[test]
    fn blank_branch_segment_is_an_error() -> Result<()> {
        let conn = open_in_memory()?;
        ensure_branch(&conn, "MAIN/PROJ", 1)?;
        ensure_branch(&conn, "MAIN/PROJ", 2)?;

        let tx = conn.unchecked_transaction()?;
        assert!(ensure_branch(&tx, "/PROJ", 3).is_err());
        drop(tx);

        let paths: Vec<String> = conn
            .prepare("SELECT path FROM branches ORDER BY path")?
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        assert_eq!(paths, vec!["MAIN", "MAIN/PROJ"]);
        Ok(())
    }

    #[test]
    fn duplicate_insert_is_skipped() -> Result<()> {
        let conn = open_in_memory()?;
        assert!(insert_activity(&conn, &sample())?);
        assert!(!insert_activity(&conn, &sample())?);
        let rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM component_changes", [], |row| row.get(0))?;
        assert_eq!(rows, 1);
        Ok(())
    }

    #[test]
    fn delete_cascades_component_changes() -> Result<()> {
        let conn = open_in_memory()?;
        insert_activity(&conn, &sample())?;
        assert!(delete_activity(&conn, "act-0001")?);
        let rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM component_changes", [], |row| row.get(0))?;
        assert_eq!(rows, 0);
        Ok(())
    }

    #[test]
    fn set_promotion_reports_no_op() -> Result<()> {
        let conn = open_in_memory()?;
        insert_activity(&conn, &sample())?;
        assert!(set_promotion(&conn, "act-0001", "MAIN/PROJ", Some(2_000))?);
        assert!(!set_promotion(&conn, "act-0001", "MAIN/PROJ", Some(2_000))?);
        Ok(())
    }
}
