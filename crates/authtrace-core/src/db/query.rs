//! `SQLite` query helpers for the activity store.
//!
//! Provides the read API consumed by reports and tooling (filtered activity
//! pages, lookups by highest promoted branch or concept) plus the narrow
//! date lookups the change summary engine and backfill jobs are built on.
//!
//! All functions take a shared `&Connection` reference and return
//! `anyhow::Result<T>` with typed structs (never raw rows).

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter, types::Type};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use crate::model::{
    Activity, ActivityType, ChangeType, ComponentChange, ComponentSubType, ComponentType,
    ConceptChange,
};

/// Maximum number of bound parameters used per `IN (...)` chunk.
const IN_CHUNK: usize = 500;

pub(crate) const ACTIVITY_COLUMNS: &str = "a.activity_id, a.username, a.branch, a.source_branch, \
     a.activity_type, a.commit_date, a.highest_promoted_branch, a.promotion_date";

// ---------------------------------------------------------------------------
// Filters and pages
// ---------------------------------------------------------------------------

/// Filter criteria for activity listings.
///
/// All fields are optional. When multiple fields are set, they are combined
/// with AND semantics; `concept_ids` matches activities touching any of them.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub branch: Option<String>,
    pub source_branch: Option<String>,
    pub activity_type: Option<ActivityType>,
    pub user: Option<String>,
    pub concept_ids: Vec<String>,
}

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// One page of activities plus the unpaged match count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityPage {
    pub total: usize,
    pub offset: u32,
    pub limit: u32,
    pub activities: Vec<Activity>,
}

/// Activities selected for a summary window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowRows {
    pub activities: Vec<Activity>,
    /// More rows matched than the page ceiling allowed.
    pub truncated: bool,
}

/// Which slice of a branch's history a summary window reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Committed on the branch and not promoted away, by commit date.
    OwnBranch,
    /// Committed elsewhere and promoted to the branch, by promotion date.
    PromotedIn,
}

/// A promotion event as seen from its source branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionHop {
    pub date: i64,
    pub target: String,
}

// ---------------------------------------------------------------------------
// Read API
// ---------------------------------------------------------------------------

/// Fetch a single activity (with its changes) by id.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_activity(conn: &Connection, activity_id: &str) -> Result<Option<Activity>> {
    let sql = format!("SELECT {ACTIVITY_COLUMNS} FROM activities a WHERE a.activity_id = ?1");
    let activity = conn
        .query_row(&sql, params![activity_id], row_to_activity)
        .optional()
        .with_context(|| format!("get_activity for '{activity_id}'"))?;

    match activity {
        Some(activity) => {
            let mut single = vec![activity];
            attach_changes(conn, &mut single)?;
            Ok(single.pop())
        }
        None => Ok(None),
    }
}

/// List activities matching `filter`, newest first.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn find_activities(conn: &Connection, filter: &ActivityFilter, page: Page) -> Result<ActivityPage> {
    let mut conditions: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(ref branch) = filter.branch {
        param_values.push(Box::new(branch.clone()));
        conditions.push(format!("a.branch = ?{}", param_values.len()));
    }

    if let Some(ref source) = filter.source_branch {
        param_values.push(Box::new(source.clone()));
        conditions.push(format!("a.source_branch = ?{}", param_values.len()));
    }

    if let Some(activity_type) = filter.activity_type {
        param_values.push(Box::new(activity_type.as_str()));
        conditions.push(format!("a.activity_type = ?{}", param_values.len()));
    }

    if let Some(ref user) = filter.user {
        param_values.push(Box::new(user.clone()));
        conditions.push(format!("a.username = ?{}", param_values.len()));
    }

    if !filter.concept_ids.is_empty() {
        let mut placeholders = String::new();
        for concept_id in &filter.concept_ids {
            param_values.push(Box::new(concept_id.clone()));
            if !placeholders.is_empty() {
                placeholders.push_str(", ");
            }
            let _ = write!(placeholders, "?{}", param_values.len());
        }
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM component_changes c \
             WHERE c.activity_id = a.activity_id AND c.concept_id IN ({placeholders}))"
        ));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(AsRef::as_ref).collect();

    let count_sql = format!("SELECT COUNT(*) FROM activities a{where_clause}");
    let total: i64 = conn
        .query_row(&count_sql, params_from_iter(params_ref.iter()), |row| row.get(0))
        .with_context(|| format!("count activities: {count_sql}"))?;

    let sql = format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activities a{where_clause} \
         ORDER BY a.commit_date DESC, a.activity_id ASC LIMIT {} OFFSET {}",
        page.limit, page.offset
    );
    let mut activities = collect_activities(conn, &sql, params_from_iter(params_ref.iter()))?;
    attach_changes(conn, &mut activities)?;

    Ok(ActivityPage {
        total: usize::try_from(total).unwrap_or(0),
        offset: page.offset,
        limit: page.limit,
        activities,
    })
}

/// Activities touching any of `concept_ids`, optionally narrowed by type
/// and user.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn find_by_concepts(
    conn: &Connection,
    concept_ids: &[String],
    activity_type: Option<ActivityType>,
    user: Option<&str>,
    page: Page,
) -> Result<ActivityPage> {
    let filter = ActivityFilter {
        activity_type,
        user: user.map(str::to_string),
        concept_ids: concept_ids.to_vec(),
        ..ActivityFilter::default()
    };
    find_activities(conn, &filter, page)
}

/// Every activity whose content currently sits at `branch`.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn find_by_highest_promoted_branch(conn: &Connection, branch: &str) -> Result<Vec<Activity>> {
    let sql = format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activities a \
         WHERE a.highest_promoted_branch = ?1 \
         ORDER BY a.commit_date ASC, a.activity_id ASC"
    );
    let mut activities = collect_activities(conn, &sql, params![branch])?;
    attach_changes(conn, &mut activities)?;
    Ok(activities)
}

// ---------------------------------------------------------------------------
// Engine lookups
// ---------------------------------------------------------------------------

/// Most recent `CREATE_CODE_SYSTEM_VERSION` on `branch` strictly before
/// `before`.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn latest_version_date(conn: &Connection, branch: &str, before: i64) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT MAX(commit_date) FROM activities
         WHERE branch = ?1 AND activity_type = 'CREATE_CODE_SYSTEM_VERSION'
           AND commit_date < ?2",
        params![branch, before],
        |row| row.get(0),
    )
    .with_context(|| format!("latest version date for '{branch}'"))
}

/// Most recent `PROMOTION` sourced from `branch` strictly before `before`.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn latest_promotion_from(conn: &Connection, branch: &str, before: i64) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT MAX(commit_date) FROM activities
         WHERE source_branch = ?1 AND activity_type = 'PROMOTION'
           AND commit_date < ?2",
        params![branch, before],
        |row| row.get(0),
    )
    .with_context(|| format!("latest promotion from '{branch}'"))
}

/// Most recent point at which `child` synchronised with its parent: a
/// rebase onto `child` or a promotion out of it, at or before `until`.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn latest_sync_date(conn: &Connection, child: &str, until: i64) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT MAX(commit_date) FROM activities
         WHERE ((branch = ?1 AND activity_type = 'REBASE')
             OR (source_branch = ?1 AND activity_type = 'PROMOTION'))
           AND commit_date <= ?2",
        params![child, until],
        |row| row.get(0),
    )
    .with_context(|| format!("latest sync date for '{child}'"))
}

/// Earliest commit recorded on `branch`.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn first_commit_date(conn: &Connection, branch: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT MIN(commit_date) FROM activities WHERE branch = ?1",
        params![branch],
        |row| row.get(0),
    )
    .with_context(|| format!("first commit date for '{branch}'"))
}

/// Earliest commit recorded strictly below `root`.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn first_commit_below(conn: &Connection, root: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT MIN(commit_date) FROM activities
         WHERE substr(branch, 1, length(?1) + 1) = ?1 || '/'",
        params![root],
        |row| row.get(0),
    )
    .with_context(|| format!("first commit below '{root}'"))
}

/// Earliest `PROMOTION` sourced from `branch` strictly after `after`.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn next_promotion_from(conn: &Connection, branch: &str, after: i64) -> Result<Option<PromotionHop>> {
    conn.query_row(
        "SELECT commit_date, branch FROM activities
         WHERE source_branch = ?1 AND activity_type = 'PROMOTION' AND commit_date > ?2
         ORDER BY commit_date ASC, activity_id ASC
         LIMIT 1",
        params![branch, after],
        |row| {
            Ok(PromotionHop {
                date: row.get(0)?,
                target: row.get(1)?,
            })
        },
    )
    .optional()
    .with_context(|| format!("next promotion from '{branch}'"))
}

/// Every promotion grouped by source branch, each list sorted by date.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn promotions_by_source(conn: &Connection) -> Result<HashMap<String, Vec<PromotionHop>>> {
    let mut stmt = conn
        .prepare(
            "SELECT source_branch, commit_date, branch FROM activities
             WHERE activity_type = 'PROMOTION' AND source_branch IS NOT NULL
             ORDER BY source_branch, commit_date ASC, activity_id ASC",
        )
        .context("prepare promotions_by_source")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                PromotionHop {
                    date: row.get(1)?,
                    target: row.get(2)?,
                },
            ))
        })
        .context("execute promotions_by_source")?;

    let mut grouped: HashMap<String, Vec<PromotionHop>> = HashMap::new();
    for row in rows {
        let (source, hop) = row.context("read promotions_by_source row")?;
        grouped.entry(source).or_default().push(hop);
    }
    Ok(grouped)
}

/// Branches recorded as code-system roots.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn code_system_branches(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT path FROM branches WHERE is_code_system_root = 1 ORDER BY path")
        .context("prepare code_system_branches")?;
    let rows = stmt
        .query_map([], |row| row.get(0))
        .context("execute code_system_branches")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("read code_system_branches row")?);
    }
    Ok(out)
}

/// Activities in one summary window `(after, until]` for `branch`.
///
/// At most `ceiling` rows are returned; when more match, the result is
/// flagged truncated and a warning is logged.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn window_activities(
    conn: &Connection,
    window: Window,
    branch: &str,
    after: i64,
    until: i64,
    ceiling: usize,
) -> Result<WindowRows> {
    let predicate = match window {
        Window::OwnBranch => {
            "a.branch = ?1 AND a.highest_promoted_branch = ?1 \
             AND a.commit_date > ?2 AND a.commit_date <= ?3 \
             ORDER BY a.commit_date ASC, a.activity_id ASC"
        }
        Window::PromotedIn => {
            "a.branch <> ?1 AND a.highest_promoted_branch = ?1 \
             AND a.promotion_date > ?2 AND a.promotion_date <= ?3 \
             ORDER BY a.promotion_date ASC, a.commit_date ASC, a.activity_id ASC"
        }
    };
    let fetch = i64::try_from(ceiling.saturating_add(1)).unwrap_or(i64::MAX);
    let sql = format!("SELECT {ACTIVITY_COLUMNS} FROM activities a WHERE {predicate} LIMIT ?4");

    let mut activities = collect_activities(conn, &sql, params![branch, after, until, fetch])?;
    let truncated = activities.len() > ceiling;
    if truncated {
        tracing::warn!(
            branch,
            window = ?window,
            ceiling,
            "summary window exceeded page ceiling; proceeding with truncated result"
        );
        activities.truncate(ceiling);
    }
    attach_changes(conn, &mut activities)?;
    Ok(WindowRows {
        activities,
        truncated,
    })
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub(crate) fn collect_activities(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Activity>> {
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("prepare activity query: {sql}"))?;
    let rows = stmt
        .query_map(params, row_to_activity)
        .context("execute activity query")?;

    let mut activities = Vec::new();
    for row in rows {
        activities.push(row.context("read activity row")?);
    }
    Ok(activities)
}

pub(crate) fn row_to_activity(row: &Row<'_>) -> rusqlite::Result<Activity> {
    let activity_type: String = row.get(4)?;
    let activity_type = activity_type
        .parse::<ActivityType>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(err)))?;

    Ok(Activity {
        id: row.get(0)?,
        user: row.get(1)?,
        branch: row.get(2)?,
        source_branch: row.get(3)?,
        activity_type,
        commit_date: row.get(5)?,
        highest_promoted_branch: row.get(6)?,
        promotion_date: row.get(7)?,
        concept_changes: Vec::new(),
    })
}

/// Load component changes for `activities` in place.
///
/// # Errors
///
/// Returns an error if the database query fails or a stored token no
/// longer parses.
pub(crate) fn attach_changes(conn: &Connection, activities: &mut [Activity]) -> Result<()> {
    if activities.is_empty() {
        return Ok(());
    }

    let mut by_activity: HashMap<String, BTreeMap<String, ConceptChange>> = HashMap::new();

    for chunk in activities.chunks(IN_CHUNK) {
        let placeholders = (1..=chunk.len())
            .map(|idx| format!("?{idx}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT activity_id, concept_id, component_id, change_type, component_type, \
             component_sub_type, effective_time_null \
             FROM component_changes WHERE activity_id IN ({placeholders}) \
             ORDER BY activity_id, concept_id, rowid"
        );
        let mut stmt = conn
            .prepare(&sql)
            .context("prepare component change query")?;
        let rows = stmt
            .query_map(params_from_iter(chunk.iter().map(|a| a.id.as_str())), |row| {
                let change_type: String = row.get(3)?;
                let component_type: String = row.get(4)?;
                let sub_type: Option<String> = row.get(5)?;
                let change = ComponentChange {
                    component_id: row.get(2)?,
                    change_type: change_type.parse::<ChangeType>().map_err(|err| {
                        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(err))
                    })?,
                    component_type: component_type.parse::<ComponentType>().map_err(|err| {
                        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(err))
                    })?,
                    component_sub_type: sub_type.as_deref().map(ComponentSubType::from),
                    effective_time_null: row.get(6)?,
                };
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, change))
            })
            .context("execute component change query")?;

        for row in rows {
            let (activity_id, concept_id, change) = row.context("read component change row")?;
            by_activity
                .entry(activity_id)
                .or_default()
                .entry(concept_id.clone())
                .or_insert_with(|| ConceptChange::new(concept_id))
                .component_changes
                .push(change);
        }
    }

    for activity in activities.iter_mut() {
        if let Some(concepts) = by_activity.remove(&activity.id) {
            activity.concept_changes = concepts.into_values().collect();
        }
    }
    Ok(())
}
