//! Splitting of oversized activities.
//!
//! An activity touching more than `max_concepts` concepts is re-emitted as
//! several activities of at most `max_concepts` concepts each. The pieces
//! keep every field of the original except the id (`<original>-<n>`), the
//! original is deleted and its id kept in `split_activities`, all in one
//! transaction. The kept id makes a later redelivery of the original
//! message a duplicate instead of a second copy of its changes.

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::query::get_activity;
use crate::db::record::{delete_activity, insert_activity, record_split};
use crate::model::Activity;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SplitStats {
    /// Oversized activities that were split.
    pub split: usize,
    /// Activities written in their place.
    pub created: usize,
}

/// Split `activity` into pieces of at most `max_concepts` concepts.
#[must_use]
pub fn split_activity(activity: &Activity, max_concepts: usize) -> Vec<Activity> {
    activity
        .concept_changes
        .chunks(max_concepts.max(1))
        .enumerate()
        .map(|(index, chunk)| Activity {
            id: format!("{}-{index}", activity.id),
            concept_changes: chunk.to_vec(),
            ..activity.clone()
        })
        .collect()
}

/// Split every stored activity with more than `max_concepts` concepts.
///
/// # Errors
///
/// Returns an error if a query or write fails. Activities split before the
/// failure stay split.
pub fn split_large_activities(conn: &Connection, max_concepts: usize) -> Result<SplitStats> {
    let max_concepts = max_concepts.max(1);
    let limit = i64::try_from(max_concepts).unwrap_or(i64::MAX);
    let oversized: Vec<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT activity_id FROM component_changes
                 GROUP BY activity_id
                 HAVING COUNT(DISTINCT concept_id) > ?1
                 ORDER BY activity_id",
            )
            .context("prepare oversized activity query")?;
        let rows = stmt
            .query_map(params![limit], |row| row.get(0))
            .context("execute oversized activity query")?;
        rows.collect::<rusqlite::Result<_>>()
            .context("read oversized activity rows")?
    };

    let mut stats = SplitStats::default();
    for activity_id in oversized {
        let Some(activity) = get_activity(conn, &activity_id)? else {
            warn!(activity_id = %activity_id, "oversized activity vanished before split");
            continue;
        };
        let pieces = split_activity(&activity, max_concepts);

        let tx = conn
            .unchecked_transaction()
            .context("begin split transaction")?;
        delete_activity(&tx, &activity.id)?;
        record_split(&tx, &activity.id, pieces.len())?;
        for piece in &pieces {
            insert_activity(&tx, piece)?;
        }
        tx.commit()
            .with_context(|| format!("commit split of {}", activity.id))?;

        info!(
            activity_id = %activity.id,
            concepts = activity.concept_changes.len(),
            pieces = pieces.len(),
            "split oversized activity"
        );
        stats.split += 1;
        stats.created += pieces.len();
    }
    Ok(stats)
}
