//! Promotion propagation.
//!
//! When content is promoted from `source` to `target`, every activity whose
//! content currently sits at `source` moves up to `target`. The move is one
//! filtered `UPDATE`, so a concurrent reader sees each activity either
//! before or after the promotion, never half-updated.

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tracing::debug;

/// Move every activity with `highest_promoted_branch == source` up to
/// `target`, stamping `promotion_date` on those not promoted before.
///
/// Returns the number of activities updated.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn propagate(conn: &Connection, target: &str, source: &str, promotion_date: i64) -> Result<usize> {
    let updated = conn
        .execute(
            "UPDATE activities
             SET highest_promoted_branch = ?1,
                 promotion_date = COALESCE(promotion_date, ?3)
             WHERE highest_promoted_branch = ?2",
            params![target, source, promotion_date],
        )
        .with_context(|| format!("propagate promotion {source} -> {target}"))?;

    debug!(
        source_branch = source,
        branch = target,
        updated,
        "propagated promotion"
    );
    Ok(updated)
}
