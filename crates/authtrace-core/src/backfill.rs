//! Historical backfill of promotion fields.
//!
//! Activities recorded before promotion tracking existed carry
//! `highest_promoted_branch == branch` and no `promotion_date`. Their real
//! values are recovered by walking the promotion chain upward: starting at
//! the activity's own branch and commit date, repeatedly follow the next
//! `PROMOTION` sourced from the current level until a code-system root, the
//! already-recorded highest branch, or the end of the chain is reached.
//!
//! Two jobs share that walk:
//!
//! - [`Backfill::run_promotion_dates`] scans each code system forward from
//!   its last version in fixed windows and resolves every unpromoted
//!   non-rebase activity, one store lookup per hop;
//! - [`Backfill::run_rebase_repair`] resolves `REBASE` activities that carry
//!   content changes, against a prefetched promotion map.
//!
//! Both are idempotent and check a [`CancellationToken`] between batches.
//! Neither takes the consumer lock: running one alongside live ingestion
//! races it on `highest_promoted_branch` (last writer wins).

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::branch;
use crate::db::query::{
    ACTIVITY_COLUMNS, PromotionHop, code_system_branches, collect_activities, first_commit_below,
    latest_version_date, promotions_by_source,
};
use crate::db::record::set_promotion;
use crate::model::Activity;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Cooperative stop flag shared between a job and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel once `budget` has elapsed. A zero budget cancels immediately.
    pub fn cancel_after(&self, budget: Duration) {
        if budget.is_zero() {
            self.cancel();
            return;
        }
        let token = self.clone();
        thread::spawn(move || {
            thread::sleep(budget);
            token.cancel();
        });
    }
}

// ---------------------------------------------------------------------------
// Promotion lookups
// ---------------------------------------------------------------------------

/// "Next promotion sourced from `branch` after `after`."
pub trait PromotionLookup {
    /// # Errors
    ///
    /// Returns an error if the underlying lookup fails.
    fn next_promotion_from(&self, branch: &str, after: i64) -> Result<Option<PromotionHop>>;
}

/// Lookup backed by one store query per call.
pub struct StoreLookup<'conn> {
    conn: &'conn Connection,
}

impl<'conn> StoreLookup<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl PromotionLookup for StoreLookup<'_> {
    fn next_promotion_from(&self, branch: &str, after: i64) -> Result<Option<PromotionHop>> {
        crate::db::query::next_promotion_from(self.conn, branch, after)
    }
}

/// Every promotion loaded up front, grouped by source branch.
#[derive(Debug, Clone, Default)]
pub struct PrefetchedPromotions {
    by_source: HashMap<String, Vec<PromotionHop>>,
}

impl PrefetchedPromotions {
    /// # Errors
    ///
    /// Returns an error if the promotion query fails.
    pub fn load(conn: &Connection) -> Result<Self> {
        let by_source = promotions_by_source(conn)?;
        debug!(sources = by_source.len(), "prefetched promotions");
        Ok(Self { by_source })
    }
}

impl PromotionLookup for PrefetchedPromotions {
    fn next_promotion_from(&self, branch: &str, after: i64) -> Result<Option<PromotionHop>> {
        Ok(self
            .by_source
            .get(branch)
            .and_then(|hops| hops.iter().find(|hop| hop.date > after))
            .cloned())
    }
}

/// Promotion fields an activity should carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionResolution {
    pub highest_promoted_branch: String,
    pub promotion_date: Option<i64>,
}

/// Walk the promotion chain for `activity`.
///
/// Returns `None` when the fields cannot be made consistent (the activity
/// is recorded as promoted but no promotion date can be recovered).
///
/// # Errors
///
/// Returns an error if a lookup fails.
pub fn resolve_promotion(
    lookup: &impl PromotionLookup,
    activity: &Activity,
) -> Result<Option<PromotionResolution>> {
    let recorded = activity.highest_promoted_branch.as_str();
    let mut level = activity.branch.clone();
    let mut at = activity.commit_date;
    let mut first_hop: Option<i64> = None;

    loop {
        if branch::is_code_system_root(&level) || (level != activity.branch && level == recorded) {
            break;
        }
        let Some(hop) = lookup.next_promotion_from(&level, at)? else {
            break;
        };
        if !branch::is_ancestor(&hop.target, &level) {
            warn!(
                activity_id = %activity.id,
                branch = %level,
                target = %hop.target,
                "promotion target is not an ancestor; stopping walk"
            );
            break;
        }
        first_hop.get_or_insert(hop.date);
        level = hop.target;
        at = hop.date;
    }

    let highest = if branch::is_ancestor(recorded, &level) {
        recorded.to_string()
    } else {
        level
    };

    if highest == activity.branch {
        return Ok(Some(PromotionResolution {
            highest_promoted_branch: highest,
            promotion_date: None,
        }));
    }

    match activity.promotion_date.or(first_hop) {
        Some(date) => Ok(Some(PromotionResolution {
            highest_promoted_branch: highest,
            promotion_date: Some(date),
        })),
        None => {
            warn!(
                activity_id = %activity.id,
                branch = %activity.branch,
                highest_promoted_branch = %highest,
                "no promotion date recoverable; leaving activity unchanged"
            );
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillOptions {
    /// Width of one scan window, epoch ms.
    pub window_ms: i64,
    /// Activities per batch (one transaction each).
    pub batch_size: usize,
    /// Maximum activities read per window before truncating.
    pub page_ceiling: usize,
}

impl BackfillOptions {
    #[must_use]
    pub fn with_window_days(mut self, days: u32) -> Self {
        self.window_ms = DAY_MS.saturating_mul(i64::from(days));
        self
    }
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            window_ms: DAY_MS,
            batch_size: 500,
            page_ceiling: crate::summary::DEFAULT_PAGE_CEILING,
        }
    }
}

/// Counters returned by a backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillStats {
    pub code_systems: usize,
    pub windows: usize,
    pub scanned: usize,
    pub updated: usize,
    pub truncated_windows: usize,
    pub cancelled: bool,
}

/// Backfill runner bound to one store connection.
pub struct Backfill<'conn> {
    conn: &'conn Connection,
    options: BackfillOptions,
    token: CancellationToken,
    now: Option<i64>,
}

impl<'conn> Backfill<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection, options: BackfillOptions, token: CancellationToken) -> Self {
        Self {
            conn,
            options,
            token,
            now: None,
        }
    }

    /// Pin the end of the scan (epoch ms) instead of reading the clock.
    #[must_use]
    pub const fn with_now(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    /// Recover promotion fields for unpromoted non-rebase activities.
    ///
    /// # Errors
    ///
    /// Returns an error if a store query or write fails. Batches committed
    /// before the failure stay committed.
    pub fn run_promotion_dates(&self) -> Result<BackfillStats> {
        let now = self.now.unwrap_or_else(|| Utc::now().timestamp_millis());
        let window_ms = self.options.window_ms.max(1);
        let lookup = StoreLookup::new(self.conn);
        let mut stats = BackfillStats::default();

        'systems: for code_system in code_system_branches(self.conn)? {
            stats.code_systems += 1;
            let version = latest_version_date(self.conn, &code_system, now)?;
            let Some(first) = first_commit_below(self.conn, &code_system)? else {
                debug!(branch = %code_system, "no activity below code system");
                continue;
            };
            let mut window_start = version.map_or(first, |v| v.max(first));
            info!(branch = %code_system, start = window_start, "backfilling promotion dates");

            while window_start <= now {
                let window_end = window_start.saturating_add(window_ms);
                stats.windows += 1;
                if !self.scan_window(&lookup, &code_system, window_start, window_end, &mut stats)? {
                    stats.cancelled = true;
                    break 'systems;
                }
                window_start = window_end;
            }
        }

        log_finished("promotion dates", &stats);
        Ok(stats)
    }

    /// Returns `false` when cancelled.
    fn scan_window(
        &self,
        lookup: &StoreLookup<'_>,
        code_system: &str,
        from: i64,
        until: i64,
        stats: &mut BackfillStats,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities a
             WHERE a.promotion_date IS NULL AND a.activity_type <> 'REBASE'
               AND substr(a.branch, 1, length(?1) + 1) = ?1 || '/'
               AND a.commit_date >= ?2 AND a.commit_date < ?3
               AND a.activity_id > ?4
             ORDER BY a.activity_id LIMIT ?5"
        );
        let limit = i64::try_from(self.options.batch_size.max(1)).unwrap_or(i64::MAX);
        let mut after_id = String::new();
        let mut read = 0_usize;

        loop {
            if self.token.is_cancelled() {
                return Ok(false);
            }
            let batch = collect_activities(
                self.conn,
                &sql,
                params![code_system, from, until, after_id, limit],
            )?;
            let Some(last) = batch.last() else {
                break;
            };
            after_id.clone_from(&last.id);
            read += batch.len();
            let exhausted = batch.len() < self.options.batch_size.max(1);

            let owned: Vec<Activity> = batch
                .into_iter()
                .filter(|a| branch::code_system_root(&a.branch) == code_system)
                .collect();
            self.apply_batch(lookup, &owned, stats)?;

            if read >= self.options.page_ceiling {
                warn!(
                    branch = code_system,
                    from,
                    until,
                    ceiling = self.options.page_ceiling,
                    "backfill window exceeded page ceiling; proceeding with truncated result"
                );
                stats.truncated_windows += 1;
                break;
            }
            if exhausted {
                break;
            }
        }
        Ok(true)
    }

    /// Repair `REBASE` activities with content that were never marked
    /// promoted.
    ///
    /// # Errors
    ///
    /// Returns an error if a store query or write fails.
    pub fn run_rebase_repair(&self) -> Result<BackfillStats> {
        let lookup = PrefetchedPromotions::load(self.conn)?;
        let sql = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities a
             WHERE a.promotion_date IS NULL AND a.activity_type = 'REBASE'
               AND EXISTS (SELECT 1 FROM component_changes c WHERE c.activity_id = a.activity_id)
               AND a.activity_id > ?1
             ORDER BY a.activity_id LIMIT ?2"
        );
        let limit = i64::try_from(self.options.batch_size.max(1)).unwrap_or(i64::MAX);
        let mut stats = BackfillStats::default();
        let mut after_id = String::new();

        loop {
            if self.token.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            let batch = collect_activities(self.conn, &sql, params![after_id, limit])?;
            let Some(last) = batch.last() else {
                break;
            };
            after_id.clone_from(&last.id);
            let exhausted = batch.len() < self.options.batch_size.max(1);
            self.apply_batch(&lookup, &batch, &mut stats)?;

            if stats.scanned >= self.options.page_ceiling {
                warn!(
                    ceiling = self.options.page_ceiling,
                    "rebase repair exceeded page ceiling; proceeding with truncated result"
                );
                stats.truncated_windows += 1;
                break;
            }
            if exhausted {
                break;
            }
        }

        log_finished("rebase repair", &stats);
        Ok(stats)
    }

    fn apply_batch(
        &self,
        lookup: &impl PromotionLookup,
        batch: &[Activity],
        stats: &mut BackfillStats,
    ) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin backfill batch")?;
        for activity in batch {
            stats.scanned += 1;
            let Some(resolution) = resolve_promotion(lookup, activity)? else {
                continue;
            };
            if set_promotion(
                &tx,
                &activity.id,
                &resolution.highest_promoted_branch,
                resolution.promotion_date,
            )? {
                stats.updated += 1;
                debug!(
                    activity_id = %activity.id,
                    highest_promoted_branch = %resolution.highest_promoted_branch,
                    promotion_date = ?resolution.promotion_date,
                    "backfilled promotion fields"
                );
            }
        }
        tx.commit().context("commit backfill batch")?;
        Ok(())
    }
}

fn log_finished(job: &str, stats: &BackfillStats) {
    info!(
        job,
        code_systems = stats.code_systems,
        windows = stats.windows,
        scanned = stats.scanned,
        updated = stats.updated,
        truncated_windows = stats.truncated_windows,
        cancelled = stats.cancelled,
        "backfill finished"
    );
}
