//! Change summary engine.
//!
//! Answers "which components have a pending (unreleased) change visible on
//! branch X since it last synchronised with its ancestors?" by replaying
//! three slices of history in order:
//!
//! 1. **inherited**: for each ancestor, farthest first, what that ancestor
//!    had received up to the point the level below last rebased onto it or
//!    promoted into it;
//! 2. **own-branch**: commits on X not yet promoted away;
//! 3. **promoted-in**: content promoted up into X from descendants.
//!
//! Own-branch and promoted-in activities are interleaved by the time they
//! became visible on X (commit date and promotion date respectively).
//! Every component change either adds its id (pending create/update/
//! inactivate) or removes it (delete, or a change back to a released
//! state); the last effect seen wins.

use anyhow::Context;
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

use crate::branch;
use crate::db::query::{
    Window, first_commit_date, latest_promotion_from, latest_sync_date, latest_version_date,
    window_activities,
};
use crate::error::ErrorCode;
use crate::model::{Activity, ActivityType, ComponentType};

/// Default maximum rows a single window query returns.
pub const DEFAULT_PAGE_CEILING: usize = 10_000;

/// Component ids grouped by component type.
pub type ComponentIdMap = BTreeMap<ComponentType, BTreeSet<String>>;

/// Failure while computing a summary.
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("base timestamp {base} is after head timestamp {head}")]
    InvalidWindow { base: i64, head: i64 },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl SummaryError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidWindow { .. } => ErrorCode::InvalidTimeWindow,
            Self::Store(_) => ErrorCode::StoreUnavailable,
        }
    }
}

/// Parameters of one summary report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRequest {
    pub branch: String,
    /// Overrides the computed baseline of the target branch.
    pub base: Option<i64>,
    /// Upper bound of every window; defaults to now.
    pub head: Option<i64>,
    pub include_own: bool,
    pub include_promoted_in: bool,
    pub include_inherited: bool,
}

impl SummaryRequest {
    /// A request over all three sources with no explicit bounds.
    #[must_use]
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            base: None,
            head: None,
            include_own: true,
            include_promoted_in: true,
            include_inherited: true,
        }
    }

    #[must_use]
    pub const fn with_base(mut self, base: i64) -> Self {
        self.base = Some(base);
        self
    }

    #[must_use]
    pub const fn with_head(mut self, head: i64) -> Self {
        self.head = Some(head);
        self
    }
}

/// Summary report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    /// Ids with a pending net change; empty types are omitted.
    pub component_changes: ComponentIdMap,
    /// Contributing `CONTENT_CHANGE` activities made outside a task branch.
    pub changes_not_at_task_level: Vec<Activity>,
    /// At least one window hit the page ceiling.
    pub truncated: bool,
}

#[derive(Default)]
struct Accumulator {
    ids: ComponentIdMap,
    anomalies: Vec<Activity>,
    seen_anomalies: HashSet<String>,
    truncated: bool,
}

impl Accumulator {
    fn apply(&mut self, activity: Activity) {
        for (_, change) in activity.component_changes() {
            let ids = self.ids.entry(change.component_type).or_default();
            if change.marks_pending() {
                ids.insert(change.component_id.clone());
            } else {
                ids.remove(&change.component_id);
            }
        }

        if activity.activity_type == ActivityType::ContentChange
            && activity.component_change_count() > 0
            && branch::depth(&activity.branch) != branch::TASK_DEPTH
            && self.seen_anomalies.insert(activity.id.clone())
        {
            self.anomalies.push(activity);
        }
    }

    fn finish(mut self) -> ChangeSummary {
        self.ids.retain(|_, ids| !ids.is_empty());
        ChangeSummary {
            component_changes: self.ids,
            changes_not_at_task_level: self.anomalies,
            truncated: self.truncated,
        }
    }
}

/// Report engine over a store connection.
pub struct ChangeSummaryEngine<'conn> {
    conn: &'conn Connection,
    page_ceiling: usize,
    now: Option<i64>,
}

impl<'conn> ChangeSummaryEngine<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            page_ceiling: DEFAULT_PAGE_CEILING,
            now: None,
        }
    }

    #[must_use]
    pub const fn with_page_ceiling(mut self, page_ceiling: usize) -> Self {
        self.page_ceiling = page_ceiling;
        self
    }

    /// Pin "now" (epoch ms) instead of reading the wall clock.
    #[must_use]
    pub const fn with_now(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> i64 {
        self.now.unwrap_or_else(|| Utc::now().timestamp_millis())
    }

    /// Compute the summary for `request`.
    ///
    /// All reads run in one transaction so the report sees a single
    /// snapshot of the store.
    ///
    /// # Errors
    ///
    /// Returns [`SummaryError::InvalidWindow`] when `base > head`, or
    /// [`SummaryError::Store`] when a query fails.
    pub fn summarize(&self, request: &SummaryRequest) -> Result<ChangeSummary, SummaryError> {
        let head = request.head.unwrap_or_else(|| self.now());
        if let Some(base) = request.base {
            if base > head {
                return Err(SummaryError::InvalidWindow { base, head });
            }
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin summary read")?;
        let target = request.branch.as_str();
        let mut acc = Accumulator::default();

        if request.include_inherited && !branch::is_code_system_root(target) {
            for activity in self.inherited(&tx, target, head, &mut acc.truncated)? {
                acc.apply(activity);
            }
        }

        let baseline = match request.base {
            Some(base) => base,
            None => baseline(&tx, target, head)?,
        };
        let visible = self.visible_on(
            &tx,
            target,
            baseline,
            head,
            request.include_own,
            request.include_promoted_in,
            &mut acc.truncated,
        )?;
        for activity in visible {
            acc.apply(activity);
        }

        drop(tx);
        let summary = acc.finish();
        debug!(
            branch = target,
            baseline,
            head,
            types = summary.component_changes.len(),
            truncated = summary.truncated,
            "computed change summary"
        );
        Ok(summary)
    }

    /// Own-branch and promoted-in activities of `branch` in `(after, until]`
    /// in the order they became visible on it.
    #[allow(clippy::too_many_arguments)]
    fn visible_on(
        &self,
        conn: &Connection,
        branch: &str,
        after: i64,
        until: i64,
        own: bool,
        promoted_in: bool,
        truncated: &mut bool,
    ) -> anyhow::Result<Vec<Activity>> {
        let mut keyed: Vec<(i64, Activity)> = Vec::new();

        if own {
            let rows =
                window_activities(conn, Window::OwnBranch, branch, after, until, self.page_ceiling)?;
            *truncated |= rows.truncated;
            keyed.extend(rows.activities.into_iter().map(|a| (a.commit_date, a)));
        }
        if promoted_in {
            let rows = window_activities(
                conn,
                Window::PromotedIn,
                branch,
                after,
                until,
                self.page_ceiling,
            )?;
            *truncated |= rows.truncated;
            keyed.extend(
                rows.activities
                    .into_iter()
                    .map(|a| (a.promotion_date.unwrap_or(a.commit_date), a)),
            );
        }

        keyed.sort_by(|(at_a, a), (at_b, b)| {
            at_a.cmp(at_b)
                .then(a.commit_date.cmp(&b.commit_date))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(keyed.into_iter().map(|(_, activity)| activity).collect())
    }

    /// Content `target` inherited from its ancestors, farthest ancestor
    /// first.
    ///
    /// Activities authored on `target` or below it are skipped: once
    /// promoted they are that subtree's own history, not inherited content.
    fn inherited(
        &self,
        conn: &Connection,
        target: &str,
        head: i64,
        truncated: &mut bool,
    ) -> anyhow::Result<Vec<Activity>> {
        let mut per_level: Vec<Vec<Activity>> = Vec::new();
        let mut child = target;

        for ancestor in branch::ancestors(target) {
            let reference = reference_date(conn, child, head)?;
            let ancestor_baseline = baseline(conn, ancestor, reference)?;
            let level = self
                .visible_on(conn, ancestor, ancestor_baseline, reference, true, true, truncated)?
                .into_iter()
                .filter(|a| a.branch != target && !branch::is_ancestor(target, &a.branch))
                .collect::<Vec<_>>();

            debug!(
                branch = target,
                ancestor,
                reference,
                baseline = ancestor_baseline,
                activities = level.len(),
                "collected inherited level"
            );
            per_level.push(level);

            if branch::is_code_system_root(ancestor) {
                break;
            }
            child = ancestor;
        }

        Ok(per_level.into_iter().rev().flatten().collect())
    }
}

/// Per-branch baseline strictly before `before`: the last version for a
/// code-system root, else the last promotion out of the branch. Falls back
/// to the epoch when neither exists.
///
/// # Errors
///
/// Returns an error if the lookup fails.
pub fn baseline(conn: &Connection, branch: &str, before: i64) -> anyhow::Result<i64> {
    let found = if branch::is_code_system_root(branch) {
        latest_version_date(conn, branch, before)?
    } else {
        latest_promotion_from(conn, branch, before)?
    };
    Ok(found.unwrap_or_else(|| {
        debug!(branch, before, "no baseline event found; using epoch");
        0
    }))
}

/// Best guess at when `child` last synchronised with its parent, bounded by
/// `head`.
fn reference_date(conn: &Connection, child: &str, head: i64) -> anyhow::Result<i64> {
    if let Some(sync) = latest_sync_date(conn, child, head)? {
        return Ok(sync);
    }
    Ok(first_commit_date(conn, child)?.map_or(head, |first| first.min(head)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::db::record::insert_activity;
    use crate::ingest::Ingestor;
    use crate::model::{ChangeType, ComponentChange, ConceptChange};

    const NOW: i64 = 1_000_000;

    fn change(
        id: &str,
        branch: &str,
        date: i64,
        component: (&str, ComponentType),
        change_type: ChangeType,
        pending: bool,
    ) -> Activity {
        let mut concept = ConceptChange::new(component.0);
        concept.add_first(ComponentChange::new(component.0, change_type, component.1, pending));
        Activity::new(id, "alice", branch, ActivityType::ContentChange, date)
            .with_concept_changes(vec![concept])
    }

    fn create(id: &str, branch: &str, date: i64, concept: &str) -> Activity {
        change(id, branch, date, (concept, ComponentType::Concept), ChangeType::Create, true)
    }

    fn merge(id: &str, ty: ActivityType, branch: &str, source: &str, date: i64) -> Activity {
        Activity::new(id, "bob", branch, ty, date).with_source_branch(source)
    }

    fn concepts(summary: &ChangeSummary) -> Vec<&str> {
        summary
            .component_changes
            .get(&ComponentType::Concept)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    fn summarize(conn: &Connection, branch: &str) -> ChangeSummary {
        ChangeSummaryEngine::new(conn)
            .with_now(NOW)
            .summarize(&SummaryRequest::new(branch))
            .expect("summary")
    }

    #[test]
    fn promoted_content_moves_to_parent() -> anyhow::Result<()> {
        let conn = open_in_memory()?;
        let ingestor = Ingestor::new(&conn);
        ingestor.record(&create("act-1", "MAIN/PROJ/PROJ-1", 1_000, "100005"))?;
        ingestor.record(&merge("act-2", ActivityType::Promotion, "MAIN/PROJ", "MAIN/PROJ/PROJ-1", 2_000))?;

        let parent = summarize(&conn, "MAIN/PROJ");
        assert_eq!(concepts(&parent), vec!["100005"]);
        assert!(parent.changes_not_at_task_level.is_empty());

        let task = summarize(&conn, "MAIN/PROJ/PROJ-1");
        assert!(task.component_changes.is_empty());
        Ok(())
    }

    #[test]
    fn later_delete_and_release_remove_ids() -> anyhow::Result<()> {
        let conn = open_in_memory()?;
        let task = "MAIN/PROJ/PROJ-1";
        insert_activity(&conn, &create("act-1", task, 100, "1001"))?;
        insert_activity(&conn, &create("act-2", task, 110, "1002"))?;
        insert_activity(&conn, &create("act-3", task, 120, "1003"))?;
        insert_activity(
            &conn,
            &change("act-4", task, 200, ("1001", ComponentType::Concept), ChangeType::Delete, true),
        )?;
        insert_activity(
            &conn,
            &change("act-5", task, 210, ("1002", ComponentType::Concept), ChangeType::Update, false),
        )?;

        assert_eq!(concepts(&summarize(&conn, task)), vec!["1003"]);
        Ok(())
    }

    #[test]
    fn empty_types_are_dropped() -> anyhow::Result<()> {
        let conn = open_in_memory()?;
        let task = "MAIN/PROJ/PROJ-1";
        insert_activity(
            &conn,
            &change("act-1", task, 100, ("2001", ComponentType::Description), ChangeType::Create, true),
        )?;
        insert_activity(
            &conn,
            &change("act-2", task, 200, ("2001", ComponentType::Description), ChangeType::Delete, true),
        )?;
        let summary = summarize(&conn, task);
        assert!(summary.component_changes.is_empty());
        Ok(())
    }

    #[test]
    fn rebase_inherits_parent_content_up_to_sync_point() -> anyhow::Result<()> {
        let conn = open_in_memory()?;
        let ingestor = Ingestor::new(&conn);
        ingestor.record(&create("act-1", "MAIN/PROJ/PROJ-1", 1_000, "1001"))?;
        ingestor.record(&merge("act-2", ActivityType::Promotion, "MAIN/PROJ", "MAIN/PROJ/PROJ-1", 2_000))?;
        ingestor.record(&merge("act-3", ActivityType::Rebase, "MAIN/PROJ/PROJ-2", "MAIN/PROJ", 3_000))?;
        ingestor.record(&create("act-4", "MAIN/PROJ", 4_000, "1004"))?;
        ingestor.record(&create("act-5", "MAIN/PROJ/PROJ-2", 5_000, "1005"))?;

        let summary = summarize(&conn, "MAIN/PROJ/PROJ-2");
        assert_eq!(concepts(&summary), vec!["1001", "1005"]);

        let mut own_only = SummaryRequest::new("MAIN/PROJ/PROJ-2");
        own_only.include_inherited = false;
        let summary = ChangeSummaryEngine::new(&conn)
            .with_now(NOW)
            .summarize(&own_only)
            .expect("summary");
        assert_eq!(concepts(&summary), vec!["1005"]);
        Ok(())
    }

    #[test]
    fn inheritance_stops_at_extension_root() -> anyhow::Result<()> {
        let conn = open_in_memory()?;
        let ingestor = Ingestor::new(&conn);
        ingestor.record(&create("act-1", "MAIN", 1_000, "1001"))?;
        ingestor.record(&create("act-2", "MAIN/SNOMEDCT-BE", 2_000, "2001"))?;
        ingestor.record(&merge(
            "act-3",
            ActivityType::Rebase,
            "MAIN/SNOMEDCT-BE/BE",
            "MAIN/SNOMEDCT-BE",
            3_000,
        ))?;
        ingestor.record(&merge(
            "act-4",
            ActivityType::Rebase,
            "MAIN/SNOMEDCT-BE/BE/BE-1",
            "MAIN/SNOMEDCT-BE/BE",
            4_000,
        ))?;

        let summary = summarize(&conn, "MAIN/SNOMEDCT-BE/BE/BE-1");
        assert_eq!(concepts(&summary), vec!["2001"]);
        Ok(())
    }

    #[test]
    fn code_system_root_starts_at_last_version() -> anyhow::Result<()> {
        let conn = open_in_memory()?;
        insert_activity(&conn, &create("act-1", "MAIN", 4_000, "1001"))?;
        insert_activity(
            &conn,
            &Activity::new("act-2", "admin", "MAIN", ActivityType::CreateCodeSystemVersion, 5_000),
        )?;
        insert_activity(&conn, &create("act-3", "MAIN", 6_000, "1003"))?;

        let summary = summarize(&conn, "MAIN");
        assert_eq!(concepts(&summary), vec!["1003"]);
        let anomalies: Vec<&str> = summary
            .changes_not_at_task_level
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(anomalies, vec!["act-3"]);
        Ok(())
    }

    #[test]
    fn explicit_base_and_head_bound_the_window() -> anyhow::Result<()> {
        let conn = open_in_memory()?;
        let task = "MAIN/PROJ/PROJ-1";
        insert_activity(&conn, &create("act-1", task, 100, "1001"))?;
        insert_activity(&conn, &create("act-2", task, 200, "1002"))?;
        insert_activity(&conn, &create("act-3", task, 300, "1003"))?;

        let engine = ChangeSummaryEngine::new(&conn).with_now(NOW);
        let summary = engine.summarize(&SummaryRequest::new(task).with_base(100).with_head(200))?;
        assert_eq!(concepts(&summary), vec!["1002"]);

        let err = engine
            .summarize(&SummaryRequest::new(task).with_base(300).with_head(200))
            .expect_err("inverted window");
        assert!(matches!(err, SummaryError::InvalidWindow { base: 300, head: 200 }));
        assert_eq!(err.code(), ErrorCode::InvalidTimeWindow);
        Ok(())
    }

    #[test]
    fn page_ceiling_truncates_and_flags() -> anyhow::Result<()> {
        let conn = open_in_memory()?;
        let task = "MAIN/PROJ/PROJ-1";
        insert_activity(&conn, &create("act-1", task, 100, "1001"))?;
        insert_activity(&conn, &create("act-2", task, 200, "1002"))?;

        let summary = ChangeSummaryEngine::new(&conn)
            .with_now(NOW)
            .with_page_ceiling(1)
            .summarize(&SummaryRequest::new(task))?;
        assert!(summary.truncated);
        assert_eq!(concepts(&summary), vec!["1001"]);
        Ok(())
    }

    #[test]
    fn serializes_report_shape() -> anyhow::Result<()> {
        let conn = open_in_memory()?;
        insert_activity(&conn, &create("act-1", "MAIN/PROJ/PROJ-1", 100, "100005"))?;
        let json = serde_json::to_value(summarize(&conn, "MAIN/PROJ/PROJ-1"))?;
        assert_eq!(json["componentChanges"]["CONCEPT"][0], "100005");
        assert!(json["changesNotAtTaskLevel"].as_array().is_some_and(Vec::is_empty));
        Ok(())
    }
}
