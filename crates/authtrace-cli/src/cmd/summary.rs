use anyhow::Result;
use authtrace_core::summary::{ChangeSummary, ChangeSummaryEngine, ComponentIdMap, SummaryRequest};
use clap::Args;
use std::io::{self, Write};

use super::{Context, Timestamp};
use crate::output::{format_timestamp, fail, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct SummaryArgs {
    /// Branch to report on.
    pub branch: String,

    /// Override the branch's baseline (epoch ms or RFC 3339).
    #[arg(long)]
    pub base: Option<Timestamp>,

    /// Upper bound of the report (epoch ms or RFC 3339; default now).
    #[arg(long)]
    pub head: Option<Timestamp>,

    /// Skip changes made directly on the branch.
    #[arg(long)]
    pub exclude_own: bool,

    /// Skip changes promoted into the branch from its children.
    #[arg(long)]
    pub exclude_promoted: bool,

    /// Skip changes inherited from ancestors.
    #[arg(long)]
    pub exclude_rebased: bool,
}

impl SummaryArgs {
    pub fn request(&self) -> SummaryRequest {
        SummaryRequest {
            branch: self.branch.clone(),
            base: self.base.map(|t| t.0),
            head: self.head.map(|t| t.0),
            include_own: !self.exclude_own,
            include_promoted_in: !self.exclude_promoted,
            include_inherited: !self.exclude_rebased,
        }
    }
}

/// Execute `authtrace summary`.
///
/// # Errors
///
/// Returns an error when the store is missing, the window is inverted or a
/// query fails.
pub fn run_summary(args: &SummaryArgs, ctx: &Context) -> Result<()> {
    let conn = ctx.open_existing()?;
    let engine = ChangeSummaryEngine::new(&conn).with_page_ceiling(ctx.config.store.page_ceiling);
    let summary = engine
        .summarize(&args.request())
        .map_err(|err| fail(ctx.output, err.code(), format!("{err:#}")))?;

    render_mode(
        ctx.output,
        &summary,
        |s, w| write_id_map(w, &s.component_changes),
        |s, w| render_pretty(&args.branch, s, w),
    )
}

/// `TYPE<TAB>id` lines, grouped by component type.
pub fn write_id_map(w: &mut dyn Write, ids: &ComponentIdMap) -> io::Result<()> {
    for (component_type, set) in ids {
        for id in set {
            writeln!(w, "{component_type}\t{id}")?;
        }
    }
    Ok(())
}

fn render_pretty(branch: &str, summary: &ChangeSummary, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Pending changes on {branch}"))?;
    if summary.component_changes.is_empty() {
        writeln!(w, "(none)")?;
    }
    for (component_type, ids) in &summary.component_changes {
        writeln!(w, "{component_type} ({})", ids.len())?;
        for id in ids {
            writeln!(w, "  {id}")?;
        }
    }
    if !summary.changes_not_at_task_level.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Content changes made outside a task")?;
        for activity in &summary.changes_not_at_task_level {
            writeln!(
                w,
                "{}  {} on {} at {}",
                activity.id,
                activity.user,
                activity.branch,
                format_timestamp(activity.commit_date)
            )?;
        }
    }
    if summary.truncated {
        writeln!(w)?;
        writeln!(w, "warning: a query hit the page ceiling; the report may be incomplete")?;
    }
    Ok(())
}
