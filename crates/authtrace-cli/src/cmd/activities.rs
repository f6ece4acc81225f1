use anyhow::Result;
use authtrace_core::db::query::{ActivityFilter, ActivityPage, Page, find_activities};
use authtrace_core::model::{Activity, ActivityType};
use clap::Args;
use std::io::{self, Write};

use super::Context;
use crate::output::{format_timestamp, pretty_rule, render_mode};

#[derive(Args, Debug)]
pub struct ActivitiesArgs {
    /// Only activities recorded on this branch.
    #[arg(long)]
    pub branch: Option<String>,

    /// Only merges whose other side is this branch.
    #[arg(long)]
    pub source: Option<String>,

    /// Activity type (`CONTENT_CHANGE`, `PROMOTION`, `REBASE`, ...).
    #[arg(long = "type", value_name = "TYPE")]
    pub activity_type: Option<ActivityType>,

    /// Only activities touching this concept (repeatable).
    #[arg(long = "concept", value_name = "ID")]
    pub concepts: Vec<String>,

    #[arg(long)]
    pub user: Option<String>,

    #[arg(long, default_value_t = 50)]
    pub limit: u32,

    #[arg(long, default_value_t = 0)]
    pub offset: u32,
}

/// Execute `authtrace activities`.
///
/// # Errors
///
/// Returns an error when the store is missing or the query fails.
pub fn run_activities(args: &ActivitiesArgs, ctx: &Context) -> Result<()> {
    let conn = ctx.open_existing()?;
    let filter = ActivityFilter {
        branch: args.branch.clone(),
        source_branch: args.source.clone(),
        activity_type: args.activity_type,
        user: args.user.clone(),
        concept_ids: args.concepts.clone(),
    };
    let page = find_activities(
        &conn,
        &filter,
        Page {
            offset: args.offset,
            limit: args.limit,
        },
    )?;

    render_mode(ctx.output, &page, render_text, render_pretty)
}

/// One tab-separated line per activity.
pub fn write_activity_line(w: &mut dyn Write, activity: &Activity) -> io::Result<()> {
    writeln!(
        w,
        "{}\t{}\t{}\t{}\t{}",
        activity.id,
        activity.activity_type,
        activity.branch,
        activity.user,
        format_timestamp(activity.commit_date)
    )
}

fn render_text(page: &ActivityPage, w: &mut dyn Write) -> io::Result<()> {
    for activity in &page.activities {
        write_activity_line(w, activity)?;
    }
    Ok(())
}

fn render_pretty(page: &ActivityPage, w: &mut dyn Write) -> io::Result<()> {
    let offset = usize::try_from(page.offset).unwrap_or_default();
    writeln!(
        w,
        "Activities {}-{} of {}",
        (offset + 1).min(page.total),
        offset + page.activities.len(),
        page.total
    )?;
    pretty_rule(w)?;
    for activity in &page.activities {
        writeln!(
            w,
            "{}  {:<24} {}",
            activity.id, activity.activity_type, activity.branch
        )?;
        writeln!(
            w,
            "    by {} at {}, {} concept(s)",
            activity.user,
            format_timestamp(activity.commit_date),
            activity.concept_changes.len()
        )?;
        if let Some(source) = &activity.source_branch {
            writeln!(w, "    from {source}")?;
        }
        if let Some(date) = activity.promotion_date {
            writeln!(
                w,
                "    promoted to {} at {}",
                activity.highest_promoted_branch,
                format_timestamp(date)
            )?;
        }
    }
    Ok(())
}
