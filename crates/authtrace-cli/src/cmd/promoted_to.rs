use anyhow::Result;
use authtrace_core::db::query::find_by_highest_promoted_branch;
use clap::Args;
use std::io::Write;

use super::Context;
use super::activities::write_activity_line;
use crate::output::{format_timestamp, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct PromotedToArgs {
    /// Branch the activities were promoted up to.
    pub branch: String,
}

/// Execute `authtrace promoted-to`.
///
/// # Errors
///
/// Returns an error when the store is missing or the query fails.
pub fn run_promoted_to(args: &PromotedToArgs, ctx: &Context) -> Result<()> {
    let conn = ctx.open_existing()?;
    let activities = find_by_highest_promoted_branch(&conn, &args.branch)?;

    render_mode(
        ctx.output,
        &activities,
        |list, w| {
            for activity in list {
                write_activity_line(w, activity)?;
            }
            Ok(())
        },
        |list, w| {
            pretty_section(w, &format!("Promoted to {} ({})", args.branch, list.len()))?;
            for activity in list {
                let promoted = activity
                    .promotion_date
                    .map_or_else(|| "-".to_string(), format_timestamp);
                writeln!(
                    w,
                    "{}  {:<16} from {:<32} promoted {promoted}",
                    activity.id, activity.user, activity.branch
                )?;
            }
            Ok(())
        },
    )
}
