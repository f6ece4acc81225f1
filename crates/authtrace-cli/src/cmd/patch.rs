use anyhow::Result;
use authtrace_core::patch::{PatchRequest, PatchTarget, patch_component_changes};
use clap::Args;
use std::io::Write;

use super::Context;
use crate::output::{pretty_kv, render};

#[derive(Args, Debug)]
pub struct PatchArgs {
    /// Branch whose summary is corrected.
    pub branch: String,

    /// Component to force into the summary, as `TYPE:ID` (repeatable).
    #[arg(long, value_name = "TYPE:ID")]
    pub pending: Vec<PatchTarget>,

    /// Component to force out of the summary, as `TYPE:ID` (repeatable).
    #[arg(long, value_name = "TYPE:ID")]
    pub resolved: Vec<PatchTarget>,

    /// Author recorded on the synthetic activity.
    #[arg(long, default_value = "authtrace")]
    pub user: String,
}

/// Execute `authtrace patch`.
///
/// # Errors
///
/// Returns an error when no component is listed, the store is missing or
/// the write fails.
pub fn run_patch(args: &PatchArgs, ctx: &Context) -> Result<()> {
    let conn = ctx.open_existing()?;
    let request = PatchRequest {
        branch: args.branch.clone(),
        user: args.user.clone(),
        at: chrono::Utc::now().timestamp_millis(),
        pending: args.pending.clone(),
        resolved: args.resolved.clone(),
    };
    let activity = patch_component_changes(&conn, &request)?;

    render(ctx.output, &activity, |a, w| {
        writeln!(w, "Recorded {}", a.id)?;
        pretty_kv(w, "Branch", &a.branch)?;
        pretty_kv(w, "Pending", args.pending.len().to_string())?;
        pretty_kv(w, "Resolved", args.resolved.len().to_string())
    })
}
