use anyhow::Result;
use authtrace_core::split::split_large_activities;
use clap::Args;
use std::io::Write;

use super::Context;
use crate::output::render;

#[derive(Args, Debug)]
pub struct SplitArgs {
    /// Concept limit per activity (default from `[split] max_concepts`).
    #[arg(long, value_name = "N")]
    pub max_concepts: Option<usize>,
}

/// Execute `authtrace split`.
///
/// # Errors
///
/// Returns an error when the store is missing or a rewrite fails.
pub fn run_split(args: &SplitArgs, ctx: &Context) -> Result<()> {
    let conn = ctx.open_existing()?;
    let max_concepts = args.max_concepts.unwrap_or(ctx.config.split.max_concepts);
    let stats = split_large_activities(&conn, max_concepts)?;

    render(ctx.output, &stats, |s, w| {
        writeln!(
            w,
            "Split {} activities into {} (limit {max_concepts} concepts)",
            s.split, s.created
        )
    })
}
