use anyhow::Result;
use authtrace_core::backfill::{Backfill, CancellationToken};
use clap::Args;
use std::io::Write;
use std::time::Duration;

use super::Context;
use crate::output::{pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct BackfillArgs {
    /// Repair rebase activities that carry content instead of scanning
    /// code systems.
    #[arg(long)]
    pub rebase: bool,

    /// Scan window in days (default from `[backfill] window_days`).
    #[arg(long, value_name = "DAYS")]
    pub window_days: Option<u32>,

    /// Updates per transaction (default from `[backfill] batch_size`).
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Stop at the next batch boundary once this many seconds have passed.
    /// Committed batches are kept and a rerun picks up the rest.
    #[arg(long, value_name = "SECS")]
    pub max_seconds: Option<u64>,
}

/// Execute `authtrace backfill`.
///
/// # Errors
///
/// Returns an error when the store is missing or a batch fails. Batches
/// committed before the failure are kept.
pub fn run_backfill(args: &BackfillArgs, ctx: &Context) -> Result<()> {
    let conn = ctx.open_existing()?;
    let mut options = ctx.config.backfill_options();
    if let Some(days) = args.window_days {
        options = options.with_window_days(days);
    }
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size.max(1);
    }

    let token = CancellationToken::new();
    if let Some(secs) = args.max_seconds {
        token.cancel_after(Duration::from_secs(secs));
    }
    let job = Backfill::new(&conn, options, token);
    let stats = if args.rebase {
        job.run_rebase_repair()?
    } else {
        job.run_promotion_dates()?
    };

    render_mode(
        ctx.output,
        &stats,
        |s, w| {
            writeln!(
                w,
                "scanned={} updated={} windows={} truncated_windows={} cancelled={}",
                s.scanned, s.updated, s.windows, s.truncated_windows, s.cancelled
            )
        },
        |s, w| {
            pretty_section(w, if args.rebase { "Rebase repair" } else { "Promotion backfill" })?;
            pretty_kv(w, "Code systems", s.code_systems.to_string())?;
            pretty_kv(w, "Windows", s.windows.to_string())?;
            pretty_kv(w, "Scanned", s.scanned.to_string())?;
            pretty_kv(w, "Updated", s.updated.to_string())?;
            if s.truncated_windows > 0 {
                pretty_kv(w, "Truncated", s.truncated_windows.to_string())?;
            }
            if s.cancelled {
                pretty_kv(w, "Stopped", "time budget reached, rerun to continue")?;
            }
            Ok(())
        },
    )
}
