use anyhow::{Context as _, Result};
use authtrace_core::ingest::{Consumer, LineSource};
use authtrace_core::lock::ConsumerLock;
use clap::Args;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use super::Context;
use crate::output::{fail, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Read events from a file instead of stdin.
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// How long to wait for another consumer to release the store.
    #[arg(long, value_name = "MS", default_value_t = 5_000)]
    pub lock_timeout_ms: u64,
}

/// Execute `authtrace ingest`.
///
/// Holds the consumer lock for the whole run so only one process records
/// activities into a store at a time.
///
/// # Errors
///
/// Returns an error when the lock is held elsewhere, the input cannot be
/// read, or a store failure outlasts the retry policy.
pub fn run_ingest(args: &IngestArgs, ctx: &Context) -> Result<()> {
    let lock = ConsumerLock::acquire(&ctx.store_path, Duration::from_millis(args.lock_timeout_ms))
        .map_err(|err| fail(ctx.output, err.code(), err.to_string()))?;
    let conn = ctx.open_or_create()?;
    let consumer = Consumer::new(&conn, ctx.config.ingest.retry_policy());

    let stats = match &args.file {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("open event file {}", path.display()))?;
            consumer.run(&mut LineSource::new(BufReader::new(file)))?
        }
        None => consumer.run(&mut LineSource::new(io::stdin().lock()))?,
    };
    lock.release();

    info!(
        recorded = stats.recorded,
        duplicates = stats.duplicates,
        dropped = stats.dropped,
        failed = stats.failed,
        "ingest finished"
    );

    render_mode(
        ctx.output,
        &stats,
        |s, w| {
            writeln!(
                w,
                "recorded={} duplicates={} dropped={} failed={}",
                s.recorded, s.duplicates, s.dropped, s.failed
            )
        },
        |s, w| {
            pretty_section(w, "Ingest")?;
            pretty_kv(w, "Recorded", s.recorded.to_string())?;
            pretty_kv(w, "Duplicates", s.duplicates.to_string())?;
            pretty_kv(w, "Dropped", s.dropped.to_string())?;
            pretty_kv(w, "Failed", s.failed.to_string())
        },
    )
}
