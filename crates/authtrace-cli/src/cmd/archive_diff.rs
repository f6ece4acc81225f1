use anyhow::Result;
use authtrace_core::archive::archive_diff;
use authtrace_core::error::ErrorCode;
use authtrace_core::summary::ChangeSummaryEngine;
use clap::Args;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;

use super::summary::{SummaryArgs, write_id_map};
use super::Context;
use crate::output::{fail, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ArchiveDiffArgs {
    #[command(flatten)]
    pub summary: SummaryArgs,

    /// Delta archive (zip of tab-separated files).
    pub archive: PathBuf,
}

/// Execute `authtrace archive-diff`.
///
/// # Errors
///
/// Returns an error when the store is missing, the archive is unreadable or
/// the summary fails.
pub fn run_archive_diff(args: &ArchiveDiffArgs, ctx: &Context) -> Result<()> {
    let conn = ctx.open_existing()?;
    let file = File::open(&args.archive).map_err(|err| {
        fail(
            ctx.output,
            ErrorCode::ArchiveUnreadable,
            format!("{}: {err}", args.archive.display()),
        )
    })?;
    let engine = ChangeSummaryEngine::new(&conn).with_page_ceiling(ctx.config.store.page_ceiling);
    let result = archive_diff(&engine, &args.summary.request(), BufReader::new(file))
        .map_err(|err| fail(ctx.output, err.code(), format!("{err:#}")))?;

    render_mode(
        ctx.output,
        &result,
        |d, w| {
            for (label, ids) in [
                ("missing-from-delta", &d.missing_from_delta),
                ("missing-from-store", &d.missing_from_store),
            ] {
                for (component_type, set) in ids {
                    for id in set {
                        writeln!(w, "{label}\t{component_type}\t{id}")?;
                    }
                }
            }
            Ok(())
        },
        |d, w| {
            if d.is_empty() {
                return writeln!(w, "Archive matches the summary of {}", args.summary.branch);
            }
            pretty_section(w, "Pending in store, absent from archive")?;
            write_id_map(w, &d.missing_from_delta)?;
            writeln!(w)?;
            pretty_section(w, "In archive, not pending in store")?;
            write_id_map(w, &d.missing_from_store)
        },
    )
}
