use anyhow::Result;
use authtrace_core::db::migrations::current_schema_version;
use clap::Args;
use serde::Serialize;
use std::io::Write;

use super::Context;
use crate::output::{pretty_kv, render};

#[derive(Args, Debug)]
pub struct InitArgs {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitReport {
    store: String,
    created: bool,
    schema_version: u32,
}

/// Execute `authtrace init`: create the store when missing and migrate it
/// to the latest schema. Running it again is a no-op.
///
/// # Errors
///
/// Returns an error when the store cannot be created or migrated.
pub fn run_init(_args: &InitArgs, ctx: &Context) -> Result<()> {
    let created = !ctx.store_path.exists();
    let conn = ctx.open_or_create()?;
    let report = InitReport {
        store: ctx.store_path.display().to_string(),
        created,
        schema_version: current_schema_version(&conn)?,
    };

    render(ctx.output, &report, |r, w| {
        let verb = if r.created { "Created" } else { "Already initialized" };
        writeln!(w, "{verb}: {}", r.store)?;
        pretty_kv(w, "Schema version", r.schema_version.to_string())
    })
}
