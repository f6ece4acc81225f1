#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::Context;
use output::OutputMode;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "authtrace: authoring activity store and branch change summaries",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ./authtrace.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Activity store path; overrides `[store] path` from the config.
    #[arg(long, global = true, value_name = "PATH")]
    store: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Store",
        about = "Create the activity store",
        long_about = "Create the activity store (and its parent directory) and apply schema migrations.",
        after_help = "EXAMPLES:\n    # Initialize the store from authtrace.toml\n    authtrace init\n\n    # Initialize a store at an explicit path\n    authtrace --store /var/lib/authtrace/activities.db init"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Store",
        about = "Ingest newline-delimited commit events",
        long_about = "Consume commit events (one JSON object per line) from stdin or a file, classify them, record activities and propagate promotions.",
        after_help = "EXAMPLES:\n    # Consume events piped from a broker bridge\n    event-bridge | authtrace ingest\n\n    # Replay a captured file\n    authtrace ingest --file commits.ndjson --json"
    )]
    Ingest(cmd::ingest::IngestArgs),

    #[command(
        next_help_heading = "Read",
        about = "List recorded activities",
        long_about = "List activities newest first, filtered by branch, type, user or touched concepts.",
        after_help = "EXAMPLES:\n    # Promotions into a project\n    authtrace activities --branch MAIN/PROJ --type PROMOTION\n\n    # Activities touching a concept\n    authtrace activities --concept 100005 --json"
    )]
    Activities(cmd::activities::ActivitiesArgs),

    #[command(
        next_help_heading = "Read",
        about = "List activities promoted up to a branch",
        long_about = "List activities whose highest promoted branch is exactly the given branch.",
        after_help = "EXAMPLES:\n    authtrace promoted-to MAIN/PROJ"
    )]
    PromotedTo(cmd::promoted_to::PromotedToArgs),

    #[command(
        next_help_heading = "Reports",
        about = "Summarize pending changes on a branch",
        long_about = "Report the components with unpublished changes on a branch since it last synchronised, grouped by component type.",
        after_help = "EXAMPLES:\n    # Everything pending on a task\n    authtrace summary MAIN/PROJ/PROJ-1\n\n    # Only the task's own work, bounded by a head date\n    authtrace summary MAIN/PROJ/PROJ-1 --exclude-promoted --exclude-rebased --head 2024-03-01T00:00:00Z\n\n    # Emit machine-readable output\n    authtrace summary MAIN/PROJ --json"
    )]
    Summary(cmd::summary::SummaryArgs),

    #[command(
        next_help_heading = "Reports",
        about = "Compare a branch summary with a delta archive",
        long_about = "Compare the component ids in a branch's change summary with those in an exported delta archive (zip of tab-separated files).",
        after_help = "EXAMPLES:\n    authtrace archive-diff MAIN/PROJ delta.zip --json"
    )]
    ArchiveDiff(cmd::archive_diff::ArchiveDiffArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Backfill promotion dates",
        long_about = "Derive highest promoted branch and promotion date for activities recorded before promotion tracking. With --rebase, repair rebase activities that carry content. With --max-seconds, stop between batches once the budget is spent; committed batches are kept.",
        after_help = "EXAMPLES:\n    # Day-by-day scan of every code system\n    authtrace backfill\n\n    # Week-sized windows\n    authtrace backfill --window-days 7\n\n    # Repair rebase activities\n    authtrace backfill --rebase\n\n    # Spend at most ten minutes\n    authtrace backfill --max-seconds 600"
    )]
    Backfill(cmd::backfill::BackfillArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Split oversized activities",
        long_about = "Replace activities touching more concepts than the limit with several smaller activities.",
        after_help = "EXAMPLES:\n    authtrace split --max-concepts 500"
    )]
    Split(cmd::split::SplitArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Force components into or out of a summary",
        long_about = "Record a synthetic content change on a branch that marks components pending or resolved.",
        after_help = "EXAMPLES:\n    authtrace patch MAIN/PROJ --pending DESCRIPTION:1000014 --resolved CONCEPT:100005"
    )]
    Patch(cmd::patch::PatchArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("AUTHTRACE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "authtrace=debug,info"
        } else {
            "authtrace=info,warn"
        })
    });

    let format = env::var("AUTHTRACE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command output
    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let output = cli.output_mode();
    let ctx = Context::resolve(cli.config.as_deref(), cli.store.as_deref(), output)?;

    match cli.command {
        Commands::Init(ref args) => cmd::init::run_init(args, &ctx),
        Commands::Ingest(ref args) => cmd::ingest::run_ingest(args, &ctx),
        Commands::Activities(ref args) => cmd::activities::run_activities(args, &ctx),
        Commands::PromotedTo(ref args) => cmd::promoted_to::run_promoted_to(args, &ctx),
        Commands::Summary(ref args) => cmd::summary::run_summary(args, &ctx),
        Commands::ArchiveDiff(ref args) => cmd::archive_diff::run_archive_diff(args, &ctx),
        Commands::Backfill(ref args) => cmd::backfill::run_backfill(args, &ctx),
        Commands::Split(ref args) => cmd::split::run_split(args, &ctx),
        Commands::Patch(ref args) => cmd::patch::run_patch(args, &ctx),
    }
}
