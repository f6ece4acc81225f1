//! authtrace-core library.
//!
//! Records authoring commits made against a terminology branch hierarchy
//! and answers "what is pending on branch X since it last synchronised?".
//!
//! Flow: raw commit event → [`event::classify`] → [`ingest::Ingestor`]
//! (persist + [`promotion::propagate`]) → [`summary::ChangeSummaryEngine`]
//! for reports, [`archive`] to reconcile against an exported delta and
//! [`backfill`] to repair history recorded before promotion tracking.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums at module boundaries, `anyhow::Result`
//!   with `.context` for store plumbing.
//! - **Logging**: `tracing` macros with structured fields (`activity_id`,
//!   `branch`, `source_branch`).
//! - **Time**: epoch milliseconds (`i64`) everywhere.

pub mod archive;
pub mod backfill;
pub mod branch;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod ingest;
pub mod lock;
pub mod model;
pub mod patch;
pub mod promotion;
pub mod split;
pub mod summary;
