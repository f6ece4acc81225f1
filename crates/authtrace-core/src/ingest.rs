//! Commit ingestion: decode → classify → persist → propagate.
//!
//! Each message is handled inside one transaction. A failure anywhere rolls
//! the whole message back, so a redelivered message sees a store without
//! any trace of the failed attempt. Activity ids are content addresses, so
//! a message that already committed is recognised on redelivery and
//! acknowledged without re-running propagation.

use anyhow::Context;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::BufRead;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::record::insert_activity;
use crate::error::ErrorCode;
use crate::event::classify::classify;
use crate::event::{CommitEvent, DecodeError};
use crate::model::{Activity, ActivityType, UnknownToken};
use crate::promotion;

/// Failure while handling a single message.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed message: {0}")]
    Malformed(#[from] DecodeError),

    #[error("classification failed: {0}")]
    Classification(#[from] UnknownToken),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl IngestError {
    /// Store failures are transient; anything wrong with the message itself
    /// will fail the same way on every delivery.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed(_) => ErrorCode::MalformedMessage,
            Self::Classification(_) => ErrorCode::InvalidEnumValue,
            Self::Store(_) => ErrorCode::StoreWriteFailed,
        }
    }
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Recorded {
        activity_id: String,
        activity_type: ActivityType,
        /// Activities moved up by promotion propagation.
        promoted: usize,
    },
    Duplicate {
        activity_id: String,
    },
}

/// Single-message handler bound to one store connection.
pub struct Ingestor<'conn> {
    conn: &'conn Connection,
}

impl<'conn> Ingestor<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Decode, classify and record one raw message.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`]; nothing is persisted on error.
    pub fn ingest_message(&self, raw: &str) -> Result<IngestOutcome, IngestError> {
        let event = CommitEvent::decode(raw)?;
        let activity = classify(&event)?;
        self.record(&activity)
    }

    /// Persist a classified activity and apply its promotion effects in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Store`] if any write fails.
    pub fn record(&self, activity: &Activity) -> Result<IngestOutcome, IngestError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin ingest transaction")?;

        if !insert_activity(&tx, activity)? {
            tx.commit().context("commit duplicate ack")?;
            debug!(activity_id = %activity.id, "duplicate message acknowledged");
            return Ok(IngestOutcome::Duplicate {
                activity_id: activity.id.clone(),
            });
        }

        let promoted = match (activity.activity_type, activity.source_branch.as_deref()) {
            (ActivityType::Promotion, Some(source)) => {
                promotion::propagate(&tx, &activity.branch, source, activity.commit_date)?
            }
            _ => 0,
        };

        tx.commit().context("commit ingest transaction")?;

        info!(
            activity_id = %activity.id,
            activity_type = %activity.activity_type,
            branch = %activity.branch,
            source_branch = activity.source_branch.as_deref().unwrap_or(""),
            promoted,
            "recorded activity"
        );
        Ok(IngestOutcome::Recorded {
            activity_id: activity.id.clone(),
            activity_type: activity.activity_type,
            promoted,
        })
    }
}

// ---------------------------------------------------------------------------
// Message sources
// ---------------------------------------------------------------------------

/// A stream of raw messages, pulled one at a time.
pub trait MessageSource {
    /// Next raw message, or `None` when the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying transport fails.
    fn next_message(&mut self) -> anyhow::Result<Option<String>>;
}

/// Newline-delimited JSON reader. Blank lines are skipped.
pub struct LineSource<R> {
    reader: R,
    line_no: usize,
}

impl<R: BufRead> LineSource<R> {
    pub const fn new(reader: R) -> Self {
        Self { reader, line_no: 0 }
    }
}

impl<R: BufRead> MessageSource for LineSource<R> {
    fn next_message(&mut self) -> anyhow::Result<Option<String>> {
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .with_context(|| format!("read message line {}", self.line_no + 1))?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }
}

impl MessageSource for VecDeque<String> {
    fn next_message(&mut self) -> anyhow::Result<Option<String>> {
        Ok(self.pop_front())
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Redelivery policy for retryable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per message, including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Linear backoff: `backoff * attempt`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Per-run ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub recorded: usize,
    pub duplicates: usize,
    /// Non-retryable messages logged and dropped.
    pub dropped: usize,
    /// Retryable messages that exhausted their attempts.
    pub failed: usize,
}

/// Drives an [`Ingestor`] over a [`MessageSource`], one message at a time.
pub struct Consumer<'conn> {
    ingestor: Ingestor<'conn>,
    policy: RetryPolicy,
}

impl<'conn> Consumer<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection, policy: RetryPolicy) -> Self {
        Self {
            ingestor: Ingestor::new(conn),
            policy,
        }
    }

    /// Consume `source` until exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error only when the source itself fails; per-message
    /// failures are counted in the returned stats.
    pub fn run(&self, source: &mut impl MessageSource) -> anyhow::Result<IngestStats> {
        let mut stats = IngestStats::default();
        while let Some(raw) = source.next_message()? {
            self.handle(&raw, &mut stats);
        }
        info!(
            recorded = stats.recorded,
            duplicates = stats.duplicates,
            dropped = stats.dropped,
            failed = stats.failed,
            "ingestion finished"
        );
        Ok(stats)
    }

    fn handle(&self, raw: &str, stats: &mut IngestStats) {
        let mut attempt = 1;
        loop {
            match self.ingestor.ingest_message(raw) {
                Ok(IngestOutcome::Recorded { .. }) => {
                    stats.recorded += 1;
                    return;
                }
                Ok(IngestOutcome::Duplicate { .. }) => {
                    stats.duplicates += 1;
                    return;
                }
                Err(err) if !err.is_retryable() => {
                    warn!(code = err.code().code(), error = %err, "dropping message");
                    stats.dropped += 1;
                    return;
                }
                Err(err) if attempt >= self.policy.max_attempts => {
                    warn!(
                        code = err.code().code(),
                        attempts = attempt,
                        error = %err,
                        "message failed after retries"
                    );
                    stats.failed += 1;
                    return;
                }
                Err(err) => {
                    let delay = self.policy.delay(attempt);
                    debug!(attempt, ?delay, error = %err, "retrying message");
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
