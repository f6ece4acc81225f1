//! Inbound commit event schema.
//!
//! One JSON object per message, decoded once at the boundary into
//! [`CommitEvent`]:
//!
//! ```text
//! {
//!   "userId": "alice",
//!   "commitComment": "...",
//!   "branchPath": "MAIN/PROJ/PROJ-1",
//!   "commitTimestamp": 1700000000000,
//!   "changes": {
//!     "<conceptId>": {
//!       "concept": { "descriptions": [...], "relationships": [...] },
//!       "changes": [
//!         { "componentId": "...", "componentType": "DESCRIPTION", "type": "UPDATE" }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Unknown fields are ignored. Component and change type tokens are kept as
//! raw strings here and parsed during classification so an unknown token
//! surfaces as a typed [`crate::model::UnknownToken`], not a generic JSON error.

pub mod classify;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::branch;

/// Highest event schema version this build decodes.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Errors raised while decoding a raw message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Not valid JSON, or a required field is missing or mistyped.
    #[error("invalid commit event JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required string field is empty.
    #[error("commit event field '{0}' is empty")]
    EmptyField(&'static str),

    /// A branch path (or a merge comment's source or destination) has an
    /// empty segment.
    #[error("commit event {field} '{path}' has an empty path segment")]
    MalformedBranch { field: &'static str, path: String },

    /// `commitTimestamp` does not map to a representable instant.
    #[error("commit timestamp {0} is out of range")]
    InvalidTimestamp(i64),

    /// The producer emitted a newer schema than this build understands.
    #[error("unsupported commit event schema version {0} (max {CURRENT_SCHEMA_VERSION})")]
    UnsupportedVersion(u32),
}

/// A decoded commit event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEvent {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub user_id: String,
    #[serde(default)]
    pub commit_comment: String,
    pub branch_path: String,
    /// Epoch milliseconds.
    pub commit_timestamp: i64,
    #[serde(default)]
    pub changes: BTreeMap<String, ConceptChangeEntry>,
}

const fn default_schema_version() -> u32 {
    1
}

impl CommitEvent {
    /// Decode and validate one raw message.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] for malformed JSON, empty required fields or
    /// branch segments, an unrepresentable timestamp, or an unsupported
    /// schema version.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let event: Self = serde_json::from_str(raw)?;
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(DecodeError::UnsupportedVersion(self.schema_version));
        }
        if self.user_id.trim().is_empty() {
            return Err(DecodeError::EmptyField("userId"));
        }
        if self.branch_path.trim().is_empty() {
            return Err(DecodeError::EmptyField("branchPath"));
        }
        check_branch("branchPath", &self.branch_path)?;
        if let Some(merge) = classify::parse_merge_comment(&self.commit_comment) {
            check_branch("merge source", &merge.source)?;
            check_branch("merge destination", &merge.destination)?;
        }
        self.commit_time()?;
        Ok(())
    }

    /// Commit time as a UTC instant.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidTimestamp`] when out of range.
    pub fn commit_time(&self) -> Result<DateTime<Utc>, DecodeError> {
        DateTime::from_timestamp_millis(self.commit_timestamp)
            .ok_or(DecodeError::InvalidTimestamp(self.commit_timestamp))
    }
}

fn check_branch(field: &'static str, path: &str) -> Result<(), DecodeError> {
    if branch::is_well_formed(path) {
        Ok(())
    } else {
        Err(DecodeError::MalformedBranch {
            field,
            path: path.to_string(),
        })
    }
}

/// Per-concept change entry: a concept snapshot plus the edits made.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptChangeEntry {
    #[serde(default)]
    pub concept: ConceptSnapshot,
    #[serde(default)]
    pub changes: Vec<RawComponentChange>,
}

/// One component edit as sent by the producer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawComponentChange {
    pub component_id: String,
    pub component_type: String,
    #[serde(rename = "type")]
    pub change_type: String,
    #[serde(default)]
    pub component_sub_type: Option<String>,
    /// Producer-supplied pending flag; overrides the snapshot lookup.
    #[serde(default)]
    pub effective_time_null: Option<bool>,
}

/// Concept snapshot used only to resolve sub types and effective times.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptSnapshot {
    #[serde(default)]
    pub concept_id: Option<String>,
    #[serde(default)]
    pub effective_time: Option<Value>,
    #[serde(default)]
    pub descriptions: Vec<DescriptionSnapshot>,
    #[serde(default)]
    pub relationships: Vec<RelationshipSnapshot>,
    #[serde(default)]
    pub class_axioms: Vec<AxiomSnapshot>,
    #[serde(default)]
    pub gci_axioms: Vec<AxiomSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionSnapshot {
    #[serde(alias = "id")]
    pub description_id: String,
    #[serde(rename = "type", default)]
    pub term_type: Option<String>,
    #[serde(default)]
    pub effective_time: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSnapshot {
    #[serde(alias = "id")]
    pub relationship_id: String,
    #[serde(default)]
    pub characteristic_type: Option<String>,
    #[serde(default)]
    pub effective_time: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxiomSnapshot {
    #[serde(alias = "id")]
    pub axiom_id: String,
    #[serde(default)]
    pub effective_time: Option<Value>,
}

/// True when a snapshot `effectiveTime` value denotes a published release.
#[must_use]
pub fn is_published(effective_time: Option<&Value>) -> bool {
    match effective_time {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}
