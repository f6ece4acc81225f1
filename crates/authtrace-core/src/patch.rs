//! Manual correction of summary state.
//!
//! Records one synthetic `CONTENT_CHANGE` that forces listed components
//! into (pending) or out of (resolved) a branch's change summary.

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::branch;
use crate::db::record::insert_activity;
use crate::model::{
    Activity, ActivityType, ChangeType, ComponentChange, ComponentType, ConceptChange,
    UnknownToken,
};

/// Concept id used for non-concept components, whose owning concept is not
/// known to the caller.
pub const UNKNOWN_CONCEPT_ID: &str = "0";

/// A `TYPE:ID` component reference, e.g. `DESCRIPTION:1000014`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    pub component_type: ComponentType,
    pub component_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchTargetError {
    #[error("expected TYPE:ID, got '{0}'")]
    Shape(String),
    #[error(transparent)]
    Type(#[from] UnknownToken),
}

impl FromStr for PatchTarget {
    type Err = PatchTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, id) = s
            .split_once(':')
            .filter(|(_, id)| !id.trim().is_empty())
            .ok_or_else(|| PatchTargetError::Shape(s.to_string()))?;
        Ok(Self {
            component_type: ty.trim().to_ascii_uppercase().parse()?,
            component_id: id.trim().to_string(),
        })
    }
}

impl fmt::Display for PatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.component_type, self.component_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    pub branch: String,
    pub user: String,
    /// Commit time of the synthetic activity, epoch ms.
    pub at: i64,
    pub pending: Vec<PatchTarget>,
    pub resolved: Vec<PatchTarget>,
}

/// Build the synthetic activity for `request`.
///
/// A component listed twice keeps its first listing, pending before
/// resolved.
#[must_use]
pub fn patch_activity(request: &PatchRequest) -> Activity {
    let mut concepts: Vec<ConceptChange> = Vec::new();
    let marked = request
        .pending
        .iter()
        .map(|target| (target, true))
        .chain(request.resolved.iter().map(|target| (target, false)));

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"patch\t");
    hasher.update(request.branch.as_bytes());
    hasher.update(b"\t");
    hasher.update(request.user.as_bytes());
    hasher.update(b"\t");
    hasher.update(request.at.to_string().as_bytes());

    for (target, pending) in marked {
        let concept_id = if target.component_type == ComponentType::Concept {
            target.component_id.as_str()
        } else {
            UNKNOWN_CONCEPT_ID
        };
        hasher.update(b"\n");
        hasher.update(target.to_string().as_bytes());
        hasher.update(if pending { b"=1" } else { b"=0" });

        let change = ComponentChange::new(
            target.component_id.clone(),
            ChangeType::Update,
            target.component_type,
            pending,
        );
        match concepts.iter_mut().find(|c| c.concept_id == concept_id) {
            Some(concept) => {
                concept.add_first(change);
            }
            None => {
                let mut concept = ConceptChange::new(concept_id);
                concept.add_first(change);
                concepts.push(concept);
            }
        }
    }

    let id = format!("act-{}", &hasher.finalize().to_hex()[..32]);
    Activity::new(
        id,
        request.user.clone(),
        request.branch.clone(),
        ActivityType::ContentChange,
        request.at,
    )
    .with_concept_changes(concepts)
}

/// Record the synthetic patch activity and return it.
///
/// # Errors
///
/// Returns an error when the branch has an empty segment, the request
/// lists no components, or the write fails.
pub fn patch_component_changes(conn: &Connection, request: &PatchRequest) -> Result<Activity> {
    if !branch::is_well_formed(&request.branch) {
        bail!("branch '{}' has an empty path segment", request.branch);
    }
    if request.pending.is_empty() && request.resolved.is_empty() {
        bail!("patch lists no components");
    }
    let activity = patch_activity(request);
    let tx = conn
        .unchecked_transaction()
        .context("begin patch transaction")?;
    insert_activity(&tx, &activity)?;
    tx.commit().context("commit patch")?;

    info!(
        activity_id = %activity.id,
        branch = %activity.branch,
        pending = request.pending.len(),
        resolved = request.resolved.len(),
        "recorded patch activity"
    );
    Ok(activity)
}
