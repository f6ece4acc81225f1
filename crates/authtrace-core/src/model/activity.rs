//! Activity records.
//!
//! An [`Activity`] is created once per ingested commit and is immutable
//! afterwards except for its two promotion fields. It owns its concept
//! changes, which in turn own their component changes.

use serde::{Deserialize, Serialize};

use super::{ActivityType, ChangeType, ComponentSubType, ComponentType};
use crate::branch;

/// One recorded commit against a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Content-addressed id (`act-<hex>`).
    pub id: String,
    /// Username of the committing author.
    pub user: String,
    /// Branch the commit landed on.
    pub branch: String,
    /// The other side of a merge (promotion / rebase only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
    pub activity_type: ActivityType,
    /// Commit time, epoch milliseconds.
    pub commit_date: i64,
    /// Most-ancestral branch this activity's content has reached.
    ///
    /// Always `branch` or a strict ancestor of it.
    pub highest_promoted_branch: String,
    /// When the content first left `branch`, epoch milliseconds.
    ///
    /// Set iff `highest_promoted_branch != branch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion_date: Option<i64>,
    /// Changed concepts, sorted by concept id.
    #[serde(default)]
    pub concept_changes: Vec<ConceptChange>,
}

impl Activity {
    /// Create an unpromoted activity.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        user: impl Into<String>,
        branch: impl Into<String>,
        activity_type: ActivityType,
        commit_date: i64,
    ) -> Self {
        let branch = branch.into();
        Self {
            id: id.into(),
            user: user.into(),
            highest_promoted_branch: branch.clone(),
            branch,
            source_branch: None,
            activity_type,
            commit_date,
            promotion_date: None,
            concept_changes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_source_branch(mut self, source: impl Into<String>) -> Self {
        self.source_branch = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_concept_changes(mut self, mut changes: Vec<ConceptChange>) -> Self {
        changes.sort_by(|a, b| a.concept_id.cmp(&b.concept_id));
        self.concept_changes = changes;
        self
    }

    /// True once the content has been promoted above its own branch.
    #[must_use]
    pub fn is_promoted(&self) -> bool {
        self.highest_promoted_branch != self.branch
    }

    /// Check the promotion-field invariant.
    #[must_use]
    pub fn promotion_fields_consistent(&self) -> bool {
        let reachable = self.highest_promoted_branch == self.branch
            || branch::is_ancestor(&self.highest_promoted_branch, &self.branch);
        reachable && (self.promotion_date.is_some() == self.is_promoted())
    }

    /// Total number of component changes across all concepts.
    #[must_use]
    pub fn component_change_count(&self) -> usize {
        self.concept_changes
            .iter()
            .map(|c| c.component_changes.len())
            .sum()
    }

    /// Iterate every component change with its owning concept id.
    pub fn component_changes(&self) -> impl Iterator<Item = (&str, &ComponentChange)> {
        self.concept_changes.iter().flat_map(|concept| {
            concept
                .component_changes
                .iter()
                .map(move |change| (concept.concept_id.as_str(), change))
        })
    }
}

/// The component changes one commit made to a single concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptChange {
    pub concept_id: String,
    /// Unique by `component_id`.
    pub component_changes: Vec<ComponentChange>,
}

impl ConceptChange {
    #[must_use]
    pub fn new(concept_id: impl Into<String>) -> Self {
        Self {
            concept_id: concept_id.into(),
            component_changes: Vec::new(),
        }
    }

    /// Add a component change unless one for the same component id is
    /// already present. Returns `false` when the change was collapsed.
    pub fn add_first(&mut self, change: ComponentChange) -> bool {
        if self
            .component_changes
            .iter()
            .any(|existing| existing.component_id == change.component_id)
        {
            return false;
        }
        self.component_changes.push(change);
        true
    }
}

/// A single component edit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentChange {
    pub component_id: String,
    pub change_type: ChangeType,
    pub component_type: ComponentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_sub_type: Option<ComponentSubType>,
    /// The component has no published effective time (pending change).
    pub effective_time_null: bool,
}

impl ComponentChange {
    #[must_use]
    pub fn new(
        component_id: impl Into<String>,
        change_type: ChangeType,
        component_type: ComponentType,
        effective_time_null: bool,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            change_type,
            component_type,
            component_sub_type: None,
            effective_time_null,
        }
    }

    #[must_use]
    pub fn with_sub_type(mut self, sub_type: ComponentSubType) -> Self {
        self.component_sub_type = Some(sub_type);
        self
    }

    /// True for a classifier-produced inferred relationship edit.
    #[must_use]
    pub fn is_inferred_relationship(&self) -> bool {
        self.component_type == ComponentType::Relationship
            && self.component_sub_type == Some(ComponentSubType::Inferred)
    }

    /// Whether this change leaves the component pending (unreleased).
    ///
    /// Deletions and changes whose component carries a published effective
    /// time resolve the pending state instead.
    #[must_use]
    pub fn marks_pending(&self) -> bool {
        self.effective_time_null && self.change_type != ChangeType::Delete
    }
}
