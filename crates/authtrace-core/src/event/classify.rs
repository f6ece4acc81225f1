//! Commit classification: raw [`CommitEvent`] → typed [`Activity`].
//!
//! The commit comment is checked first. A merge comment
//! (`<user> performed merge of <source> to <destination>`) yields a
//! `REBASE` when the destination path contains the source path and a
//! `PROMOTION` otherwise; the user named in the comment is recorded as the
//! author. Anything else is classified from its component changes:
//! only inferred relationship edits means `CLASSIFICATION_SAVE`, any other
//! edit means `CONTENT_CHANGE`. A commit with no edits whose comment
//! announces a new version is `CREATE_CODE_SYSTEM_VERSION`.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use super::{CommitEvent, ConceptSnapshot, RawComponentChange, is_published};
use crate::model::{
    Activity, ActivityType, ChangeType, ComponentChange, ComponentSubType, ComponentType,
    ConceptChange, UnknownToken,
};

#[allow(clippy::unwrap_used)]
static MERGE_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<user>.+?) performed merge of (?P<source>\S+) to (?P<destination>\S+)\s*$")
        .unwrap()
});

#[allow(clippy::unwrap_used)]
static VERSION_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bversioning\b|\b(creat\w*|new)\b.*\bversion\b").unwrap());

/// A parsed merge commit comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeComment {
    pub user: String,
    pub source: String,
    pub destination: String,
}

impl MergeComment {
    /// `REBASE` when `destination` contains `source`, else `PROMOTION`.
    #[must_use]
    pub fn activity_type(&self) -> ActivityType {
        if self.destination.contains(self.source.as_str()) {
            ActivityType::Rebase
        } else {
            ActivityType::Promotion
        }
    }
}

/// The known shapes a commit can take, decided once per event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitShape {
    Merge(MergeComment),
    Edit { manual: bool },
    VersionCreation,
    Empty,
}

impl CommitShape {
    #[must_use]
    pub fn activity_type(&self) -> ActivityType {
        match self {
            Self::Merge(merge) => merge.activity_type(),
            Self::Edit { manual: false } => ActivityType::ClassificationSave,
            Self::Edit { manual: true } | Self::Empty => ActivityType::ContentChange,
            Self::VersionCreation => ActivityType::CreateCodeSystemVersion,
        }
    }
}

/// Parse a merge comment, if `comment` is one.
#[must_use]
pub fn parse_merge_comment(comment: &str) -> Option<MergeComment> {
    let caps = MERGE_COMMENT.captures(comment.trim())?;
    Some(MergeComment {
        user: caps["user"].trim().to_string(),
        source: caps["source"].to_string(),
        destination: caps["destination"].to_string(),
    })
}

/// True when `comment` announces a code system version.
#[must_use]
pub fn is_version_comment(comment: &str) -> bool {
    VERSION_COMMENT.is_match(comment)
}

/// Decide the shape of a commit from its comment and resolved changes.
#[must_use]
pub fn commit_shape(comment: &str, concept_changes: &[ConceptChange]) -> CommitShape {
    if let Some(merge) = parse_merge_comment(comment) {
        return CommitShape::Merge(merge);
    }

    let mut changes = concept_changes
        .iter()
        .flat_map(|concept| concept.component_changes.iter())
        .peekable();

    if changes.peek().is_some() {
        let manual = changes.any(|change| !change.is_inferred_relationship());
        return CommitShape::Edit { manual };
    }

    if is_version_comment(comment) {
        CommitShape::VersionCreation
    } else {
        CommitShape::Empty
    }
}

/// Build the activity recorded for `event`.
///
/// # Errors
///
/// Returns [`UnknownToken`] when a component or change type token is not
/// recognised; the whole event is rejected rather than guessed at.
pub fn classify(event: &CommitEvent) -> Result<Activity, UnknownToken> {
    let concept_changes = build_concept_changes(event)?;
    let shape = commit_shape(&event.commit_comment, &concept_changes);
    let activity_type = shape.activity_type();
    let id = activity_id(event, &concept_changes);

    let (user, source) = match shape {
        CommitShape::Merge(merge) => (merge.user, Some(merge.source)),
        _ => (event.user_id.clone(), None),
    };

    let mut activity = Activity::new(
        id,
        user,
        event.branch_path.clone(),
        activity_type,
        event.commit_timestamp,
    )
    .with_concept_changes(concept_changes);
    activity.source_branch = source;

    debug!(
        activity_id = %activity.id,
        activity_type = %activity.activity_type,
        branch = %activity.branch,
        components = activity.component_change_count(),
        "classified commit"
    );
    Ok(activity)
}

/// Resolve every raw change into typed concept changes.
///
/// Repeated component ids within one concept collapse to the first
/// occurrence. Concepts left without changes are dropped.
///
/// # Errors
///
/// Returns [`UnknownToken`] for an unrecognised type token.
pub fn build_concept_changes(event: &CommitEvent) -> Result<Vec<ConceptChange>, UnknownToken> {
    let mut out = Vec::with_capacity(event.changes.len());
    for (concept_id, entry) in &event.changes {
        let mut concept = ConceptChange::new(concept_id.clone());
        for raw in &entry.changes {
            let change = resolve_change(&entry.concept, raw)?;
            if !concept.add_first(change) {
                debug!(
                    concept_id = %concept_id,
                    component_id = %raw.component_id,
                    "collapsed duplicate component change"
                );
            }
        }
        if !concept.component_changes.is_empty() {
            out.push(concept);
        }
    }
    Ok(out)
}

fn resolve_change(
    snapshot: &ConceptSnapshot,
    raw: &RawComponentChange,
) -> Result<ComponentChange, UnknownToken> {
    let component_type: ComponentType = raw.component_type.parse()?;
    let change_type: ChangeType = raw.change_type.parse()?;

    let sub_type = raw
        .component_sub_type
        .as_deref()
        .map(ComponentSubType::from)
        .or_else(|| snapshot_sub_type(snapshot, component_type, &raw.component_id));

    let effective_time_null = raw
        .effective_time_null
        .unwrap_or_else(|| !snapshot_published(snapshot, component_type, &raw.component_id));

    let mut change = ComponentChange::new(
        raw.component_id.clone(),
        change_type,
        component_type,
        effective_time_null,
    );
    change.component_sub_type = sub_type;
    Ok(change)
}

fn snapshot_sub_type(
    snapshot: &ConceptSnapshot,
    component_type: ComponentType,
    component_id: &str,
) -> Option<ComponentSubType> {
    match component_type {
        ComponentType::Relationship => snapshot
            .relationships
            .iter()
            .find(|rel| rel.relationship_id == component_id)
            .and_then(|rel| rel.characteristic_type.as_deref())
            .map(ComponentSubType::from_characteristic_type),
        ComponentType::Description => snapshot
            .descriptions
            .iter()
            .find(|desc| desc.description_id == component_id)
            .and_then(|desc| desc.term_type.as_deref())
            .map(ComponentSubType::from),
        _ => None,
    }
}

fn snapshot_published(
    snapshot: &ConceptSnapshot,
    component_type: ComponentType,
    component_id: &str,
) -> bool {
    match component_type {
        ComponentType::Concept => is_published(snapshot.effective_time.as_ref()),
        ComponentType::Description => snapshot
            .descriptions
            .iter()
            .find(|desc| desc.description_id == component_id)
            .is_some_and(|desc| is_published(desc.effective_time.as_ref())),
        ComponentType::Relationship => snapshot
            .relationships
            .iter()
            .find(|rel| rel.relationship_id == component_id)
            .is_some_and(|rel| is_published(rel.effective_time.as_ref())),
        ComponentType::OwlAxiom => snapshot
            .class_axioms
            .iter()
            .chain(&snapshot.gci_axioms)
            .find(|axiom| axiom.axiom_id == component_id)
            .is_some_and(|axiom| is_published(axiom.effective_time.as_ref())),
        ComponentType::ReferenceSetMember => false,
    }
}

/// Content address of an event: stable across redelivery of the same
/// message, distinct for any change in author, branch, time, comment or
/// resolved changes.
#[must_use]
pub fn activity_id(event: &CommitEvent, concept_changes: &[ConceptChange]) -> String {
    let mut hasher = blake3::Hasher::new();
    for field in [
        event.user_id.as_str(),
        event.branch_path.as_str(),
        &event.commit_timestamp.to_string(),
        event.commit_comment.as_str(),
    ] {
        hasher.update(field.as_bytes());
        hasher.update(b"\t");
    }
    for concept in concept_changes {
        hasher.update(concept.concept_id.as_bytes());
        for change in &concept.component_changes {
            hasher.update(b"\x1f");
            hasher.update(change.component_id.as_bytes());
            hasher.update(change.change_type.as_str().as_bytes());
            hasher.update(change.component_type.as_str().as_bytes());
            if let Some(sub) = &change.component_sub_type {
                hasher.update(sub.as_str().as_bytes());
            }
            hasher.update(if change.effective_time_null { b"1" } else { b"0" });
        }
        hasher.update(b"\n");
    }
    format!("act-{}", &hasher.finalize().to_hex()[..32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(comment: &str, changes: serde_json::Value) -> CommitEvent {
        let raw = json!({
            "userId": "alice",
            "commitComment": comment,
            "branchPath": "MAIN/A/A-1",
            "commitTimestamp": 1_700_000_000_000_i64,
            "changes": changes,
        });
        CommitEvent::decode(&raw.to_string()).expect("decode")
    }

    fn relationships(characteristic: &[(&str, &str)]) -> serde_json::Value {
        let rels: Vec<_> = characteristic
            .iter()
            .map(|(id, ty)| json!({"relationshipId": id, "characteristicType": ty}))
            .collect();
        let changes: Vec<_> = characteristic
            .iter()
            .map(|(id, _)| json!({"componentId": id, "componentType": "RELATIONSHIP", "type": "CREATE"}))
            .collect();
        json!({ "100005": { "concept": { "relationships": rels }, "changes": changes } })
    }

    #[test]
    fn merge_down_is_rebase() {
        let merge = parse_merge_comment("bob performed merge of MAIN/A to MAIN/A/A-1").expect("merge");
        assert_eq!(merge.user, "bob");
        assert_eq!(merge.activity_type(), ActivityType::Rebase);
    }

    #[test]
    fn merge_up_is_promotion() {
        let merge = parse_merge_comment("bob performed merge of MAIN/A/A-1 to MAIN/A").expect("merge");
        assert_eq!(merge.activity_type(), ActivityType::Promotion);
    }

    #[test]
    fn merge_comment_overrides_user() {
        let activity = classify(&event("carol performed merge of MAIN/A/A-1 to MAIN/A", json!({})))
            .expect("classify");
        assert_eq!(activity.user, "carol");
        assert_eq!(activity.activity_type, ActivityType::Promotion);
        assert_eq!(activity.source_branch.as_deref(), Some("MAIN/A/A-1"));
    }

    #[test]
    fn user_names_with_spaces_parse() {
        let merge =
            parse_merge_comment("Jane Doe performed merge of MAIN/X to MAIN/X/X-9").expect("merge");
        assert_eq!(merge.user, "Jane Doe");
        assert_eq!(merge.destination, "MAIN/X/X-9");
    }

    #[test]
    fn inferred_only_is_classification_save() {
        let activity = classify(&event(
            "Classified ontology.",
            relationships(&[("1001", "INFERRED_RELATIONSHIP"), ("1002", "INFERRED_RELATIONSHIP")]),
        ))
        .expect("classify");
        assert_eq!(activity.activity_type, ActivityType::ClassificationSave);
    }

    #[test]
    fn stated_relationship_flips_to_content_change() {
        let activity = classify(&event(
            "edit",
            relationships(&[("1001", "INFERRED_RELATIONSHIP"), ("1002", "STATED_RELATIONSHIP")]),
        ))
        .expect("classify");
        assert_eq!(activity.activity_type, ActivityType::ContentChange);
    }

    #[test]
    fn description_change_is_content_change() {
        let changes = json!({
            "100005": {
                "concept": { "descriptions": [{"descriptionId": "2001", "type": "FSN"}] },
                "changes": [{"componentId": "2001", "componentType": "DESCRIPTION", "type": "UPDATE"}]
            }
        });
        let activity = classify(&event("edit", changes)).expect("classify");
        assert_eq!(activity.activity_type, ActivityType::ContentChange);
        let (_, change) = activity.component_changes().next().expect("one change");
        assert_eq!(change.component_sub_type, Some(ComponentSubType::Fsn));
        assert!(change.effective_time_null);
    }

    #[test]
    fn empty_version_commit() {
        let activity = classify(&event("Creating version 20250131", json!({}))).expect("classify");
        assert_eq!(activity.activity_type, ActivityType::CreateCodeSystemVersion);
    }

    #[test]
    fn empty_plain_commit_is_content_change() {
        let activity = classify(&event("touch", json!({}))).expect("classify");
        assert_eq!(activity.activity_type, ActivityType::ContentChange);
        assert!(activity.concept_changes.is_empty());
    }

    #[test]
    fn unknown_component_type_rejects_event() {
        let changes = json!({
            "1": { "changes": [{"componentId": "1", "componentType": "CONCEPTUAL", "type": "CREATE"}] }
        });
        let err = classify(&event("edit", changes)).expect_err("unknown token");
        assert_eq!(err.raw, "CONCEPTUAL");
    }

    #[test]
    fn unknown_change_type_rejects_event() {
        let changes = json!({
            "1": { "changes": [{"componentId": "1", "componentType": "CONCEPT", "type": "MODIFY"}] }
        });
        assert!(classify(&event("edit", changes)).is_err());
    }

    #[test]
    fn published_snapshot_component_is_not_pending() {
        let changes = json!({
            "100005": {
                "concept": { "effectiveTime": "20240131" },
                "changes": [{"componentId": "100005", "componentType": "CONCEPT", "type": "UPDATE"}]
            }
        });
        let activity = classify(&event("revert", changes)).expect("classify");
        let (_, change) = activity.component_changes().next().expect("one change");
        assert!(!change.effective_time_null);
    }

    #[test]
    fn explicit_pending_flag_wins() {
        let changes = json!({
            "100005": {
                "concept": { "effectiveTime": "20240131" },
                "changes": [{
                    "componentId": "100005", "componentType": "CONCEPT", "type": "UPDATE",
                    "effectiveTimeNull": true
                }]
            }
        });
        let activity = classify(&event("edit", changes)).expect("classify");
        assert!(activity.component_changes().all(|(_, c)| c.effective_time_null));
    }

    #[test]
    fn duplicate_component_ids_collapse_to_first() {
        let changes = json!({
            "100005": { "changes": [
                {"componentId": "100005", "componentType": "CONCEPT", "type": "CREATE"},
                {"componentId": "100005", "componentType": "CONCEPT", "type": "DELETE"}
            ]}
        });
        let activity = classify(&event("edit", changes)).expect("classify");
        assert_eq!(activity.component_change_count(), 1);
        let (_, change) = activity.component_changes().next().expect("one change");
        assert_eq!(change.change_type, ChangeType::Create);
    }

    #[test]
    fn activity_id_is_deterministic() {
        let a = classify(&event("edit", json!({}))).expect("classify");
        let b = classify(&event("edit", json!({}))).expect("classify");
        let c = classify(&event("other", json!({}))).expect("classify");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(a.id.starts_with("act-"));
        assert_eq!(a.id.len(), 36);
    }
}
