//! Delta archive reconciliation.
//!
//! Reads a zip of tab-separated RF2 delta files into the same
//! `componentType → ids` shape the summary engine produces and set-diffs
//! the two. Component types are recovered from the identifier alone: UUIDs
//! (anything containing `-`) are reference set members, and SCTIDs carry
//! their type in the partition digit (second to last).

use serde::Serialize;
use std::io::{self, Read, Seek};
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::model::ComponentType;
use crate::summary::{ChangeSummaryEngine, ComponentIdMap, SummaryError, SummaryRequest};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("not a readable zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("unreadable archive entry '{name}': {source}")]
    Entry {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Summary(#[from] SummaryError),
}

impl ArchiveError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Zip(_) | Self::Entry { .. } => ErrorCode::ArchiveUnreadable,
            Self::Summary(err) => err.code(),
        }
    }
}

/// Both directions of the set difference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveDiff {
    /// Pending in the store but absent from the archive.
    pub missing_from_delta: ComponentIdMap,
    /// Present in the archive but not pending in the store.
    pub missing_from_store: ComponentIdMap,
}

impl ArchiveDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing_from_delta.is_empty() && self.missing_from_store.is_empty()
    }
}

/// Component type implied by an RF2 identifier.
#[must_use]
pub fn classify_component_id(id: &str) -> Option<ComponentType> {
    if id.contains('-') {
        return Some(ComponentType::ReferenceSetMember);
    }
    let bytes = id.as_bytes();
    if bytes.len() < 2 || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    match bytes[bytes.len() - 2] {
        b'0' => Some(ComponentType::Concept),
        b'1' => Some(ComponentType::Description),
        b'2' => Some(ComponentType::Relationship),
        _ => None,
    }
}

/// Collect the component ids of every `.txt` entry in a delta archive.
///
/// The first column of each row is the id; header rows (`id`) and blank
/// lines are skipped, as are ids whose type cannot be determined.
///
/// # Errors
///
/// Returns [`ArchiveError::Zip`] when `reader` is not a zip archive and
/// [`ArchiveError::Entry`] when an entry cannot be read as UTF-8 text.
pub fn read_delta_archive<R: Read + Seek>(reader: R) -> Result<ComponentIdMap, ArchiveError> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut ids = ComponentIdMap::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if entry.is_dir() || !name.to_ascii_lowercase().ends_with(".txt") {
            continue;
        }

        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|source| ArchiveError::Entry {
                name: name.clone(),
                source,
            })?;

        let mut rows = 0_usize;
        let mut skipped = 0_usize;
        for line in text.lines() {
            let Some(id) = line.split('\t').next().map(str::trim) else {
                continue;
            };
            if id.is_empty() || id == "id" {
                continue;
            }
            match classify_component_id(id) {
                Some(component_type) => {
                    ids.entry(component_type).or_default().insert(id.to_string());
                    rows += 1;
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(entry = %name, skipped, "skipped rows with unrecognised component ids");
        }
        debug!(entry = %name, rows, "read delta entry");
    }
    Ok(ids)
}

/// Fold a summary map into the archive's vocabulary: OWL axioms are
/// exported as reference set members.
#[must_use]
pub fn fold_for_archive(mut summary: ComponentIdMap) -> ComponentIdMap {
    if let Some(axioms) = summary.remove(&ComponentType::OwlAxiom) {
        summary
            .entry(ComponentType::ReferenceSetMember)
            .or_default()
            .extend(axioms);
    }
    summary
}

/// Set-diff store ids against archive ids, dropping empty types.
#[must_use]
pub fn diff(store: &ComponentIdMap, archive: &ComponentIdMap) -> ArchiveDiff {
    ArchiveDiff {
        missing_from_delta: difference(store, archive),
        missing_from_store: difference(archive, store),
    }
}

fn difference(left: &ComponentIdMap, right: &ComponentIdMap) -> ComponentIdMap {
    let mut out = ComponentIdMap::new();
    for (component_type, ids) in left {
        let missing: std::collections::BTreeSet<String> = match right.get(component_type) {
            Some(other) => ids.difference(other).cloned().collect(),
            None => ids.clone(),
        };
        if !missing.is_empty() {
            out.insert(*component_type, missing);
        }
    }
    out
}

/// Summarise `request` and diff it against the delta archive in `reader`.
///
/// # Errors
///
/// Returns [`ArchiveError`] when the summary fails or the archive is
/// unreadable.
pub fn archive_diff<R: Read + Seek>(
    engine: &ChangeSummaryEngine<'_>,
    request: &SummaryRequest,
    reader: R,
) -> Result<ArchiveDiff, ArchiveError> {
    let archive = read_delta_archive(reader)?;
    let summary = engine.summarize(request)?;
    let result = diff(&fold_for_archive(summary.component_changes), &archive);
    debug!(
        branch = %request.branch,
        missing_from_delta = result.missing_from_delta.values().map(std::collections::BTreeSet::len).sum::<usize>(),
        missing_from_store = result.missing_from_store.values().map(std::collections::BTreeSet::len).sum::<usize>(),
        "archive diff computed"
    );
    Ok(result)
}
