//! Pure functions over slash-delimited branch paths.
//!
//! Branches are never stored as a tree; every hierarchy question is answered
//! from the path string itself:
//!
//! - `MAIN` and any path whose final segment starts with `SNOMEDCT-` is a
//!   code-system root (an independent edition).
//! - Depth counts segments below the deepest code-system segment, so
//!   `MAIN`, `MAIN/SNOMEDCT-BE` and `MAIN/SNOMEDCT-BE/SNOMEDCT-BE-X` all have
//!   depth 1, while `MAIN/PROJ/PROJ-1` (a task) has depth 3.

/// The international root branch.
pub const MAIN: &str = "MAIN";

/// Segment prefix that marks an extension code system.
pub const CODE_SYSTEM_PREFIX: &str = "SNOMEDCT-";

/// Depth of a task branch (`<root>/<project>/<task>`).
pub const TASK_DEPTH: usize = 3;

/// True when every `/`-separated segment of `path` is non-blank.
///
/// Rejects `/PROJ`, `MAIN//X` and `MAIN/X/`, which would otherwise
/// register phantom branches with the wrong depth.
#[must_use]
pub fn is_well_formed(path: &str) -> bool {
    path.split('/').all(|segment| !segment.trim().is_empty())
}

/// Depth of `path` relative to its deepest code-system segment.
///
/// Always at least 1 for a non-empty path.
#[must_use]
pub fn depth(path: &str) -> usize {
    let segments: Vec<&str> = path.split('/').collect();
    let root_idx = segments
        .iter()
        .rposition(|segment| segment.starts_with(CODE_SYSTEM_PREFIX))
        .unwrap_or(0);
    segments.len() - root_idx
}

/// True when `path` is `MAIN` or ends in a `SNOMEDCT-*` segment.
#[must_use]
pub fn is_code_system_root(path: &str) -> bool {
    path == MAIN
        || path
            .rsplit('/')
            .next()
            .is_some_and(|last| last.starts_with(CODE_SYSTEM_PREFIX))
}

/// Immediate parent of `path`, or `None` for a single-segment path.
#[must_use]
pub fn parent(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// Strict-prefix ancestors of `path`, nearest first.
///
/// ```
/// use authtrace_core::branch::ancestors;
/// assert_eq!(ancestors("MAIN/A/A-1"), vec!["MAIN/A", "MAIN"]);
/// ```
#[must_use]
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = path;
    while let Some(next) = parent(current) {
        out.push(next);
        current = next;
    }
    out
}

/// True when `ancestor` is a strict path-prefix ancestor of `path`.
#[must_use]
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Nearest code-system root at or above `path`.
#[must_use]
pub fn code_system_root(path: &str) -> &str {
    if is_code_system_root(path) {
        return path;
    }
    ancestors(path)
        .into_iter()
        .find(|candidate| is_code_system_root(candidate))
        .unwrap_or_else(|| path.split('/').next().unwrap_or(path))
}

/// True when `path` sits at task level (depth 3).
#[must_use]
pub fn is_task(path: &str) -> bool {
    depth(path) == TASK_DEPTH
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn depth_of_main_tree() {
        assert_eq!(depth("MAIN"), 1);
        assert_eq!(depth("MAIN/PROJ"), 2);
        assert_eq!(depth("MAIN/PROJ/PROJ-1"), 3);
    }

    #[test]
    fn depth_restarts_at_extension_root() {
        assert_eq!(depth("MAIN/SNOMEDCT-BE"), 1);
        assert_eq!(depth("MAIN/SNOMEDCT-BE/BE"), 2);
        assert_eq!(depth("MAIN/SNOMEDCT-BE/BE/BE-7"), 3);
    }

    #[test]
    fn consecutive_code_system_segments_collapse() {
        assert_eq!(depth("MAIN/SNOMEDCT-BE/SNOMEDCT-BE-X"), 1);
        assert_eq!(depth("MAIN/SNOMEDCT-BE/SNOMEDCT-BE-X/P"), 2);
    }

    #[test]
    fn code_system_roots() {
        assert!(is_code_system_root("MAIN"));
        assert!(is_code_system_root("MAIN/SNOMEDCT-BE"));
        assert!(!is_code_system_root("MAIN/SNOMEDCT-BE/BE"));
        assert!(!is_code_system_root("MAIN/PROJ"));
    }

    #[test]
    fn ancestors_nearest_first() {
        assert_eq!(
            ancestors("MAIN/SNOMEDCT-BE/BE/BE-1"),
            vec!["MAIN/SNOMEDCT-BE/BE", "MAIN/SNOMEDCT-BE", "MAIN"]
        );
        assert!(ancestors("MAIN").is_empty());
    }

    #[test]
    fn ancestor_test_respects_segment_boundaries() {
        assert!(is_ancestor("MAIN/A", "MAIN/A/A-1"));
        assert!(!is_ancestor("MAIN/A", "MAIN/AB"));
        assert!(!is_ancestor("MAIN/A", "MAIN/A"));
    }

    #[test]
    fn empty_segments_are_malformed() {
        assert!(is_well_formed("MAIN"));
        assert!(is_well_formed("MAIN/SNOMEDCT-BE/BE/BE-1"));
        for bad in ["", " ", "/PROJ", "MAIN//X", "MAIN/X/", "MAIN/ /X"] {
            assert!(!is_well_formed(bad), "{bad:?} should be malformed");
        }
    }

    #[test]
    fn code_system_root_lookup() {
        assert_eq!(code_system_root("MAIN/PROJ/PROJ-1"), "MAIN");
        assert_eq!(code_system_root("MAIN/SNOMEDCT-BE/BE/BE-1"), "MAIN/SNOMEDCT-BE");
        assert_eq!(code_system_root("MAIN/SNOMEDCT-BE"), "MAIN/SNOMEDCT-BE");
    }

    fn arb_segment() -> impl Strategy<Value = String> {
        prop_oneof![
            "[A-Z]{1,6}(-[0-9]{1,3})?",
            "SNOMEDCT-[A-Z]{2}",
        ]
    }

    fn arb_path() -> impl Strategy<Value = String> {
        prop::collection::vec(arb_segment(), 0..6)
            .prop_map(|rest| std::iter::once(MAIN.to_string()).chain(rest).collect::<Vec<_>>().join("/"))
    }

    proptest! {
        #[test]
        fn generated_paths_are_well_formed(path in arb_path()) {
            prop_assert!(is_well_formed(&path));
        }

        #[test]
        fn depth_is_at_least_one(path in arb_path()) {
            prop_assert!(depth(&path) >= 1);
        }

        #[test]
        fn parent_depth_is_one_less_below_roots(path in arb_path()) {
            if !is_code_system_root(&path) {
                let parent = parent(&path).expect("non-root path has a parent");
                prop_assert_eq!(depth(parent), depth(&path) - 1);
            }
        }

        #[test]
        fn ancestors_are_strict_prefixes(path in arb_path()) {
            for ancestor in ancestors(&path) {
                prop_assert!(is_ancestor(ancestor, &path));
            }
        }
    }
}
