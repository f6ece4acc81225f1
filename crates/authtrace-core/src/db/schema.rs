//! Canonical SQLite schema for the activity store.
//!
//! One `activities` row per ingested commit, with its component changes in
//! `component_changes` (keyed by activity, concept and component so a
//! concept change is the group of rows sharing `concept_id`):
//! - `users` and `branches` are created lazily on first reference
//! - `highest_promoted_branch` / `promotion_date` are the only mutable
//!   activity columns
//! - `store_meta` tracks schema version and ingestion bookkeeping

/// Migration v1: core tables plus store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY CHECK (length(trim(username)) > 0),
    first_seen_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS branches (
    path TEXT PRIMARY KEY CHECK (length(trim(path)) > 0),
    depth INTEGER NOT NULL CHECK (depth >= 1),
    is_code_system_root INTEGER NOT NULL CHECK (is_code_system_root IN (0, 1)),
    first_seen_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS activities (
    activity_id TEXT PRIMARY KEY,
    username TEXT NOT NULL REFERENCES users(username),
    branch TEXT NOT NULL REFERENCES branches(path),
    source_branch TEXT REFERENCES branches(path),
    activity_type TEXT NOT NULL CHECK (activity_type IN (
        'CONTENT_CHANGE',
        'CLASSIFICATION_SAVE',
        'REBASE',
        'PROMOTION',
        'CREATE_CODE_SYSTEM_VERSION'
    )),
    commit_date INTEGER NOT NULL,
    highest_promoted_branch TEXT NOT NULL,
    promotion_date INTEGER,
    CHECK (activity_id LIKE 'act-%')
);

CREATE TABLE IF NOT EXISTS component_changes (
    activity_id TEXT NOT NULL REFERENCES activities(activity_id) ON DELETE CASCADE,
    concept_id TEXT NOT NULL,
    component_id TEXT NOT NULL,
    change_type TEXT NOT NULL CHECK (change_type IN ('CREATE', 'UPDATE', 'DELETE', 'INACTIVATE')),
    component_type TEXT NOT NULL CHECK (component_type IN (
        'CONCEPT',
        'DESCRIPTION',
        'RELATIONSHIP',
        'REFERENCE_SET_MEMBER',
        'OWL_AXIOM'
    )),
    component_sub_type TEXT,
    effective_time_null INTEGER NOT NULL CHECK (effective_time_null IN (0, 1)),
    PRIMARY KEY (activity_id, concept_id, component_id)
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_ingested_at INTEGER NOT NULL DEFAULT 0,
    last_activity_id TEXT
);

INSERT OR IGNORE INTO store_meta (
    id,
    schema_version,
    last_ingested_at,
    last_activity_id
) VALUES (1, 1, 0, NULL);
";

/// Migration v2: read-path indexes for report and backfill queries.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_activities_branch_date
    ON activities(branch, commit_date);

CREATE INDEX IF NOT EXISTS idx_activities_source_type_date
    ON activities(source_branch, activity_type, commit_date);

CREATE INDEX IF NOT EXISTS idx_activities_hpb_promotion
    ON activities(highest_promoted_branch, promotion_date, commit_date);

CREATE INDEX IF NOT EXISTS idx_activities_type_date
    ON activities(activity_type, commit_date);

CREATE INDEX IF NOT EXISTS idx_activities_user_date
    ON activities(username, commit_date);

CREATE INDEX IF NOT EXISTS idx_component_changes_concept
    ON component_changes(concept_id, activity_id);

UPDATE store_meta
SET schema_version = 2
WHERE id = 1;
";

/// Migration v3: ids of activities removed by splitting, so a redelivered
/// original is still recognised as a duplicate.
pub const MIGRATION_V3_SQL: &str = r"
CREATE TABLE IF NOT EXISTS split_activities (
    activity_id TEXT PRIMARY KEY CHECK (activity_id LIKE 'act-%'),
    pieces INTEGER NOT NULL CHECK (pieces >= 1)
);

UPDATE store_meta
SET schema_version = 3
WHERE id = 1;
";

/// Indexes expected by the summary and backfill query paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_activities_branch_date",
    "idx_activities_source_type_date",
    "idx_activities_hpb_promotion",
    "idx_activities_type_date",
    "idx_activities_user_date",
    "idx_component_changes_concept",
];
