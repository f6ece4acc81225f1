//! End-to-end flows: NDJSON ingestion → promotion → summary → archive diff
//! → backfill, against an on-disk store.

use authtrace_core::archive::{archive_diff, read_delta_archive};
use authtrace_core::backfill::{Backfill, BackfillOptions, CancellationToken};
use authtrace_core::db::open_store;
use authtrace_core::db::query::{self, ActivityFilter, Page};
use authtrace_core::ingest::{Consumer, LineSource, RetryPolicy};
use authtrace_core::model::{ActivityType, ComponentType};
use authtrace_core::summary::{ChangeSummaryEngine, SummaryRequest};
use rusqlite::Connection;
use serde_json::json;
use std::io::{Cursor, Write};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const NOW: i64 = 1_700_100_000_000;

fn store() -> (TempDir, Connection) {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = open_store(&dir.path().join(".authtrace/activities.db")).expect("open store");
    (dir, conn)
}

fn create_concept(branch: &str, ts: i64, concept: &str, description: &str) -> String {
    json!({
        "userId": "alice",
        "commitComment": "new concept",
        "branchPath": branch,
        "commitTimestamp": ts,
        "changes": {
            concept: {
                "concept": {
                    "conceptId": concept,
                    "descriptions": [{"descriptionId": description, "type": "FSN"}]
                },
                "changes": [
                    {"componentId": concept, "componentType": "CONCEPT", "type": "CREATE"},
                    {"componentId": description, "componentType": "DESCRIPTION", "type": "CREATE"}
                ]
            }
        }
    })
    .to_string()
}

fn merge(source: &str, destination: &str, ts: i64) -> String {
    json!({
        "userId": "system",
        "commitComment": format!("bob performed merge of {source} to {destination}"),
        "branchPath": destination,
        "commitTimestamp": ts,
    })
    .to_string()
}

fn ingest(conn: &Connection, lines: &[String]) {
    let input = lines.join("\n");
    let stats = Consumer::new(conn, RetryPolicy::default())
        .run(&mut LineSource::new(Cursor::new(input)))
        .expect("consume");
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.failed, 0);
}

fn summary_ids(conn: &Connection, branch: &str, ty: ComponentType) -> Vec<String> {
    ChangeSummaryEngine::new(conn)
        .with_now(NOW)
        .summarize(&SummaryRequest::new(branch))
        .expect("summary")
        .component_changes
        .get(&ty)
        .map(|ids| ids.iter().cloned().collect())
        .unwrap_or_default()
}

fn delta_zip(rows: &[(&str, &str)]) -> Cursor<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in rows {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .expect("start entry");
        writer.write_all(body.as_bytes()).expect("write entry");
    }
    let mut cursor = writer.finish().expect("finish");
    cursor.set_position(0);
    cursor
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

#[test]
fn content_follows_promotion() {
    let (_dir, conn) = store();
    ingest(
        &conn,
        &[
            create_concept("MAIN/PROJ/PROJ-1", 1_700_000_000_000, "100005", "1000014"),
            merge("MAIN/PROJ/PROJ-1", "MAIN/PROJ", 1_700_000_100_000),
        ],
    );

    assert_eq!(summary_ids(&conn, "MAIN/PROJ", ComponentType::Concept), vec!["100005"]);
    assert_eq!(
        summary_ids(&conn, "MAIN/PROJ", ComponentType::Description),
        vec!["1000014"]
    );
    assert!(summary_ids(&conn, "MAIN/PROJ/PROJ-1", ComponentType::Concept).is_empty());

    let promotions = query::find_activities(
        &conn,
        &ActivityFilter {
            activity_type: Some(ActivityType::Promotion),
            ..ActivityFilter::default()
        },
        Page::default(),
    )
    .expect("query");
    assert_eq!(promotions.total, 1);
    assert_eq!(promotions.activities[0].user, "bob");

    let at_parent = query::find_by_highest_promoted_branch(&conn, "MAIN/PROJ").expect("query");
    assert!(at_parent.iter().all(|a| a.promotion_fields_consistent()));
}

#[test]
fn sibling_task_inherits_after_rebase() {
    let (_dir, conn) = store();
    ingest(
        &conn,
        &[
            create_concept("MAIN/PROJ/PROJ-1", 1_700_000_000_000, "100005", "1000014"),
            merge("MAIN/PROJ/PROJ-1", "MAIN/PROJ", 1_700_000_100_000),
            merge("MAIN/PROJ", "MAIN/PROJ/PROJ-2", 1_700_000_200_000),
            create_concept("MAIN/PROJ/PROJ-2", 1_700_000_300_000, "200008", "2000011"),
        ],
    );

    assert_eq!(
        summary_ids(&conn, "MAIN/PROJ/PROJ-2", ComponentType::Concept),
        vec!["100005", "200008"]
    );
}

#[test]
fn archive_round_trip_is_empty_and_mismatch_is_reported() {
    let (_dir, conn) = store();
    ingest(
        &conn,
        &[create_concept("MAIN/PROJ/PROJ-1", 1_700_000_000_000, "100005", "1000014")],
    );
    let engine = ChangeSummaryEngine::new(&conn).with_now(NOW);
    let request = SummaryRequest::new("MAIN/PROJ/PROJ-1");

    let matching = delta_zip(&[
        ("sct2_Concept_Delta.txt", "id\teffectiveTime\n100005\t\n"),
        ("sct2_Description_Delta.txt", "id\teffectiveTime\n1000014\t\n"),
    ]);
    let result = archive_diff(&engine, &request, matching).expect("diff");
    assert!(result.is_empty(), "unexpected diff: {result:?}");

    let mismatched = delta_zip(&[("sct2_Concept_Delta.txt", "id\n100005\n300001\n")]);
    let result = archive_diff(&engine, &request, mismatched).expect("diff");
    assert_eq!(
        result.missing_from_delta[&ComponentType::Description]
            .iter()
            .collect::<Vec<_>>(),
        vec!["1000014"]
    );
    assert_eq!(
        result.missing_from_store[&ComponentType::Concept]
            .iter()
            .collect::<Vec<_>>(),
        vec!["300001"]
    );

    assert!(read_delta_archive(Cursor::new(b"not a zip".to_vec())).is_err());
}

#[test]
fn backfill_after_live_ingestion_writes_nothing() {
    let (_dir, conn) = store();
    ingest(
        &conn,
        &[
            create_concept("MAIN/PROJ/PROJ-1", 1_700_000_000_000, "100005", "1000014"),
            merge("MAIN/PROJ/PROJ-1", "MAIN/PROJ", 1_700_000_100_000),
            merge("MAIN/PROJ", "MAIN", 1_700_000_200_000),
        ],
    );

    let job = Backfill::new(
        &conn,
        BackfillOptions::default(),
        CancellationToken::new(),
    )
    .with_now(NOW);
    let stats = job.run_promotion_dates().expect("backfill");
    assert_eq!(stats.updated, 0);
    assert!(!stats.cancelled);
    assert_eq!(job.run_rebase_repair().expect("repair").updated, 0);
}

#[test]
fn reopening_store_keeps_activities() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("activities.db");
    {
        let conn = open_store(&path).expect("open");
        ingest(
            &conn,
            &[create_concept("MAIN/PROJ/PROJ-1", 1_700_000_000_000, "100005", "1000014")],
        );
    }
    let conn = open_store(&path).expect("reopen");
    let page = query::find_by_concepts(&conn, &["100005".to_string()], None, None, Page::default())
        .expect("query");
    assert_eq!(page.total, 1);
}
