//! E2E tests for the main operator workflow:
//! `authtrace init`, `ingest`, `activities`, `promoted-to`, `summary`,
//! `archive-diff`, `backfill`, `split`, `patch`.

use assert_cmd::Command;
use serde_json::{Value, json};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test harness helpers
// ---------------------------------------------------------------------------

fn at_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("authtrace"));
    cmd.current_dir(dir);
    cmd.env("AUTHTRACE_LOG", "error");
    cmd.env_remove("AUTHTRACE_FORMAT");
    cmd
}

fn run_json(dir: &Path, args: &[&str]) -> Value {
    let output = at_cmd(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("command should not crash");
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid JSON")
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

/// Initialize a store and ingest one task commit promoted to its project.
fn promoted_project(dir: &Path) {
    at_cmd(dir).args(["init"]).assert().success();
    let events = [
        create_concept("MAIN/PROJ/PROJ-1", 1_700_000_000_000, "100005", "1000014"),
        merge("MAIN/PROJ/PROJ-1", "MAIN/PROJ", 1_700_000_100_000),
    ]
    .join("\n");
    let stats = {
        let output = at_cmd(dir)
            .args(["ingest", "--json"])
            .write_stdin(events)
            .output()
            .expect("ingest should not crash");
        assert!(output.status.success());
        serde_json::from_slice::<Value>(&output.stdout).expect("valid JSON")
    };
    assert_eq!(stats["recorded"], 2);
    assert_eq!(stats["dropped"], 0);
}

fn ids(summary: &Value, component_type: &str) -> Vec<String> {
    summary["componentChanges"][component_type]
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let first = run_json(dir.path(), &["init"]);
    assert_eq!(first["created"], true);
    assert_eq!(first["schemaVersion"], 3);
    assert!(dir.path().join(".authtrace/activities.db").exists());

    let second = run_json(dir.path(), &["init"]);
    assert_eq!(second["created"], false);
}

#[test]
fn summary_reports_promoted_content() {
    let dir = TempDir::new().expect("tempdir");
    promoted_project(dir.path());

    let project = run_json(dir.path(), &["summary", "MAIN/PROJ"]);
    assert_eq!(ids(&project, "CONCEPT"), vec!["100005"]);
    assert_eq!(ids(&project, "DESCRIPTION"), vec!["1000014"]);
    assert_eq!(project["truncated"], false);
    assert!(project["changesNotAtTaskLevel"].as_array().is_some_and(Vec::is_empty));

    let task = run_json(dir.path(), &["summary", "MAIN/PROJ/PROJ-1"]);
    assert!(task["componentChanges"].as_object().is_some_and(serde_json::Map::is_empty));

    let own_only = run_json(dir.path(), &["summary", "MAIN/PROJ", "--exclude-promoted"]);
    assert!(ids(&own_only, "CONCEPT").is_empty());
}

#[test]
fn activities_and_promoted_to_list_records() {
    let dir = TempDir::new().expect("tempdir");
    promoted_project(dir.path());

    let promotions = run_json(dir.path(), &["activities", "--type", "PROMOTION"]);
    assert_eq!(promotions["total"], 1);
    assert_eq!(promotions["activities"][0]["user"], "bob");
    assert_eq!(promotions["activities"][0]["sourceBranch"], "MAIN/PROJ/PROJ-1");

    let by_concept = run_json(dir.path(), &["activities", "--concept", "100005"]);
    assert_eq!(by_concept["total"], 1);

    let promoted = run_json(dir.path(), &["promoted-to", "MAIN/PROJ"]);
    let list = promoted.as_array().expect("array");
    // the task's content and the promotion commit itself
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["branch"], "MAIN/PROJ/PROJ-1");
    assert_eq!(list[0]["promotionDate"], 1_700_000_100_000_i64);
}

#[test]
fn redelivered_events_are_duplicates() {
    let dir = TempDir::new().expect("tempdir");
    promoted_project(dir.path());

    let file = dir.path().join("replay.ndjson");
    std::fs::write(
        &file,
        create_concept("MAIN/PROJ/PROJ-1", 1_700_000_000_000, "100005", "1000014") + "\n\nnot json\n",
    )
    .expect("write events");

    let stats = run_json(dir.path(), &["ingest", "--file", "replay.ndjson"]);
    assert_eq!(stats["recorded"], 0);
    assert_eq!(stats["duplicates"], 1);
    assert_eq!(stats["dropped"], 1);
}

#[test]
fn archive_diff_compares_delta_files() {
    let dir = TempDir::new().expect("tempdir");
    promoted_project(dir.path());

    let archive = dir.path().join("delta.zip");
    {
        let file = std::fs::File::create(&archive).expect("create zip");
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("sct2_Concept_Delta.txt", zip::write::FileOptions::default())
            .expect("start entry");
        writer
            .write_all(b"id\teffectiveTime\n100005\t\n300001\t\n")
            .expect("write entry");
        writer.finish().expect("finish zip");
    }

    let diff = run_json(dir.path(), &["archive-diff", "MAIN/PROJ", "delta.zip"]);
    assert_eq!(diff["missingFromDelta"]["DESCRIPTION"], json!(["1000014"]));
    assert_eq!(diff["missingFromStore"]["CONCEPT"], json!(["300001"]));
}

#[test]
fn backfill_after_live_ingestion_updates_nothing() {
    let dir = TempDir::new().expect("tempdir");
    promoted_project(dir.path());

    let stats = run_json(dir.path(), &["backfill", "--window-days", "7"]);
    assert_eq!(stats["updated"], 0);
    assert_eq!(stats["cancelled"], false);

    let repair = run_json(dir.path(), &["backfill", "--rebase"]);
    assert_eq!(repair["updated"], 0);
}

#[test]
fn backfill_stops_when_time_budget_is_spent() {
    let dir = TempDir::new().expect("tempdir");
    promoted_project(dir.path());

    let stats = run_json(dir.path(), &["backfill", "--max-seconds", "0"]);
    assert_eq!(stats["cancelled"], true);
    assert_eq!(stats["updated"], 0);

    let repair = run_json(dir.path(), &["backfill", "--rebase", "--max-seconds", "0"]);
    assert_eq!(repair["cancelled"], true);
}

#[test]
fn split_leaves_small_activities_alone() {
    let dir = TempDir::new().expect("tempdir");
    promoted_project(dir.path());

    let stats = run_json(dir.path(), &["split", "--max-concepts", "5"]);
    assert_eq!(stats["split"], 0);
    assert_eq!(stats["created"], 0);
}

#[test]
fn patch_moves_components_in_and_out_of_summary() {
    let dir = TempDir::new().expect("tempdir");
    promoted_project(dir.path());

    let activity = run_json(
        dir.path(),
        &[
            "patch",
            "MAIN/PROJ",
            "--resolved",
            "CONCEPT:100005",
            "--pending",
            "RELATIONSHIP:1000021",
            "--user",
            "admin",
        ],
    );
    assert_eq!(activity["activityType"], "CONTENT_CHANGE");
    assert_eq!(activity["user"], "admin");

    let project = run_json(dir.path(), &["summary", "MAIN/PROJ"]);
    assert!(ids(&project, "CONCEPT").is_empty());
    assert_eq!(ids(&project, "RELATIONSHIP"), vec!["1000021"]);
    assert_eq!(ids(&project, "DESCRIPTION"), vec!["1000014"]);
}

#[test]
fn text_output_lists_type_and_id() {
    let dir = TempDir::new().expect("tempdir");
    promoted_project(dir.path());

    at_cmd(dir.path())
        .args(["summary", "MAIN/PROJ", "--format", "text"])
        .assert()
        .success()
        .stdout(predicates::str::contains("CONCEPT\t100005"));
}
