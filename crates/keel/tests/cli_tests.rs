//! Integration tests for the keel CLI.
//!
//! These tests run the built binary against temporary workspaces.

use chrono::Duration;
use keel::domain::{DependencyType, NewIssue};
use keel::id_generation::IdGeneratorConfig;
use keel::storage::{IssueStorage, MemoryStorage};
use rstest::{fixture, rstest};
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

mod common;
use common::{run_keel_in_dir, stderr, stdout};

// ============================================================================
// Test Fixtures
// ============================================================================

/// Provides a fresh temporary directory for each test
#[fixture]
fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Provides a temporary directory with an initialized keel workspace
#[fixture]
fn initialized_dir() -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp directory");
    let output = run_keel_in_dir(temp.path(), &["init", "--prefix", "kl", "--quiet"]);
    assert!(
        output.status.success(),
        "Failed to initialize keel: {}",
        stderr(&output)
    );
    temp
}

/// Write an export with `kl-1` (open) blocking `kl-2` (open) into the workspace.
async fn seed_export(dir: &Path) {
    let mut storage = MemoryStorage::new(IdGeneratorConfig::new("kl").sequential());
    let docs = storage.create(NewIssue::titled("Write docs")).await.unwrap();
    storage
        .create(NewIssue {
            priority: 1,
            dependencies: vec![(docs.id.clone(), DependencyType::Blocks)],
            ..NewIssue::titled("Ship release")
        })
        .await
        .unwrap();
    keel::sync::export(&mut storage, &dir.join(".keel/issues.jsonl"), Duration::days(30))
        .await
        .unwrap();
}

fn json_stdout(output: &std::process::Output) -> Value {
    assert!(output.status.success(), "command failed: {}", stderr(output));
    serde_json::from_str(&stdout(output)).expect("stdout should be JSON")
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[rstest]
fn test_cli_help_shows_all_commands(temp_dir: TempDir) {
    let output = run_keel_in_dir(temp_dir.path(), &["--help"]);

    assert!(output.status.success());
    let help = stdout(&output);
    for command in [
        "init",
        "check",
        "cycles",
        "ready",
        "blocked",
        "epics",
        "export",
        "import",
        "prune",
        "migrate-deletions",
        "federation",
    ] {
        assert!(help.contains(command), "help should list '{command}'");
    }
}

#[rstest]
fn test_cli_version(temp_dir: TempDir) {
    let output = run_keel_in_dir(temp_dir.path(), &["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[rstest]
fn test_cli_no_args(temp_dir: TempDir) {
    let output = run_keel_in_dir(temp_dir.path(), &[]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("keel --help"));
}

#[rstest]
#[case(&["check"])]
#[case(&["ready"])]
#[case(&["federation", "status"])]
fn test_commands_outside_workspace_fail(temp_dir: TempDir, #[case] args: &[&str]) {
    let output = run_keel_in_dir(temp_dir.path(), args);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Not a keel workspace"));
}

// ============================================================================
// Check Command Tests
// ============================================================================

#[rstest]
fn test_check_fresh_workspace(initialized_dir: TempDir) {
    let output = run_keel_in_dir(initialized_dir.path(), &["check", "--no-git"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("[PASS] consistency"));
    assert!(!text.contains("[FAIL]"));
}

#[rstest]
fn test_check_json_report(initialized_dir: TempDir) {
    let output = run_keel_in_dir(initialized_dir.path(), &["check", "--no-git", "--json"]);
    let report = json_stdout(&output);

    let checks = report["checks"].as_array().expect("checks array");
    assert!(checks.iter().any(|c| c["name"] == "cycles" && c["status"] == "pass"));
    assert!(checks.iter().all(|c| c["name"] != "git"), "--no-git skips git checks");
}

#[rstest]
fn test_check_fails_on_conflict_markers(initialized_dir: TempDir) {
    std::fs::write(
        initialized_dir.path().join(".keel/issues.jsonl"),
        "<<<<<<< HEAD\n=======\n>>>>>>> theirs\n",
    )
    .unwrap();

    let output = run_keel_in_dir(initialized_dir.path(), &["check", "--no-git"]);

    assert!(!output.status.success());
    assert!(stdout(&output).contains("[FAIL] merge-conflict"));
    assert!(stderr(&output).contains("workspace check failed"));
}

#[rstest]
fn test_check_subdirectory_finds_workspace(initialized_dir: TempDir) {
    let nested = initialized_dir.path().join("src/deep");
    std::fs::create_dir_all(&nested).unwrap();

    let output = run_keel_in_dir(&nested, &["check", "--no-git"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
}

// ============================================================================
// Import, Export and Work Queries
// ============================================================================

#[rstest]
#[tokio::test]
async fn test_import_then_query(initialized_dir: TempDir) {
    let dir = initialized_dir.path();
    seed_export(dir).await;

    let output = run_keel_in_dir(dir, &["import"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("2 created"));

    let ready = json_stdout(&run_keel_in_dir(dir, &["ready", "--json"]));
    let ids: Vec<&str> = ready
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|i| i["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["kl-1"]);

    let blocked = json_stdout(&run_keel_in_dir(dir, &["blocked", "--json"]));
    assert_eq!(blocked[0]["issue"]["id"], "kl-2");
    assert_eq!(blocked[0]["open_blockers"][0], "kl-1");

    let check = run_keel_in_dir(dir, &["check", "--no-git"]);
    assert!(check.status.success(), "stdout: {}", stdout(&check));
    assert!(stdout(&check).contains("[PASS] consistency"));
}

#[rstest]
#[tokio::test]
async fn test_import_is_idempotent(initialized_dir: TempDir) {
    let dir = initialized_dir.path();
    seed_export(dir).await;

    assert!(run_keel_in_dir(dir, &["import"]).status.success());
    let second = json_stdout(&run_keel_in_dir(dir, &["import", "--json"]));

    assert_eq!(second["created"], 0);
    assert_eq!(second["unchanged"], 2);
}

#[rstest]
#[tokio::test]
async fn test_export_to_custom_path(initialized_dir: TempDir) {
    let dir = initialized_dir.path();
    seed_export(dir).await;
    assert!(run_keel_in_dir(dir, &["import"]).status.success());

    let report = json_stdout(&run_keel_in_dir(
        dir,
        &["export", "--output", "backup/issues.jsonl", "--json"],
    ));

    assert_eq!(report["written"], 2);
    let content = std::fs::read_to_string(dir.join("backup/issues.jsonl")).unwrap();
    assert_eq!(content.lines().count(), 2);
}

#[rstest]
fn test_export_rejects_reserved_name(initialized_dir: TempDir) {
    let output = run_keel_in_dir(
        initialized_dir.path(),
        &["export", "--output", ".keel/deletions.jsonl"],
    );
    assert!(!output.status.success());
}

#[rstest]
fn test_import_foreign_prefix_needs_rename(initialized_dir: TempDir) {
    let dir = initialized_dir.path();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let mut other = MemoryStorage::new(IdGeneratorConfig::new("zz").sequential());
        other.create(NewIssue::titled("Foreign work")).await.unwrap();
        keel::sync::export(&mut other, &dir.join(".keel/issues.jsonl"), Duration::days(30))
            .await
            .unwrap();
    });

    let refused = run_keel_in_dir(dir, &["import"]);
    assert!(!refused.status.success());
    assert!(stderr(&refused).contains("foreign prefixes"));

    let renamed = json_stdout(&run_keel_in_dir(dir, &["import", "--rename-prefix", "--json"]));
    assert_eq!(renamed["created"], 1);
    assert_eq!(renamed["renamed_prefixes"][0], "zz");

    let ready = json_stdout(&run_keel_in_dir(dir, &["ready", "--json"]));
    assert_eq!(ready[0]["id"], "kl-1");
}

#[rstest]
fn test_cycles_on_empty_workspace(initialized_dir: TempDir) {
    let output = run_keel_in_dir(initialized_dir.path(), &["cycles"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No dependency cycles."));
}

#[rstest]
fn test_epics_on_empty_workspace(initialized_dir: TempDir) {
    let epics = json_stdout(&run_keel_in_dir(
        initialized_dir.path(),
        &["epics", "--eligible", "--json"],
    ));
    assert_eq!(epics, Value::Array(vec![]));
}

// ============================================================================
// Tombstone Maintenance
// ============================================================================

#[rstest]
fn test_prune_dry_run_on_empty_workspace(initialized_dir: TempDir) {
    let output = run_keel_in_dir(initialized_dir.path(), &["prune", "--dry-run"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No expired tombstones (0 total)."));
}

#[rstest]
fn test_migrate_deletions_creates_stub_tombstones(initialized_dir: TempDir) {
    let dir = initialized_dir.path();
    std::fs::write(
        dir.join(".keel/deletions.jsonl"),
        "{\"id\":\"kl-9\",\"ts\":\"2020-01-02T03:04:05Z\",\"reason\":\"dup\"}\nnot json\n",
    )
    .unwrap();

    let report = json_stdout(&run_keel_in_dir(dir, &["migrate-deletions", "--json"]));
    assert_eq!(report["stubs_created"], 1);
    assert_eq!(report["malformed_lines"], 1);
    assert!(dir.join(".keel/deletions.jsonl.migrated").exists());
    assert!(!dir.join(".keel/deletions.jsonl").exists());

    let again = json_stdout(&run_keel_in_dir(dir, &["migrate-deletions", "--json"]));
    assert_eq!(again["already_migrated"], true);

    // The stub is far past the default TTL.
    let dry_run = json_stdout(&run_keel_in_dir(dir, &["prune", "--dry-run", "--json"]));
    assert_eq!(dry_run["expired"][0], "kl-9");
    let pruned = json_stdout(&run_keel_in_dir(dir, &["prune", "--json"]));
    assert_eq!(pruned["pruned"][0], "kl-9");
    let after = json_stdout(&run_keel_in_dir(dir, &["prune", "--dry-run", "--json"]));
    assert_eq!(after["total"], 0);
}

// ============================================================================
// Federation
// ============================================================================

#[rstest]
fn test_federation_status_not_applicable(initialized_dir: TempDir) {
    let output = run_keel_in_dir(initialized_dir.path(), &["federation", "status"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("not applicable"));

    let report = json_stdout(&run_keel_in_dir(
        initialized_dir.path(),
        &["federation", "status", "--json"],
    ));
    assert_eq!(report["applicable"], false);
}

#[rstest]
fn test_federation_resolve_without_port_fails(initialized_dir: TempDir) {
    let output = run_keel_in_dir(
        initialized_dir.path(),
        &["federation", "resolve", "--strategy", "ours"],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("replicating storage backend"));
}

