//! E2E CLI tests covering:
//! - `vl init` / `vl dev --once` / `vl status` against a SQLite hosted store
//! - `vl undo` / `vl redo` rewriting design.json and pushing upstream
//! - `vl checkpoint` and `vl history` (`--json`, `--show`)
//! - Setup failures (no store, not initialized, no identity)
//! - Hosted version conflicts and recovery with `vl pull`
//!
//! Each test runs `vl` as a subprocess in an isolated temp directory.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use vellum_core::store::SqliteStore;
use vellum_core::{Caller, VersionEngine, WorkspaceId};

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

struct Sandbox {
    tmp: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join("project")).expect("project dir");
        std::fs::create_dir_all(tmp.path().join("config")).expect("config dir");
        Self { tmp }
    }

    fn project(&self) -> PathBuf {
        self.tmp.path().join("project")
    }

    fn hosted_db(&self) -> PathBuf {
        self.tmp.path().join("hosted.db")
    }

    /// A `vl` command rooted in the project directory, acting as alice.
    fn vl(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("vl"));
        cmd.current_dir(self.project());
        cmd.env("VELLUM_USER", "alice");
        cmd.env("VELLUM_LOG", "error");
        cmd.env(
            "VELLUM_STORE_URL",
            format!("sqlite://{}", self.hosted_db().display()),
        );
        cmd.env("XDG_CONFIG_HOME", self.tmp.path().join("config"));
        cmd.env_remove("FORMAT");
        cmd
    }

    fn vl_json(&self, args: &[&str]) -> Value {
        let output = self
            .vl()
            .args(args)
            .arg("--json")
            .output()
            .expect("vl should not crash");
        assert!(
            output.status.success(),
            "vl {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("--json should produce valid JSON")
    }

    fn init(&self) -> String {
        let out = self.vl_json(&["init", "site"]);
        out["workspaceId"]
            .as_str()
            .expect("workspaceId field")
            .to_string()
    }

    fn write_design(&self, data: &Value) {
        std::fs::write(design_path(&self.project()), data.to_string()).expect("write design");
    }

    fn read_design(&self) -> Value {
        let raw = std::fs::read_to_string(design_path(&self.project())).expect("read design");
        serde_json::from_str(&raw).expect("design.json is JSON")
    }

    fn edit(&self, data: &Value) -> Value {
        self.write_design(data);
        self.vl_json(&["dev", "--once"])
    }

    fn hosted(&self) -> VersionEngine<SqliteStore> {
        VersionEngine::new(SqliteStore::open(&self.hosted_db()).expect("open hosted"))
    }
}

fn design_path(project: &Path) -> PathBuf {
    project.join("design.json")
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[test]
fn init_creates_mirror_and_empty_design() {
    let sb = Sandbox::new();
    let out = sb.vl_json(&["init", "site"]);
    assert_eq!(out["name"], "site");
    assert_eq!(out["version"], 1);
    assert_eq!(out["createdDesign"], true);
    assert!(out["workspaceId"].as_str().expect("id").starts_with("ws-"));

    assert_eq!(sb.read_design(), json!({}));
    let vellum = sb.project().join(".vellum");
    assert!(vellum.join("config.json").exists());
    assert!(vellum.join("sync.json").exists());
}

#[test]
fn init_keeps_an_existing_design() {
    let sb = Sandbox::new();
    sb.write_design(&json!({"title": "draft"}));
    let out = sb.vl_json(&["init", "site"]);
    assert_eq!(out["createdDesign"], false);
    assert_eq!(sb.read_design(), json!({"title": "draft"}));
}

#[test]
fn second_init_requires_force() {
    let sb = Sandbox::new();
    let first = sb.init();
    sb.vl()
        .args(["init", "site"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already initialized"));

    let out = sb.vl_json(&["init", "site", "--force"]);
    assert_ne!(out["workspaceId"].as_str().expect("id"), first);
}

#[test]
fn edit_undo_redo_round_trip() {
    let sb = Sandbox::new();
    sb.init();

    let first = sb.edit(&json!({"title": "a"}));
    assert_eq!(first["recorded"], true);
    assert_eq!(first["version"], 2);
    assert_eq!(first["eventVersion"], 1);

    let second = sb.edit(&json!({"title": "b", "tags": ["x"]}));
    assert_eq!(second["eventVersion"], 2);

    let status = sb.vl_json(&["status"]);
    assert_eq!(status["local"]["version"], 3);
    assert_eq!(status["local"]["eventVersion"], 2);
    assert_eq!(status["hosted"]["version"], 3);
    assert_eq!(status["syncedHostedVersion"], 3);
    assert_eq!(status["replayOk"], true);

    let undo = sb.vl_json(&["undo"]);
    assert_eq!(undo["success"], true);
    assert_eq!(undo["previousVersion"], 2);
    assert_eq!(undo["currentVersion"], 1);
    assert_eq!(sb.read_design(), json!({"title": "a"}));

    let redo = sb.vl_json(&["redo"]);
    assert_eq!(redo["currentVersion"], 2);
    assert_eq!(sb.read_design(), json!({"title": "b", "tags": ["x"]}));

    // Undo and redo each pushed one update upstream.
    let status = sb.vl_json(&["status"]);
    assert_eq!(status["hosted"]["version"], 5);
    assert_eq!(status["syncedHostedVersion"], 5);
}

#[test]
fn unchanged_design_records_nothing() {
    let sb = Sandbox::new();
    sb.init();
    let out = sb.vl_json(&["dev", "--once"]);
    assert_eq!(out["recorded"], false);
    assert_eq!(out["version"], 1);

    sb.vl()
        .args(["dev", "--once"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));
}

#[test]
fn undo_at_base_reports_nothing_to_undo() {
    let sb = Sandbox::new();
    sb.init();
    sb.vl()
        .arg("undo")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to undo"));

    let out = sb.vl_json(&["redo"]);
    assert_eq!(out["success"], false);
    assert_eq!(out["message"], "Nothing to redo");
}

#[test]
fn checkpoint_and_history() {
    let sb = Sandbox::new();
    sb.init();
    sb.edit(&json!({"title": "a"}));
    sb.edit(&json!({"title": "b"}));

    let cp = sb.vl_json(&["checkpoint", "v1"]);
    assert_eq!(cp["label"], "v1");
    assert_eq!(cp["eventVersion"], 2);

    let history = sb.vl_json(&["history"]);
    assert_eq!(history["eventVersion"], 2);
    assert_eq!(history["maxEventVersion"], 2);
    let events = history["events"].as_array().expect("events array");
    let kinds: Vec<_> = events.iter().map(|e| e["kind"].as_str().expect("kind")).collect();
    assert_eq!(kinds, vec!["patch", "patch", "checkpoint"]);
    assert_eq!(events[0]["userId"], "alice");
    let current: Vec<_> = events
        .iter()
        .filter(|e| e["current"] == true)
        .map(|e| e["position"].clone())
        .collect();
    assert_eq!(current, vec![json!(2)]);

    let limited = sb.vl_json(&["history", "--limit", "1"]);
    assert_eq!(limited["events"].as_array().expect("events").len(), 1);

    assert_eq!(sb.vl_json(&["history", "--show", "0"]), json!({}));
    assert_eq!(sb.vl_json(&["history", "--show", "1"]), json!({"title": "a"}));
}

#[test]
fn history_show_out_of_range_fails() {
    let sb = Sandbox::new();
    sb.init();
    sb.vl()
        .args(["history", "--show", "7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn history_text_marks_current_position() {
    let sb = Sandbox::new();
    sb.init();
    sb.edit(&json!({"title": "a"}));
    sb.vl()
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("* #1"))
        .stdout(predicate::str::contains("add /title"));
}

// ---------------------------------------------------------------------------
// Setup failures
// ---------------------------------------------------------------------------

#[test]
fn init_without_store_fails_with_hint() {
    let sb = Sandbox::new();
    sb.vl()
        .env_remove("VELLUM_STORE_URL")
        .args(["init", "site"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no hosted store configured"))
        .stderr(predicate::str::contains("VELLUM_STORE_URL"));
}

#[test]
fn commands_outside_a_project_fail() {
    let sb = Sandbox::new();
    for cmd in ["status", "undo", "history", "pull"] {
        sb.vl()
            .arg(cmd)
            .assert()
            .failure()
            .stderr(predicate::str::contains("no vellum workspace"));
    }
}

#[test]
fn json_errors_carry_codes() {
    let sb = Sandbox::new();
    let output = sb
        .vl()
        .args(["status", "--json"])
        .output()
        .expect("vl should not crash");
    assert!(!output.status.success());
    let err: Value = serde_json::from_slice(&output.stderr).expect("JSON error");
    assert!(err["error"]["message"].as_str().is_some());
    assert!(err["error"]["error_code"].as_str().is_some());
}

#[test]
fn anonymous_caller_is_rejected() {
    let sb = Sandbox::new();
    sb.vl()
        .env_remove("VELLUM_USER")
        .args(["init", "site"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not authenticated"));
}

#[test]
fn another_user_cannot_step_alices_workspace() {
    let sb = Sandbox::new();
    sb.init();
    sb.edit(&json!({"title": "a"}));
    sb.vl()
        .args(["undo", "--user", "bob"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("access denied"));
    assert_eq!(sb.read_design(), json!({"title": "a"}));
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

#[test]
fn hosted_conflict_then_pull_recovers() {
    let sb = Sandbox::new();
    let id = WorkspaceId::from(sb.init());
    sb.edit(&json!({"title": "a"}));

    // Someone else writes to the hosted workspace.
    let alice = Caller::authenticated("alice");
    let hosted = sb.hosted();
    let ws = hosted.get(&alice, &id).expect("get").expect("present");
    hosted
        .update(&alice, &id, &json!({"title": "remote"}), ws.version)
        .expect("remote update");
    drop(hosted);

    sb.write_design(&json!({"title": "local"}));
    sb.vl()
        .args(["dev", "--once"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("version conflict"));

    let pulled = sb.vl_json(&["pull"]);
    assert_eq!(pulled["changed"], true);
    assert_eq!(pulled["hostedVersion"], 3);
    assert_eq!(sb.read_design(), json!({"title": "remote"}));

    let after = sb.edit(&json!({"title": "merged"}));
    assert_eq!(after["recorded"], true);
    let status = sb.vl_json(&["status"]);
    assert_eq!(status["hosted"]["version"], 4);
    assert_eq!(status["replayOk"], true);

    let hosted = sb.hosted();
    let ws = hosted.get(&alice, &id).expect("get").expect("present");
    assert_eq!(ws.current_data, json!({"title": "merged"}));
}

#[test]
fn pull_when_up_to_date_changes_nothing() {
    let sb = Sandbox::new();
    sb.init();
    sb.edit(&json!({"title": "a"}));
    let out = sb.vl_json(&["pull"]);
    assert_eq!(out["changed"], false);
    assert_eq!(out["hostedVersion"], 2);
}

#[test]
fn completions_name_subcommands() {
    let sb = Sandbox::new();
    sb.vl()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("checkpoint"));
}
