//! End-to-end tests for the mediaq binary
//!
//! Each test gets its own cache, remote directory and config file, and
//! runs the binary from inside that directory.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Workspace {
    tmp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("remote")).unwrap();
        let ws = Self { tmp };
        ws.write_config();
        ws
    }

    fn path(&self) -> &Path {
        self.tmp.path()
    }

    fn remote(&self) -> PathBuf {
        self.path().join("remote")
    }

    fn config_path(&self) -> PathBuf {
        self.path().join("mediaq.toml")
    }

    /// Directory remote; every stage copies its input
    fn write_config(&self) {
        let copy = r#"kind = "command"
program = "cp"
args = ["{input}", "{output}"]"#;
        let config = format!(
            r#"[cache]
root = "{cache}"
retention_days = 7

[remote]
kind = "fs"
root = "{remote}"

[queue]
max_concurrency = 2
max_retries = 0
base_delay_secs = 1
max_delay_secs = 1
stage_timeout_secs = 30

[transform.convert]
{copy}

[transform.transcribe]
{copy}

[transform.summarize]
{copy}
"#,
            cache = self.path().join("cache").display(),
            remote = self.remote().display(),
            copy = copy,
        );
        std::fs::write(self.config_path(), config).unwrap();
    }

    fn put_remote(&self, rel: &str, bytes: &[u8]) {
        let path = self.remote().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn mediaq(&self) -> Command {
        let mut cmd = Command::cargo_bin("mediaq").unwrap();
        cmd.current_dir(self.path())
            .env("NO_COLOR", "1")
            .env_remove("MEDIAQ_CONFIG")
            .env_remove("MEDIAQ_CACHE_DIR")
            .env_remove("MEDIAQ_REMOTE_KIND")
            .env_remove("MEDIAQ_REMOTE_ROOT")
            .arg("--config")
            .arg(self.config_path());
        cmd
    }
}

// ============================================================================
// Surface
// ============================================================================

#[test]
fn test_help_lists_commands() {
    let mut cmd = Command::cargo_bin("mediaq").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("clean"));
}

#[test]
fn test_missing_subcommand_is_a_usage_error() {
    let mut cmd = Command::cargo_bin("mediaq").unwrap();
    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("subcommand is required"));
}

#[test]
fn test_config_path_echoes_explicit_file() {
    let ws = Workspace::new();
    ws.mediaq()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mediaq.toml"));
}

#[test]
fn test_config_show_renders_effective_settings() {
    let ws = Workspace::new();
    ws.mediaq()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_concurrency = 2"))
        .stdout(predicate::str::contains("kind = \"fs\""));
}

#[test]
fn test_missing_config_file_fails() {
    let ws = Workspace::new();
    let mut cmd = Command::cargo_bin("mediaq").unwrap();
    cmd.current_dir(ws.path())
        .args(["--config", "nope.toml", "stats"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

// ============================================================================
// Submit, run, status
// ============================================================================

#[test]
fn test_submit_saves_a_pending_group() {
    let ws = Workspace::new();
    ws.put_remote("talks/keynote.mp4", b"video");

    let output = ws
        .mediaq()
        .args(["submit", "talks/keynote.mp4", "--stages", "convert", "-d", "keynote"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let group_id = String::from_utf8(output.stdout).unwrap().trim().to_string();
    assert!(uuid::Uuid::parse_str(&group_id).is_ok(), "not a group id: {}", group_id);

    ws.mediaq()
        .args(["status", &group_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("talks/keynote.mp4"))
        .stdout(predicate::str::contains("keynote"))
        .stdout(predicate::str::contains("pending"));

    ws.mediaq()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("talks/keynote.mp4"));
}

#[cfg(unix)]
#[test]
fn test_run_processes_and_publishes() {
    let ws = Workspace::new();
    ws.put_remote("talks/keynote.mp4", b"video");

    let output = ws
        .mediaq()
        .args(["submit", "talks/keynote.mp4"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let group_id = String::from_utf8(output.stdout).unwrap().trim().to_string();

    ws.mediaq()
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Succeeded: 4"));

    for ext in ["m4a", "txt", "md"] {
        let published = ws.remote().join(format!("talks/keynote.mp4.{}", ext));
        assert_eq!(std::fs::read(&published).unwrap(), b"video", "{}", published.display());
    }

    ws.mediaq()
        .args(["status", &group_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("succeeded"));

    // Nothing left to do
    ws.mediaq()
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("No unfinished task groups"));

    ws.mediaq()
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries:        4"))
        .stdout(predicate::str::contains("Published:      3"));
}

#[test]
fn test_submit_rejects_unknown_stage() {
    let ws = Workspace::new();
    ws.mediaq()
        .args(["submit", "talks/keynote.mp4", "--stages", "convert,dance"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown pipeline stage: dance"));
}

#[test]
fn test_status_of_unknown_group_fails() {
    let ws = Workspace::new();
    ws.mediaq()
        .args(["status", "00000000-0000-0000-0000-000000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// ============================================================================
// Cache commands
// ============================================================================

#[test]
fn test_resolve_downloads_then_hits_cache() {
    let ws = Workspace::new();
    ws.put_remote("clips/a.mp4", b"clip");

    ws.mediaq()
        .args(["resolve", "clips/a.mp4"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with("\tdownload\n"));

    ws.mediaq()
        .args(["resolve", "clips/a.mp4"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with("\tcache\n"));
}

#[test]
fn test_resolve_missing_object_fails() {
    let ws = Workspace::new();
    ws.mediaq()
        .args(["resolve", "clips/ghost.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Object not found"));
}

#[test]
fn test_stats_on_empty_cache() {
    let ws = Workspace::new();
    ws.mediaq()
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cache Statistics"))
        .stdout(predicate::str::contains("7 day(s)"));
}

#[test]
fn test_clean_keeps_fresh_downloads() {
    let ws = Workspace::new();
    ws.put_remote("clips/a.mp4", b"clip");
    ws.mediaq().args(["resolve", "clips/a.mp4"]).assert().success();

    ws.mediaq()
        .args(["clean", "--older-than-days", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to clean"));

    ws.mediaq()
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries:        1"));
}

#[test]
fn test_clean_rejects_out_of_range_age() {
    let ws = Workspace::new();
    ws.mediaq()
        .args(["clean", "--older-than-days", "18446744073709551615"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}
