//! Integration tests for the steward binary.
//!
//! These exercise the CLI surface that needs no hosting platform or
//! assistant; workflow behavior is covered by the orchestrator unit tests.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

use steward::phase::{Mode, Phase};
use steward::snapshot::{SnapshotStore, WorkflowSnapshot};

/// A steward command isolated from the caller's environment.
fn steward() -> Command {
    let mut cmd = cargo_bin_cmd!("steward");
    for var in [
        "STEWARD_REPO",
        "STEWARD_MODE",
        "STEWARD_MAINLINE",
        "STEWARD_LOG",
        "GITHUB_TOKEN",
        "GH_TOKEN",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        steward()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("assess"))
            .stdout(predicate::str::contains("undo"));
    }

    #[test]
    fn test_version() {
        steward()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("steward"));
    }

    #[test]
    fn test_issue_number_must_be_numeric() {
        steward().args(["run", "abc"]).assert().failure();
    }
}

mod status {
    use super::*;

    #[test]
    fn test_status_without_state() {
        let dir = create_temp_project();
        steward()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No saved workflows."));

        assert!(dir.path().join(".steward/state").is_dir());
        assert!(dir.path().join(".steward/.gitignore").exists());
    }

    #[test]
    fn test_status_lists_snapshots() {
        let dir = create_temp_project();
        let store = SnapshotStore::new(&dir.path().join(".steward/state"));
        let mut snapshot = WorkflowSnapshot::new(42, Phase::PushReview, Mode::Unsupervised);
        snapshot.retry_count = 2;
        snapshot.interrupted = true;
        store.save(&snapshot).unwrap();

        steward()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("#42"))
            .stdout(predicate::str::contains("retry 2"))
            .stdout(predicate::str::contains("(interrupted)"));
    }

    #[test]
    fn test_corrupt_snapshot_is_ignored() {
        let dir = create_temp_project();
        let state = dir.path().join(".steward/state");
        fs::create_dir_all(&state).unwrap();
        fs::write(state.join("9.json"), "{ not json").unwrap();

        steward()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No saved workflows."));
    }
}

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        steward()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("using defaults"))
            .stdout(predicate::str::contains("max_retries = 3"))
            .stdout(predicate::str::contains("mainline = \"main\""));
    }

    #[test]
    fn test_config_init_then_validate() {
        let dir = create_temp_project();
        steward()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"));
        assert!(dir.path().join(".steward/steward.toml").exists());

        steward()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        steward()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".steward")).unwrap();
        fs::write(
            dir.path().join(".steward/steward.toml"),
            "[workflow]\nmax_retries = 0\n\n[[blockers.rules]]\nname = \"bad\"\npatterns = [\"[\"]\n",
        )
        .unwrap();

        steward()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_retries is 0"))
            .stdout(predicate::str::contains("Invalid glob"));
    }

    #[test]
    fn test_config_env_override() {
        let dir = create_temp_project();
        steward()
            .current_dir(dir.path())
            .env("STEWARD_MAINLINE", "trunk")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("mainline = \"trunk\""));
    }
}

mod workflow_commands {
    use super::*;

    #[test]
    fn test_run_outside_a_repository_fails_with_manual_intervention() {
        let dir = create_temp_project();
        steward()
            .current_dir(dir.path())
            .args(["run", "7"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("not a git repository"));
    }

    #[test]
    fn test_undo_requires_a_repository() {
        let dir = create_temp_project();
        steward()
            .current_dir(dir.path())
            .args(["undo", "7", "--yes"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Error:"));
    }
}
