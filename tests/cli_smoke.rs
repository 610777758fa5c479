mod support;

use predicates::str::contains;

use support::{trellis_cmd, TestDir};

#[test]
fn trellis_help_works() {
    trellis_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("project, phase, task and bug tracking"));
}

#[test]
fn subcommand_help_works() {
    let subcommands = [
        "init", "project", "phase", "task", "bug", "note", "update", "status", "audit",
        "backfill", "actor",
    ];

    for cmd in subcommands {
        trellis_cmd().arg(cmd).arg("--help").assert().success();
    }
}

#[test]
fn commands_require_init() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TestDir::empty()?;
    let error = dir.json_error(&["task", "list"], 2)?;
    assert_eq!(error["kind"], "not_initialized");

    dir.cmd()
        .args(["project", "list"])
        .assert()
        .code(2)
        .stderr(contains("hint: trellis init"));
    Ok(())
}

#[test]
fn init_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TestDir::init()?;
    assert!(dir.path().join(".trellis.toml").is_file());
    assert!(dir.path().join(".trellis").join("trellis.db").is_file());

    let data = dir.json(&["init"])?;
    assert_eq!(data["created"]["config"], false);
    assert_eq!(data["created"]["data_dir"], false);
    assert_eq!(data["root_project"], "default");
    Ok(())
}

#[test]
fn dir_flag_targets_another_directory() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TestDir::init()?;
    let elsewhere = tempfile::tempdir()?;

    trellis_cmd()
        .current_dir(elsewhere.path())
        .env_remove("TRELLIS_DIR")
        .arg("--dir")
        .arg(dir.path())
        .args(["project", "show", "default"])
        .assert()
        .success()
        .stdout(contains("Default Project"));
    Ok(())
}
