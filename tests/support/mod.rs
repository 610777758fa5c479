#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;
use trellis::store::{EntityStore, MemoryStore, SqliteStore};
use trellis::Tracker;

/// A temp working directory with `trellis init` already run.
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    pub fn init() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let test = Self { dir };
        test.cmd().args(["init"]).assert().success();
        Ok(test)
    }

    /// A temp directory without `.trellis/`.
    pub fn empty() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// `trellis` rooted at this directory with a fixed actor.
    pub fn cmd(&self) -> Command {
        let mut cmd = trellis_cmd();
        cmd.current_dir(self.path())
            .env_remove("TRELLIS_DIR")
            .env("TRELLIS_ACTOR", "tester");
        cmd
    }

    /// Run a command with `--json` and return the envelope's `data`.
    pub fn json(&self, args: &[&str]) -> Result<Value, Box<dyn std::error::Error>> {
        let output = self.cmd().arg("--json").args(args).assert().success();
        let envelope: Value = serde_json::from_slice(&output.get_output().stdout)?;
        assert_eq!(envelope["status"], "success");
        Ok(envelope["data"].clone())
    }

    /// Run a command expected to fail and return the envelope's `error`.
    pub fn json_error(&self, args: &[&str], code: i32) -> Result<Value, Box<dyn std::error::Error>> {
        let output = self.cmd().arg("--json").args(args).assert().code(code);
        let envelope: Value = serde_json::from_slice(&output.get_output().stdout)?;
        assert_eq!(envelope["status"], "error");
        Ok(envelope["error"].clone())
    }
}

pub fn trellis_cmd() -> Command {
    Command::cargo_bin("trellis").expect("binary")
}

/// One tracker per store driver, so library tests run against both.
pub fn trackers() -> Vec<(&'static str, Tracker<Box<dyn EntityStore>>)> {
    let memory: Box<dyn EntityStore> = Box::new(MemoryStore::new());
    let sqlite: Box<dyn EntityStore> =
        Box::new(SqliteStore::open_in_memory().expect("sqlite store"));
    vec![
        ("memory", Tracker::new(memory).expect("tracker")),
        ("sqlite", Tracker::new(sqlite).expect("tracker")),
    ]
}

pub fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value[key].as_str().unwrap_or_else(|| panic!("missing string field {key}"))
}
