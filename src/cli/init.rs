//! trellis init command implementation
//!
//! Creates `.trellis/`, a default `.trellis.toml`, and seeds the root project.

use std::path::{Path, PathBuf};

use crate::cli::{open_writer, Globals};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};

#[derive(serde::Serialize)]
struct InitReport {
    dir: PathBuf,
    root_project: String,
    created: InitCreated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    config: bool,
    data_dir: bool,
}

pub fn run(globals: &Globals) -> Result<()> {
    let storage = globals.storage()?;

    let created_data_dir = !storage.data_dir().exists();
    if storage.data_dir().exists() && !storage.data_dir().is_dir() {
        return Err(Error::OperationFailed(format!(
            "Expected directory at {}",
            storage.data_dir().display()
        )));
    }
    storage.init()?;
    let created_config = ensure_config(&storage.config_file())?;

    // Opening a writer seeds the root project and creates the database.
    let ctx = open_writer(globals)?;
    let root_project = ctx.tracker.root_id().to_string();

    let report = InitReport {
        dir: storage.root().to_path_buf(),
        root_project: root_project.clone(),
        created: InitCreated {
            config: created_config,
            data_dir: created_data_dir,
        },
    };

    let mut created_items = Vec::new();
    if created_config {
        created_items.push(".trellis.toml");
    }
    if created_data_dir {
        created_items.push(".trellis/");
    }

    let header = if created_items.is_empty() {
        "trellis init: nothing to do".to_string()
    } else {
        "trellis init: initialized".to_string()
    };

    let mut human = HumanOutput::new(header);
    human.push_summary("dir", storage.root().display().to_string());
    human.push_summary("root project", root_project.clone());
    human.push_summary(
        "created",
        if created_items.is_empty() {
            "none".to_string()
        } else {
            created_items.join(", ")
        },
    );
    human.push_next_step("trellis actor set <name>");
    human.push_next_step(format!("trellis task create {root_project} \"<title>\""));

    emit_success(globals.output(), "init", &report, Some(&human))
}

fn ensure_config(config_path: &Path) -> Result<bool> {
    if config_path.exists() {
        if !config_path.is_file() {
            return Err(Error::OperationFailed(format!(
                ".trellis.toml exists but is not a file: {}",
                config_path.display()
            )));
        }
        return Ok(false);
    }

    Config::default().save(config_path)?;
    Ok(true)
}
