//! trellis actor command implementation
//!
//! Provides actor identity helpers (set/show).

use std::path::PathBuf;

use crate::actor;
use crate::cli::Globals;
use crate::config::Config;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};

#[derive(serde::Serialize)]
struct ActorSetReport {
    actor: String,
    path: PathBuf,
}

#[derive(serde::Serialize)]
struct ActorShowReport {
    actor: String,
    source: &'static str,
}

pub fn run_set(name: &str, globals: &Globals) -> Result<()> {
    let storage = globals.storage()?;
    storage.ensure_initialized()?;

    let actor_name = actor::persist_actor(&storage, name)?;
    let actor_path = storage.actor_file();

    let report = ActorSetReport {
        actor: actor_name.clone(),
        path: actor_path.clone(),
    };

    let mut human = HumanOutput::new(format!("trellis actor set: {actor_name}"));
    human.push_summary("actor", actor_name);
    human.push_summary("path", actor_path.display().to_string());
    human.push_next_step("trellis status");

    emit_success(globals.output(), "actor set", &report, Some(&human))
}

pub fn run_show(globals: &Globals) -> Result<()> {
    let storage = globals.storage()?;
    let config = Config::load_from_dir(storage.root());
    let actor_name = actor::resolve_actor(&storage, &config, globals.actor.as_deref())?;

    // Clap folds TRELLIS_ACTOR into --actor, so both report as "flag".
    let source = if globals.actor.as_deref().is_some_and(|a| !a.trim().is_empty()) {
        "flag"
    } else if storage.read_actor()?.is_some() {
        "persisted"
    } else {
        "config"
    };

    let report = ActorShowReport {
        actor: actor_name.clone(),
        source,
    };

    let mut human = HumanOutput::new(format!("trellis actor: {actor_name}"));
    human.push_summary("actor", actor_name);
    human.push_summary("source", source);
    if source == "config" {
        human.push_warning("actor not set; using config default".to_string());
        human.push_next_step("trellis actor set <name>");
    }

    emit_success(globals.output(), "actor show", &report, Some(&human))
}
