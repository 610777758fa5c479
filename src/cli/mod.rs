//! Command-line interface for trellis
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, warn};

use crate::audit::FileAuditSink;
use crate::config::{Backend, Config};
use crate::error::Result;
use crate::events::EventDestination;
use crate::lock::{FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::output::OutputOptions;
use crate::storage::Storage;
use crate::store::{EntityStore, MemoryStore, SqliteStore, View};
use crate::tracker::{Tracker, TrackerOptions};

mod actor;
mod audit;
mod bug;
mod init;
mod note;
mod phase;
mod project;
mod task;
mod update;

/// trellis - project, phase, task and bug tracking
///
/// Tasks move through a small state machine guarded by optimistic versions,
/// phases keep a dense order, and project status rolls up the hierarchy.
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Working directory holding .trellis/ (defaults to current directory)
    #[arg(long, global = true, env = "TRELLIS_DIR")]
    pub dir: Option<PathBuf>,

    /// Actor identity recorded on mutations
    #[arg(long, global = true, env = "TRELLIS_ACTOR")]
    pub actor: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit change events as JSON lines ("-" for stdout, or a file path)
    #[arg(long, global = true)]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create .trellis/ and a default .trellis.toml
    Init,

    /// Project management
    #[command(subcommand)]
    Project(ProjectCommands),

    /// Phase management
    #[command(subcommand)]
    Phase(PhaseCommands),

    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),

    /// Bug management
    #[command(subcommand)]
    Bug(BugCommands),

    /// Design decision records
    #[command(subcommand)]
    Note(NoteCommands),

    /// Progress messages on projects and tasks
    #[command(subcommand)]
    Update(UpdateCommands),

    /// Project status, optionally rolled up over child projects
    Status {
        /// Project id (defaults to the root project)
        project: Option<String>,

        /// Include every descendant project
        #[arg(long)]
        rollup: bool,
    },

    /// Show recent audit entries
    Audit {
        /// Maximum number of entries
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Attach unphased tasks to their project's first phase
    Backfill,

    /// Actor identity helpers
    #[command(subcommand)]
    Actor(ActorCommands),
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Create a project
    Create {
        name: String,

        /// Parent project id
        #[arg(long)]
        parent: Option<String>,

        /// Explicit project id
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// List projects
    List {
        /// Include archived projects
        #[arg(long)]
        archived: bool,
    },

    /// Show a project
    Show { id: String },

    /// List direct child projects
    Children { id: String },

    /// Change or clear a project's parent
    SetParent {
        id: String,

        /// New parent id; omit to make the project top-level
        #[arg(long)]
        parent: Option<String>,
    },

    /// Archive a project
    Archive { id: String },

    /// Restore an archived project
    Restore { id: String },
}

#[derive(Subcommand, Debug)]
pub enum PhaseCommands {
    /// Append a phase to a project
    Create { project: String, name: String },

    /// List a project's phases in order
    List {
        project: String,

        /// Include archived phases
        #[arg(long)]
        archived: bool,
    },

    /// Reorder phases with PHASE=INDEX pairs
    Reorder {
        #[arg(required = true)]
        entries: Vec<String>,
    },

    /// Archive a phase
    Archive { id: String },

    /// Restore an archived phase
    Restore { id: String },
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    Create {
        project: String,
        title: String,

        /// Target phase (defaults to the project's first phase)
        #[arg(long)]
        phase: Option<String>,
    },

    /// List tasks
    List {
        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        phase: Option<String>,

        /// Filter by status: todo, in_progress, done, blocked
        #[arg(long)]
        status: Option<String>,

        /// Include deleted tasks
        #[arg(long)]
        deleted: bool,

        /// Sort by phase order, then priority
        #[arg(long)]
        ordered: bool,
    },

    /// Show a task
    Show { id: String },

    /// Move a task to another phase
    Move {
        id: String,
        phase: String,

        /// Explicit priority (defaults to the end of the phase)
        #[arg(long)]
        priority: Option<i64>,
    },

    /// Change a task's status
    Transition {
        id: String,

        /// Target status: todo, in_progress, done, blocked
        status: String,

        /// Why the status changes
        #[arg(long, short)]
        rationale: String,

        /// Version the change was based on
        #[arg(long)]
        expected_version: u32,

        /// Confidence between 0 and 1
        #[arg(long)]
        confidence: Option<f64>,
    },

    /// Soft-delete a task
    Delete { id: String },

    /// Restore a deleted task
    Restore { id: String },
}

#[derive(Subcommand, Debug)]
pub enum BugCommands {
    /// File a bug
    Create {
        project: String,
        title: String,

        /// low, medium, high, critical
        #[arg(long)]
        severity: Option<String>,

        /// Linked task ids
        #[arg(long = "link")]
        links: Vec<String>,

        /// Reproduction steps, in order
        #[arg(long = "repro")]
        repro_steps: Vec<String>,

        #[arg(long)]
        fix: Option<String>,
    },

    /// List bugs
    List {
        #[arg(long)]
        project: Option<String>,

        /// Include deleted bugs
        #[arg(long)]
        deleted: bool,
    },

    /// Show a bug
    Show { id: String },

    /// Update a bug
    Update {
        id: String,

        /// Version the change was based on
        #[arg(long)]
        expected_version: u32,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        severity: Option<String>,

        /// open, triaged, in_progress, resolved, closed
        #[arg(long)]
        status: Option<String>,

        /// Replace linked task ids
        #[arg(long = "link")]
        links: Option<Vec<String>>,

        /// Replace reproduction steps
        #[arg(long = "repro")]
        repro_steps: Option<Vec<String>>,

        #[arg(long)]
        fix: Option<String>,
    },

    /// Soft-delete a bug
    Delete { id: String },

    /// Restore a deleted bug
    Restore { id: String },
}

#[derive(Subcommand, Debug)]
pub enum NoteCommands {
    /// Record a design decision
    Create {
        project: String,
        title: String,

        /// Forces and constraints behind the decision
        #[arg(long)]
        context: String,

        #[arg(long)]
        decision: String,

        /// What follows from the decision
        #[arg(long)]
        consequences: String,
    },

    /// List the newest design notes, oldest first
    List {
        #[arg(long)]
        project: Option<String>,

        /// Include deleted notes
        #[arg(long)]
        deleted: bool,

        /// Maximum number of notes (default 50, at most 200)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show a design note
    Show { id: String },

    /// Mark a note as replaced by a newer one
    Supersede {
        id: String,

        /// Id of the replacing note
        #[arg(long)]
        by: String,
    },

    /// Soft-delete a design note
    Delete { id: String },

    /// Restore a deleted design note
    Restore { id: String },
}

#[derive(Subcommand, Debug)]
pub enum UpdateCommands {
    /// Post a status update
    Post {
        project: String,
        message: String,

        /// Task the update is about
        #[arg(long)]
        task: Option<String>,
    },

    /// List the newest status updates, oldest first
    List {
        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        task: Option<String>,

        /// Maximum number of updates (default 50, at most 200)
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ActorCommands {
    /// Persist the actor identity in .trellis/actor
    Set { name: String },

    /// Show the resolved actor identity
    Show,
}

/// Global flags shared by every command.
#[derive(Debug, Clone)]
pub(crate) struct Globals {
    pub dir: Option<PathBuf>,
    pub actor: Option<String>,
    pub json: bool,
    pub quiet: bool,
    pub events: Option<String>,
}

impl Globals {
    pub fn storage(&self) -> Result<Storage> {
        let root = match &self.dir {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };
        Ok(Storage::new(root))
    }

    fn events_to_stdout(&self) -> bool {
        matches!(
            EventDestination::parse(self.events.as_deref()),
            Some(EventDestination::Stdout)
        )
    }

    /// Output options; events on stdout take over the stream.
    pub fn output(&self) -> OutputOptions {
        let events_to_stdout = self.events_to_stdout();
        OutputOptions {
            json: self.json && !events_to_stdout,
            quiet: self.quiet || events_to_stdout,
        }
    }
}

/// An opened tracker plus what a command needs around it.
pub(crate) struct Context {
    pub tracker: Tracker<Box<dyn EntityStore>>,
    pub actor: String,
    pub storage: Storage,
    _lock: Option<FileLock>,
}

/// Open the tracker for a read-only command.
pub(crate) fn open_reader(globals: &Globals) -> Result<Context> {
    open_context(globals, false)
}

/// Open the tracker for a mutation, holding the workspace lock.
pub(crate) fn open_writer(globals: &Globals) -> Result<Context> {
    open_context(globals, true)
}

fn open_context(globals: &Globals, write: bool) -> Result<Context> {
    let storage = globals.storage()?;
    storage.ensure_initialized()?;
    let lock = if write {
        Some(FileLock::acquire(storage.lock_file(), DEFAULT_LOCK_TIMEOUT_MS)?)
    } else {
        None
    };

    let config = Config::load_from_dir(storage.root());
    let actor = crate::actor::resolve_actor(&storage, &config, globals.actor.as_deref())?;
    let options = TrackerOptions::from_config(&config)?;
    let store = open_store(&storage, &config)?;

    // Seeding the root project writes, so a reader takes the lock when it is missing.
    let lock = match lock {
        Some(lock) => Some(lock),
        None if needs_root_seed(&store, &options)? => {
            debug!(root = %options.root_id, "root project missing; locking to seed it");
            Some(FileLock::acquire(storage.lock_file(), DEFAULT_LOCK_TIMEOUT_MS)?)
        }
        None => None,
    };

    let audit = FileAuditSink::new(storage.clone(), options.audit_max_entries);
    let mut tracker = Tracker::with_options(store, options)?.with_audit_sink(Box::new(audit));
    if let Some(destination) = EventDestination::parse(globals.events.as_deref()) {
        tracker = tracker.with_change_sink(Box::new(destination.open()?));
    }

    Ok(Context {
        tracker,
        actor,
        storage,
        _lock: lock,
    })
}

fn needs_root_seed<S: EntityStore + ?Sized>(store: &S, options: &TrackerOptions) -> Result<bool> {
    Ok(store.get_project(&options.root_id, View::All)?.is_none())
}

fn open_store(storage: &Storage, config: &Config) -> Result<Box<dyn EntityStore>> {
    match config.storage.backend {
        Backend::Sqlite => {
            let path = storage.resolve(std::path::Path::new(&config.storage.path));
            debug!(path = %path.display(), "opening sqlite store");
            Ok(Box::new(SqliteStore::open(&path)?))
        }
        Backend::Memory => {
            warn!("memory backend selected; nothing persists past this command");
            Ok(Box::new(MemoryStore::new()))
        }
    }
}

impl Cli {
    fn globals(&self) -> Globals {
        Globals {
            dir: self.dir.clone(),
            actor: self.actor.clone(),
            json: self.json,
            quiet: self.quiet,
            events: self.events.clone(),
        }
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let globals = self.globals();
        match self.command {
            Commands::Init => init::run(&globals),
            Commands::Project(cmd) => project::run(cmd, &globals),
            Commands::Phase(cmd) => phase::run(cmd, &globals),
            Commands::Task(cmd) => task::run(cmd, &globals),
            Commands::Bug(cmd) => bug::run(cmd, &globals),
            Commands::Note(cmd) => note::run(cmd, &globals),
            Commands::Update(cmd) => update::run(cmd, &globals),
            Commands::Status { project, rollup } => {
                project::run_status(project.as_deref(), rollup, &globals)
            }
            Commands::Audit { limit } => audit::run_log(limit, &globals),
            Commands::Backfill => audit::run_backfill(&globals),
            Commands::Actor(cmd) => match cmd {
                ActorCommands::Set { name } => actor::run_set(&name, &globals),
                ActorCommands::Show => actor::run_show(&globals),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_transition_flags() {
        let cli = Cli::try_parse_from([
            "trellis",
            "--json",
            "task",
            "transition",
            "t-1",
            "in_progress",
            "--rationale",
            "picking up",
            "--expected-version",
            "1",
        ])
        .expect("parse");
        assert!(cli.json);
        match cli.command {
            Commands::Task(TaskCommands::Transition {
                id,
                status,
                expected_version,
                ..
            }) => {
                assert_eq!(id, "t-1");
                assert_eq!(status, "in_progress");
                assert_eq!(expected_version, 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn events_on_stdout_silence_json() {
        let globals = Globals {
            dir: None,
            actor: None,
            json: true,
            quiet: false,
            events: Some("-".to_string()),
        };
        let output = globals.output();
        assert!(!output.json);
        assert!(output.quiet);
    }

    #[test]
    fn readers_lock_only_to_seed_a_missing_root() {
        let options = TrackerOptions::default();
        let mut store = MemoryStore::new();
        assert!(needs_root_seed(&store, &options).expect("check"));

        let mut root = crate::model::Project::new(options.root_id.clone(), "Root", None);
        root.archived_at = Some(chrono::Utc::now());
        store.put_project(&root).expect("put");
        assert!(!needs_root_seed(&store, &options).expect("check"));
    }

    #[test]
    fn parses_note_and_update_commands() {
        let cli = Cli::try_parse_from([
            "trellis", "note", "supersede", "dn-1", "--by", "dn-2",
        ])
        .expect("parse");
        match cli.command {
            Commands::Note(NoteCommands::Supersede { id, by }) => {
                assert_eq!(id, "dn-1");
                assert_eq!(by, "dn-2");
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from([
            "trellis", "update", "list", "--task", "t-1", "--limit", "5",
        ])
        .expect("parse");
        match cli.command {
            Commands::Update(UpdateCommands::List { task, limit, project }) => {
                assert_eq!(task.as_deref(), Some("t-1"));
                assert_eq!(limit, Some(5));
                assert!(project.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
