//! trellis - project, phase, task and bug tracking
//!
//! This library provides the core of the trellis CLI: a store-agnostic
//! tracker whose operations keep work items consistent under concurrent
//! edits.
//!
//! # Core Concepts
//!
//! - **Tasks**: move through `todo -> in_progress -> done` (or `blocked`),
//!   every change checked against the caller's expected version
//! - **Phases**: ordered stages of a project with dense `0..N-1` indices
//! - **Priority**: per-phase ordering; tasks entering a phase go last
//! - **Hierarchy**: projects nest under parents without cycles
//! - **Status**: completion and next action per project, rolled up over
//!   descendants and cached for a short TTL
//! - **Notes and updates**: design decision records and progress messages
//!   kept alongside a project's work
//!
//! # Module Organization
//!
//! - `tracker`: operation facade tying everything below together
//! - `store`: `EntityStore` trait with in-memory and SQLite drivers
//! - `lifecycle`: task state machine and version checks
//! - `phase`: phase creation, reorder and normalization
//! - `priority`: next priority inside a phase
//! - `hierarchy`: parent validation and ancestor/descendant walks
//! - `status`: base and aggregated project status
//! - `cache`: TTL cache for aggregated status
//! - `audit`: field-level audit trail
//! - `events`: change broadcast
//! - `cli`, `output`: command-line interface
//! - `config`, `storage`, `lock`, `actor`: workspace plumbing

pub mod actor;
pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod hierarchy;
pub mod lifecycle;
pub mod lock;
pub mod model;
pub mod output;
pub mod phase;
pub mod priority;
pub mod status;
pub mod storage;
pub mod store;
pub mod tracker;

pub use error::{Error, Result};
pub use tracker::{Tracker, TrackerOptions};
