//! On-disk layout for trellis
//!
//! # Directory Structure
//!
//! ```text
//! .trellis.toml                 # Configuration (optional)
//! .trellis/
//!   trellis.db                  # SQLite entity store (default backend)
//!   trellis.lock                # Held by every CLI mutation
//!   audit.jsonl                 # Audit trail, one entry per line
//!   audit.lock                  # Guards audit appends
//!   actor                       # Persisted actor identity
//! ```

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::lock;

/// Name of the data directory
pub const DATA_DIR: &str = ".trellis";

/// Name of the configuration file
pub const CONFIG_FILE: &str = ".trellis.toml";

/// Paths and file helpers rooted at a working directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.data_dir().join("trellis.lock")
    }

    pub fn audit_file(&self) -> PathBuf {
        self.data_dir().join("audit.jsonl")
    }

    pub fn audit_lock_file(&self) -> PathBuf {
        self.data_dir().join("audit.lock")
    }

    pub fn actor_file(&self) -> PathBuf {
        self.data_dir().join("actor")
    }

    /// Resolve a configured path against the root unless it is absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Create `.trellis/` and an empty audit file.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.data_dir())?;
        let audit = self.audit_file();
        if !audit.exists() {
            File::create(&audit)?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.data_dir().is_dir()
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized(self.root.clone()))
        }
    }

    // =========================================================================
    // File I/O helpers
    // =========================================================================

    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        lock::write_atomic(path, data)
    }

    /// Append one record to a JSONL file.
    ///
    /// Not atomic across processes; callers hold a lock.
    pub fn append_jsonl<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(record)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", json)?;
        file.sync_all()?;
        Ok(())
    }

    /// Replace a JSONL file with `records`, atomically.
    pub fn write_jsonl<T: Serialize>(&self, path: &Path, records: &[T]) -> Result<()> {
        let mut data = Vec::new();
        for record in records {
            serde_json::to_writer(&mut data, record)?;
            data.push(b'\n');
        }
        self.write_atomic(path, &data)
    }

    /// Read every record from a JSONL file; a missing file reads as empty.
    pub fn read_jsonl<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    // =========================================================================
    // Actor persistence
    // =========================================================================

    pub fn read_actor(&self) -> Result<Option<String>> {
        let path = self.actor_file();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let actor = raw.trim();
        Ok((!actor.is_empty()).then(|| actor.to_string()))
    }

    pub fn write_actor(&self, actor: &str) -> Result<()> {
        self.write_atomic(&self.actor_file(), format!("{actor}\n").as_bytes())
    }
}
