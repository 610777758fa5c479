//! Configuration loading and management
//!
//! Handles parsing of `.trellis.toml` configuration files.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::CONFIG_FILE;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub actor: ActorConfig,

    /// Root project seeded on first use
    #[serde(default)]
    pub root: RootConfig,

    #[serde(default)]
    pub phases: PhasesConfig,

    /// Aggregated status cache
    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// Database path, relative to the working directory
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_backend() -> Backend {
    Backend::Sqlite
}

fn default_db_path() -> String {
    ".trellis/trellis.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Actor used when no flag, env var or persisted value is present
    #[serde(default = "default_actor")]
    pub default: String,
}

fn default_actor() -> String {
    "system".to_string()
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            default: default_actor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default = "default_root_id")]
    pub id: String,

    #[serde(default = "default_root_name")]
    pub name: String,
}

fn default_root_id() -> String {
    "default".to_string()
}

fn default_root_name() -> String {
    "Default Project".to_string()
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            id: default_root_id(),
            name: default_root_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasesConfig {
    /// Name of the phase created implicitly on first task creation
    #[serde(default = "default_phase_name")]
    pub default_name: String,
}

fn default_phase_name() -> String {
    "Default Phase".to_string()
}

impl Default for PhasesConfig {
    fn default() -> Self {
        Self {
            default_name: default_phase_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: String,
}

fn default_cache_ttl() -> String {
    "10s".to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_cache_ttl(),
        }
    }
}

impl StatusConfig {
    pub fn ttl(&self) -> Result<Duration> {
        parse_duration(&self.cache_ttl)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize {
    crate::audit::DEFAULT_MAX_ENTRIES
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

impl Config {
    /// Load configuration from a `.trellis.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a working directory, or return defaults
    pub fn load_from_dir(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring invalid config");
                Self::default()
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        crate::lock::write_atomic(path, content.as_bytes())
    }

    fn validate(&self) -> Result<()> {
        if self.storage.path.trim().is_empty() {
            return Err(Error::InvalidConfig("storage.path cannot be empty".to_string()));
        }
        if self.actor.default.trim().is_empty() {
            return Err(Error::InvalidConfig("actor.default cannot be empty".to_string()));
        }
        let root_id = self.root.id.trim();
        if root_id.is_empty() {
            return Err(Error::InvalidConfig("root.id cannot be empty".to_string()));
        }
        if root_id.chars().any(char::is_whitespace) {
            return Err(Error::InvalidConfig(
                "root.id cannot contain whitespace".to_string(),
            ));
        }
        if self.root.name.trim().is_empty() {
            return Err(Error::InvalidConfig("root.name cannot be empty".to_string()));
        }
        if self.phases.default_name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "phases.default_name cannot be empty".to_string(),
            ));
        }
        self.status
            .ttl()
            .map_err(|err| Error::InvalidConfig(format!("status.cache_ttl: {err}")))?;
        if self.audit.max_entries == 0 {
            return Err(Error::InvalidConfig(
                "audit.max_entries must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse `<number><unit>` with units ms, s, m, h. A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidArgument("Duration cannot be empty".to_string()));
    }

    let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => (&s[..pos], s[pos..].trim()),
        None => (s, "s"),
    };
    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("Invalid duration number: {}", num_str)))?;

    let scaled = |factor: u64| {
        num.checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| Error::InvalidArgument(format!("Duration too large: {}", s)))
    };
    let duration = match unit.to_lowercase().as_str() {
        "ms" => Duration::from_millis(num),
        "s" | "sec" | "secs" | "seconds" => Duration::from_secs(num),
        "m" | "min" | "minutes" => scaled(60)?,
        "h" | "hr" | "hours" => scaled(3600)?,
        _ => {
            return Err(Error::InvalidArgument(format!(
                "Invalid duration unit '{}'. Expected: ms, s, m, h",
                unit
            )));
        }
    };
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::default();
        assert_eq!(cfg.storage.backend, Backend::Sqlite);
        assert_eq!(cfg.storage.path, ".trellis/trellis.db");
        assert_eq!(cfg.actor.default, "system");
        assert_eq!(cfg.root.id, "default");
        assert_eq!(cfg.root.name, "Default Project");
        assert_eq!(cfg.phases.default_name, "Default Phase");
        assert_eq!(cfg.status.ttl().expect("ttl"), Duration::from_secs(10));
        assert_eq!(cfg.audit.max_entries, 5000);
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let content = r#"
[storage]
backend = "memory"

[actor]
default = "alice"

[root]
id = "home"
name = "Home"

[phases]
default_name = "Backlog"

[status]
cache_ttl = "250ms"

[audit]
max_entries = 10
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.storage.backend, Backend::Memory);
        assert_eq!(cfg.storage.path, ".trellis/trellis.db");
        assert_eq!(cfg.actor.default, "alice");
        assert_eq!(cfg.root.id, "home");
        assert_eq!(cfg.phases.default_name, "Backlog");
        assert_eq!(cfg.status.ttl().expect("ttl"), Duration::from_millis(250));
        assert_eq!(cfg.audit.max_entries, 10);
    }

    #[test]
    fn invalid_ttl_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[status]\ncache_ttl = \"soon\"").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            Error::InvalidConfig(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn load_from_dir_falls_back_on_invalid_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(CONFIG_FILE), "[audit]\nmax_entries = 0").expect("write");
        let cfg = Config::load_from_dir(dir.path());
        assert_eq!(cfg.audit.max_entries, 5000);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let mut cfg = Config::default();
        cfg.actor.default = "bob".to_string();
        cfg.save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("backend = \"sqlite\""));
        assert_eq!(Config::load(&path).expect("load").actor.default, "bob");
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("15").expect("bare"), Duration::from_secs(15));
        assert_eq!(parse_duration("2m").expect("m"), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").expect("h"), Duration::from_secs(3600));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn parse_duration_rejects_overflow() {
        for input in ["5124095576040000h", "9999999999999999999h", "307445734561825861m"] {
            match parse_duration(input) {
                Err(Error::InvalidArgument(message)) => assert!(message.contains("too large"), "{message}"),
                other => panic!("{input}: expected overflow error, got {other:?}"),
            }
        }
        assert_eq!(
            parse_duration("5124095576040000s").expect("seconds"),
            Duration::from_secs(5_124_095_576_040_000)
        );
    }

    #[test]
    fn oversized_cache_ttl_is_an_error() {
        let cfg: Config = toml::from_str("[status]\ncache_ttl = \"9999999999999999999h\"\n").expect("parse");
        assert!(cfg.status.ttl().is_err());
    }
}
