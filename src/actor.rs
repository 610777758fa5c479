//! Actor identity resolution.
//!
//! Resolution order:
//! 1) CLI --actor (explicit)
//! 2) TRELLIS_ACTOR environment variable
//! 3) Persisted value in .trellis/actor
//! 4) Config default (actor.default)

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::Storage;

pub const ACTOR_ENV: &str = "TRELLIS_ACTOR";

pub fn resolve_actor(storage: &Storage, config: &Config, cli_actor: Option<&str>) -> Result<String> {
    if let Some(actor) = non_empty(cli_actor) {
        return Ok(actor.to_string());
    }

    if let Ok(env_actor) = std::env::var(ACTOR_ENV) {
        if let Some(actor) = non_empty(Some(env_actor.as_str())) {
            return Ok(actor.to_string());
        }
    }

    if let Some(actor) = storage.read_actor()? {
        return Ok(actor);
    }

    Ok(config.actor.default.clone())
}

/// Persist the actor identity in `.trellis/actor`.
pub fn persist_actor(storage: &Storage, actor: &str) -> Result<String> {
    let actor = non_empty(Some(actor))
        .ok_or_else(|| Error::InvalidArgument("actor name cannot be empty".to_string()))?;
    storage.write_actor(actor)?;
    Ok(actor.to_string())
}

fn non_empty(input: Option<&str>) -> Option<&str> {
    input.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_actor_wins() {
        let temp = tempfile::tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().to_path_buf());
        storage.write_actor("persisted").expect("write");
        let actor = resolve_actor(&storage, &Config::default(), Some("  cli-agent ")).expect("resolve");
        assert_eq!(actor, "cli-agent");
    }

    #[test]
    fn persist_rejects_blank() {
        let temp = tempfile::tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().to_path_buf());
        assert!(persist_actor(&storage, "   ").is_err());
        assert_eq!(persist_actor(&storage, " ada ").expect("persist"), "ada");
        assert_eq!(storage.read_actor().expect("read"), Some("ada".to_string()));
    }
}
