//! CLI command implementations

mod lifecycle;
mod manage;

use anyhow::{bail, Result};
use lxdspawn_core::{SessionStore, Spawner};
use lxdspawn_provider::ContainerName;
use std::path::Path;

pub use lifecycle::*;
pub use manage::*;

/// Container for a user: the saved session wins over the name template
fn resolve_identity(spawner: &Spawner, sessions: &Path, username: &str) -> Result<ContainerName> {
    let store = SessionStore::load_from(sessions)?;
    if let Some(record) = store.get(username) {
        tracing::debug!("Using saved container {} for {}", record.container_name, username);
        return Ok(record.identity());
    }
    Ok(spawner.identity_for(username)?)
}

/// Apply `f` to the session file on the blocking pool, since waiting for
/// its lock sleeps the thread
async fn update_sessions<T, F>(sessions: &Path, f: F) -> Result<T>
where
    F: FnOnce(&mut SessionStore) -> T + Send + 'static,
    T: Send + 'static,
{
    let path = sessions.to_path_buf();
    let out = tokio::task::spawn_blocking(move || SessionStore::update(&path, f)).await??;
    Ok(out)
}

/// Parse a `KEY=VALUE` argument
pub fn parse_key_val(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((key, _)) if key.is_empty() => bail!("empty variable name in '{}'", s),
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => bail!("expected KEY=VALUE, got '{}'", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("JUPYTERHUB_API_TOKEN=abc").unwrap(),
            ("JUPYTERHUB_API_TOKEN".to_string(), "abc".to_string())
        );
        // only the first '=' separates
        assert_eq!(
            parse_key_val("OPTS=a=b").unwrap(),
            ("OPTS".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_key_val("EMPTY=").unwrap().1, "");
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }
}
