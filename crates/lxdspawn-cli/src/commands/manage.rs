//! Management commands: status, state, config

use anyhow::{Context, Result};
use lxdspawn_config::GlobalConfig;
use lxdspawn_core::{RuntimeStatus, SessionStore, SpawnerState, Spawner};
use lxdspawn_provider::{AddressFamily, AddressScope};
use std::path::Path;

use super::resolve_identity;

/// Show the live state of a user's container
pub async fn status(spawner: &Spawner, sessions: &Path, username: &str) -> Result<()> {
    spawner
        .ping()
        .await
        .context("LXD is not reachable")?;

    let identity = resolve_identity(spawner, sessions, username)?;
    let state = spawner.status(&identity).await?;

    let symbol = match state.status {
        RuntimeStatus::Running => "●",
        RuntimeStatus::Stopped => "○",
        RuntimeStatus::Missing => "◌",
        RuntimeStatus::Other => "✗",
    };
    println!("{} {} ({})", symbol, identity, state.status);

    let mut interfaces: Vec<_> = state.interfaces.iter().collect();
    interfaces.sort_by(|a, b| a.0.cmp(b.0));
    for (name, iface) in interfaces {
        for addr in &iface.addresses {
            let family = match addr.family {
                AddressFamily::Inet => "inet",
                AddressFamily::Inet6 => "inet6",
                AddressFamily::Other => "other",
            };
            let scope = match addr.scope {
                AddressScope::Global => "global",
                AddressScope::Local => "local",
                AddressScope::Link => "link",
                AddressScope::Other => "other",
            };
            println!("  {:<8} {:<6} {:<7} {}", name, family, scope, addr.address);
        }
    }

    let store = SessionStore::load_from(sessions)?;
    if let Some(endpoint) = store.get(username).and_then(|r| r.endpoint.as_ref()) {
        println!("  last endpoint: {}", endpoint);
    }
    Ok(())
}

/// Print the saved spawner state for a user, or forget it
pub fn state(sessions: &Path, username: &str, clear: bool) -> Result<()> {
    if clear {
        let removed = SessionStore::update(sessions, |store| store.remove(username))?;
        match removed {
            Some(record) => println!("Cleared state for '{}' ({})", username, record.container_name),
            None => println!("No saved state for '{}'", username),
        }
        return Ok(());
    }

    let store = SessionStore::load_from(sessions)?;
    let state = store
        .get(username)
        .map(|r| r.spawner_state())
        .unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&state.get_state())?);
    Ok(())
}

/// Show the effective configuration
pub fn config(config: &GlobalConfig, path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => GlobalConfig::config_path()?,
    };
    if path.exists() {
        println!("# Config file: {:?}\n", path);
    } else {
        println!("# Config file: {:?} (not created yet, showing defaults)\n", path);
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxdspawn_provider::ContainerName;

    #[test]
    fn test_state_clear_removes_record() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessions.json");
        SessionStore::update(&path, |store| {
            store.upsert("alice", &ContainerName::new("nb-alice"), None);
        })
        .unwrap();

        state(&path, "alice", false).unwrap();
        state(&path, "alice", true).unwrap();

        let store = SessionStore::load_from(&path).unwrap();
        assert!(store.get("alice").is_none());
        assert_eq!(SpawnerState::default().get_state(), serde_json::json!({}));
    }
}
