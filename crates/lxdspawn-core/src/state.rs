//! Persisted spawner state
//!
//! `SpawnerState` is the blob a host framework stores between restarts so
//! it can find a user's container again. `SessionStore` persists the same
//! information for the CLI in `~/.local/share/lxdspawn/sessions.json`.

use crate::{validate_container_name, CoreError, Endpoint, Result};
use chrono::{DateTime, Utc};
use lxdspawn_config::GlobalConfig;
use lxdspawn_provider::ContainerName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONTAINER_NAME_KEY: &str = "container_name";

/// Identity passthrough for a host framework's state persistence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

impl SpawnerState {
    pub fn new(identity: &ContainerName) -> Self {
        Self {
            container_name: Some(identity.to_string()),
        }
    }

    /// State to persist; an empty object when nothing is known
    pub fn get_state(&self) -> Value {
        let mut state = serde_json::Map::new();
        if let Some(name) = &self.container_name {
            state.insert(CONTAINER_NAME_KEY.to_string(), Value::String(name.clone()));
        }
        Value::Object(state)
    }

    /// Restore from a persisted blob; a blob without a name changes nothing
    pub fn load_state(&mut self, state: &Value) -> Result<()> {
        let Some(value) = state.get(CONTAINER_NAME_KEY) else {
            return Ok(());
        };
        let name = value.as_str().ok_or_else(|| {
            CoreError::StateCorrupted(format!("{} is not a string: {}", CONTAINER_NAME_KEY, value))
        })?;
        validate_container_name(name)
            .map_err(|e| CoreError::StateCorrupted(e.to_string()))?;
        self.container_name = Some(name.to_string());
        Ok(())
    }

    pub fn clear_state(&mut self) {
        self.container_name = None;
    }

    pub fn identity(&self) -> Option<ContainerName> {
        self.container_name.clone().map(ContainerName::new)
    }
}

/// Exclusive hold on a session file, released on drop
///
/// The lock is a sibling `*.lock` file holding the owner's pid. A lock file
/// older than [`SessionLock::STALE_AFTER`] is left over from a process that
/// died mid-update and is taken over.
struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    const ATTEMPTS: u32 = 100;
    const RETRY_DELAY: Duration = Duration::from_millis(50);
    const STALE_AFTER: Duration = Duration::from_secs(30);

    fn path_for(file: &Path) -> PathBuf {
        file.with_extension("lock")
    }

    /// Blocks for up to `ATTEMPTS * RETRY_DELAY`
    fn acquire(file: &Path) -> Result<Self> {
        let path = Self::path_for(file);
        for _ in 0..Self::ATTEMPTS {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut holder) => {
                    writeln!(holder, "{}", std::process::id())?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path) {
                        tracing::warn!("Removing stale session lock {}", path.display());
                        let _ = std::fs::remove_file(&path);
                    } else {
                        std::thread::sleep(Self::RETRY_DELAY);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::StateLocked(path.display().to_string()))
    }

    fn is_stale(path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > Self::STALE_AFTER)
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("Failed to remove session lock {}: {}", self.path.display(), e);
        }
    }
}

/// What the CLI remembers about one user's container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub username: String,
    pub container_name: String,
    /// Endpoint reported by the last successful start
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn identity(&self) -> ContainerName {
        ContainerName::new(self.container_name.clone())
    }

    pub fn spawner_state(&self) -> SpawnerState {
        SpawnerState {
            container_name: Some(self.container_name.clone()),
        }
    }
}

/// Per-user session records, keyed by username
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStore {
    pub version: u32,
    pub sessions: HashMap<String, SessionRecord>,
}

impl SessionStore {
    const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            sessions: HashMap::new(),
        }
    }

    /// Default session file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(GlobalConfig::data_dir()?.join("sessions.json"))
    }

    /// Load sessions from a path; a missing file is an empty store
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let store: Self = serde_json::from_str(&content)
            .map_err(|e| CoreError::StateCorrupted(format!("{}: {}", path.display(), e)))?;

        if store.version > Self::CURRENT_VERSION {
            tracing::warn!(
                "Session file version {} is newer than supported version {}",
                store.version,
                Self::CURRENT_VERSION
            );
        }
        Ok(store)
    }

    /// Save to a path, replacing the file atomically
    pub fn save_to(&self, path: &Path) -> Result<()> {
        Self::prepare_dir(path)?;
        let lock = SessionLock::acquire(path)?;
        self.write_locked(path, &lock)
    }

    /// Load, modify and save the file at `path` under its lock
    ///
    /// Blocks while another process holds the lock.
    pub fn update<T, F>(path: &Path, f: F) -> Result<T>
    where
        F: FnOnce(&mut SessionStore) -> T,
    {
        Self::prepare_dir(path)?;
        let lock = SessionLock::acquire(path)?;
        let mut store = Self::load_from(path)?;
        let out = f(&mut store);
        store.write_locked(path, &lock)?;
        Ok(out)
    }

    fn prepare_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Write through a synced temp file in the same directory, then rename
    fn write_locked(&self, path: &Path, _lock: &SessionLock) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn get(&self, username: &str) -> Option<&SessionRecord> {
        self.sessions.get(username)
    }

    /// Record the container (and endpoint, if known) for a user
    pub fn upsert(
        &mut self,
        username: &str,
        identity: &ContainerName,
        endpoint: Option<Endpoint>,
    ) -> &SessionRecord {
        let now = Utc::now();
        let record = self
            .sessions
            .entry(username.to_string())
            .or_insert_with(|| SessionRecord {
                username: username.to_string(),
                container_name: identity.to_string(),
                endpoint: None,
                created_at: now,
                updated_at: now,
            });
        record.container_name = identity.to_string();
        record.endpoint = endpoint;
        record.updated_at = now;
        record
    }

    /// Forget the endpoint but keep the container name
    pub fn clear_endpoint(&mut self, username: &str) {
        if let Some(record) = self.sessions.get_mut(username) {
            record.endpoint = None;
            record.updated_at = Utc::now();
        }
    }

    pub fn remove(&mut self, username: &str) -> Option<SessionRecord> {
        self.sessions.remove(username)
    }

    pub fn list(&self) -> Vec<&SessionRecord> {
        let mut records: Vec<_> = self.sessions.values().collect();
        records.sort_by(|a, b| a.username.cmp(&b.username));
        records
    }
}
