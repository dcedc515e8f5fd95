//! Global configuration for lxdspawn
//!
//! Located at `~/.config/lxdspawn/config.toml`

use crate::{ConfigError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global lxdspawn configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub lxd: LxdConfig,
    pub container: ContainerConfig,
    pub guest: GuestConfig,
}

/// Connection settings for the LXD control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LxdConfig {
    /// HTTPS endpoint of the LXD API
    pub endpoint: String,
    /// Path to the PEM client certificate used to authenticate
    pub client_cert: Option<String>,
    /// Path to the PEM client key used to authenticate
    pub client_key: Option<String>,
    /// Verify the server certificate (LXD servers usually present a self-signed one)
    pub verify_tls: bool,
    /// Timeout for a single HTTP request
    pub request_timeout_secs: u64,
    /// How long to wait on an async LXD operation before giving up
    pub operation_timeout_secs: u64,
}

impl Default for LxdConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://127.0.0.1:8443".to_string(),
            client_cert: None,
            client_key: None,
            verify_tls: false,
            request_timeout_secs: 30,
            operation_timeout_secs: 120,
        }
    }
}

impl LxdConfig {
    /// Client certificate and key paths with `~` expanded, if both are set
    pub fn client_identity_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) if !cert.is_empty() && !key.is_empty() => Some((
                PathBuf::from(shellexpand::tilde(cert).as_ref()),
                PathBuf::from(shellexpand::tilde(key).as_ref()),
            )),
            _ => None,
        }
    }
}

/// How containers are named, sourced and limited
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Template for container names; `{username}` is expanded
    pub name_template: String,
    /// Image alias containers are created from
    pub image_alias: String,
    /// Remote image server (None uses the local image store)
    pub image_server: Option<String>,
    /// Protocol of the remote image server ("simplestreams" or "lxd")
    pub image_protocol: Option<String>,
    /// LXD profile applied at creation
    pub profile: Option<String>,
    /// Network interface carrying the container's primary address
    pub interface: String,
    /// Port the managed process listens on
    pub port: u16,
    /// Readiness budget in one-second polling ticks
    pub start_timeout_secs: u32,
    /// Default memory limit (e.g. "2GB")
    pub memory_limit: Option<String>,
    /// Default CPU limit in cores; fractional values become an allowance
    pub cpu_limit: Option<f64>,
    /// Delete the container after stopping it instead of keeping it for reuse
    pub delete_on_stop: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name_template: "jupyterhub-singleuser-instance-{username}".to_string(),
            image_alias: "jupyterhub/singleuser".to_string(),
            image_server: None,
            image_protocol: None,
            profile: None,
            interface: "eth0".to_string(),
            port: 8888,
            start_timeout_secs: 60,
            memory_limit: None,
            cpu_limit: None,
            delete_on_stop: false,
        }
    }
}

/// Paths and identities inside the guest; these form the contract with the image
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    /// systemd service name of the managed process
    pub service_name: String,
    /// Where the generated unit file is written
    pub unit_path: String,
    /// Where the environment file is written
    pub env_path: String,
    /// Replaces the first token of the command line when set
    pub binary_path: Option<String>,
    /// User the service runs as
    pub user: Option<String>,
    /// Group the service runs as
    pub group: Option<String>,
    /// Working directory of the service
    pub working_dir: Option<String>,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            service_name: "jupyterhub-singleuser".to_string(),
            unit_path: "/etc/systemd/system/jupyterhub-singleuser.service".to_string(),
            env_path: "/etc/jupyterhub-singleuser-environment".to_string(),
            binary_path: None,
            user: Some("ubuntu".to_string()),
            group: Some("ubuntu".to_string()),
            working_dir: Some("/home/ubuntu".to_string()),
        }
    }
}

impl GlobalConfig {
    /// Load global configuration from the default path
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load global configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.clone(),
            source: e,
        })?;

        config.validate()?;

        tracing::debug!(
            "Loaded config from {:?}: endpoint={}, image={}",
            path,
            config.lxd.endpoint,
            config.container.image_alias
        );

        Ok(config)
    }

    /// Reject values that cannot produce a working spawner
    pub fn validate(&self) -> Result<()> {
        if self.lxd.endpoint.is_empty() {
            return Err(ConfigError::Invalid("lxd.endpoint must not be empty".into()));
        }
        if self.lxd.client_cert.is_some() != self.lxd.client_key.is_some() {
            return Err(ConfigError::Invalid(
                "lxd.client_cert and lxd.client_key must be set together".into(),
            ));
        }
        if let Some(cpu) = self.container.cpu_limit {
            if !cpu.is_finite() || cpu <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "container.cpu_limit must be a positive number, got {}",
                    cpu
                )));
            }
        }
        if self.guest.service_name.is_empty() {
            return Err(ConfigError::Invalid("guest.service_name must not be empty".into()));
        }
        crate::expand_name_template(&self.container.name_template, "probe")?;
        Ok(())
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.clone(),
                source: e,
            })?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.clone(),
            source: e,
        })
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "lxdspawn").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "lxdspawn").ok_or(ConfigError::NoDataDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Check if the config file exists on disk
    pub fn config_exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }
}
