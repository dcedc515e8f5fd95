//! Common types for container providers

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Container name wrapper; the name is the only key used to find a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerName(pub String);

impl ContainerName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Container status as reported by LXD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Frozen,
    Error,
    Unknown,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Frozen => write!(f, "frozen"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&str> for ContainerStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            "frozen" => Self::Frozen,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// Address family of an interface address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Inet,
    Inet6,
    #[serde(other)]
    Other,
}

/// Scope of an interface address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressScope {
    Global,
    Local,
    Link,
    #[serde(other)]
    Other,
}

/// One address assigned to a container interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub family: AddressFamily,
    pub address: String,
    #[serde(default)]
    pub netmask: String,
    pub scope: AddressScope,
}

impl InterfaceAddress {
    pub fn new(family: AddressFamily, address: impl Into<String>, scope: AddressScope) -> Self {
        Self {
            family,
            address: address.into(),
            netmask: String::new(),
            scope,
        }
    }
}

/// Network interface state inside a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    #[serde(default)]
    pub addresses: Vec<InterfaceAddress>,
    /// Link state ("up"/"down")
    #[serde(default)]
    pub state: String,
}

/// Live runtime state of a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    pub status: ContainerStatus,
    /// Interface name -> interface state; empty while the container is stopped
    pub network: HashMap<String, NetworkInterface>,
}

/// Basic container info returned by lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: ContainerName,
    pub status: ContainerStatus,
}

/// Where a new container's root filesystem comes from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSource {
    /// Image alias
    pub alias: String,
    /// Remote image server URL (None for the local image store)
    pub server: Option<String>,
    /// Protocol of the remote server ("simplestreams" or "lxd")
    pub protocol: Option<String>,
}

impl ImageSource {
    pub fn local(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            server: None,
            protocol: None,
        }
    }
}

/// Configuration for creating a container
#[derive(Debug, Clone, Default)]
pub struct CreateContainerConfig {
    /// Container name
    pub name: String,
    /// Instance config keys (limits.*, user.*)
    pub config: BTreeMap<String, String>,
    /// Profiles to apply; empty leaves the server default in place
    pub profiles: Vec<String>,
    /// Image source
    pub source: ImageSource,
}

/// A file to write into a container
#[derive(Debug, Clone)]
pub struct PushFileConfig {
    /// Absolute path inside the container
    pub path: String,
    pub contents: Vec<u8>,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl PushFileConfig {
    /// A root-owned file with the given mode
    pub fn root_owned(path: impl Into<String>, contents: impl Into<Vec<u8>>, mode: u32) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            uid: 0,
            gid: 0,
            mode,
        }
    }
}

/// Exec configuration
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    /// Command to execute, run as root in the container's default cwd
    pub cmd: Vec<String>,
}

impl ExecConfig {
    pub fn command<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
        }
    }
}

/// Result of exec command
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    /// Exit code
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_lxd_strings() {
        assert_eq!(ContainerStatus::from("Running"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::from("Stopped"), ContainerStatus::Stopped);
        assert_eq!(ContainerStatus::from("Frozen"), ContainerStatus::Frozen);
        assert_eq!(ContainerStatus::from("Starting"), ContainerStatus::Unknown);
    }

    #[test]
    fn test_address_deserializes_unknown_variants() {
        let json = r#"{"family":"inet","address":"10.0.3.15","netmask":"24","scope":"global"}"#;
        let addr: InterfaceAddress = serde_json::from_str(json).unwrap();
        assert_eq!(addr.family, AddressFamily::Inet);
        assert_eq!(addr.scope, AddressScope::Global);

        let json = r#"{"family":"packet","address":"x","scope":"host"}"#;
        let addr: InterfaceAddress = serde_json::from_str(json).unwrap();
        assert_eq!(addr.family, AddressFamily::Other);
        assert_eq!(addr.scope, AddressScope::Other);
        assert!(addr.netmask.is_empty());
    }

    #[test]
    fn test_exec_config_command() {
        let cfg = ExecConfig::command(["systemctl", "is-active", "svc"]);
        assert_eq!(cfg.cmd, vec!["systemctl", "is-active", "svc"]);
    }
}
