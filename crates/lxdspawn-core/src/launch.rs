//! Launch specification and lifecycle result types

use crate::{CoreError, Result};
use lxdspawn_provider::{ContainerStatus, InstanceState, NetworkInterface};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment for the managed process, kept in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable; an existing key keeps its position
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Every entry must fit on one `KEY=VALUE` line
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.vars {
            if key.is_empty() {
                return Err(CoreError::InvalidEnvironment("empty variable name".into()));
            }
            if key.contains('=') || key.contains('\n') {
                return Err(CoreError::InvalidEnvironment(format!(
                    "variable name {:?} contains '=' or a newline",
                    key
                )));
            }
            if value.contains('\n') {
                return Err(CoreError::InvalidEnvironment(format!(
                    "value of {} contains a newline",
                    key
                )));
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Self::new();
        for (k, v) in iter {
            env.insert(k, v);
        }
        env
    }
}

/// Smallest CPU limit whose allowance still renders as a nonzero percentage
pub const MIN_CPU_LIMIT: f64 = 0.0001;

/// Resource limits applied when a container is created
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Absolute memory limit (e.g. "2GB"); None sets no limit
    pub memory: Option<String>,
    /// CPU limit in cores; None means unconstrained
    pub cpu: Option<f64>,
}

impl ResourceLimits {
    pub fn validate(&self) -> Result<()> {
        if let Some(cpu) = self.cpu {
            if !cpu.is_finite() || cpu <= 0.0 {
                return Err(CoreError::InvalidLimits(format!(
                    "cpu limit must be a positive number, got {}",
                    cpu
                )));
            }
            if cpu < MIN_CPU_LIMIT {
                return Err(CoreError::InvalidLimits(format!(
                    "cpu limit must be at least {} cores, got {}",
                    MIN_CPU_LIMIT, cpu
                )));
            }
        }
        if let Some(memory) = &self.memory {
            if memory.trim().is_empty() {
                return Err(CoreError::InvalidLimits("memory limit is empty".into()));
            }
        }
        Ok(())
    }
}

/// What to run in the container
///
/// Fixed once a container has been created from it: the unit file and the
/// limits are only written at creation, so changing the command or limits
/// of an existing container requires deleting it first. The environment is
/// refreshed on every start.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    command: Vec<String>,
    environment: Environment,
    limits: ResourceLimits,
}

impl LaunchSpec {
    pub fn new(
        command: Vec<String>,
        environment: Environment,
        limits: ResourceLimits,
    ) -> Result<Self> {
        if command.is_empty() || command[0].is_empty() {
            return Err(CoreError::EmptyCommand);
        }
        environment.validate()?;
        limits.validate()?;
        Ok(Self {
            command,
            environment,
            limits,
        })
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }
}

/// Where the managed process can be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Result of a readiness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessHealth {
    NotRunning,
    Running,
    FailedWithCode(i32),
}

impl ProcessHealth {
    /// Exit-code convention of the host framework: `None` while running
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NotRunning => Some(0),
            Self::Running => None,
            Self::FailedWithCode(code) => Some(*code),
        }
    }
}

impl std::fmt::Display for ProcessHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRunning => write!(f, "not running"),
            Self::Running => write!(f, "running"),
            Self::FailedWithCode(code) => write!(f, "failed (exit code {})", code),
        }
    }
}

/// Outcome of a start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Ready(Endpoint),
    TimedOut { ticks: u32 },
}

impl StartOutcome {
    pub fn endpoint(&self) -> Option<&Endpoint> {
        match self {
            Self::Ready(endpoint) => Some(endpoint),
            Self::TimedOut { .. } => None,
        }
    }
}

/// Coarse container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Missing,
    Stopped,
    Running,
    Other,
}

impl From<ContainerStatus> for RuntimeStatus {
    fn from(status: ContainerStatus) -> Self {
        match status {
            ContainerStatus::Running => Self::Running,
            ContainerStatus::Stopped => Self::Stopped,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Live container state, read from the control plane on every query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRuntimeState {
    pub status: RuntimeStatus,
    pub interfaces: HashMap<String, NetworkInterface>,
}

impl ContainerRuntimeState {
    pub fn missing() -> Self {
        Self {
            status: RuntimeStatus::Missing,
            interfaces: HashMap::new(),
        }
    }
}

impl From<InstanceState> for ContainerRuntimeState {
    fn from(state: InstanceState) -> Self {
        Self {
            status: state.status.into(),
            interfaces: state.network,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_environment_keeps_insertion_order() {
        let mut env = Environment::new();
        env.insert("B", "2");
        env.insert("A", "1");
        env.insert("B", "3");
        let keys: Vec<_> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["B", "A"]);
        assert_eq!(env.get("B"), Some("3"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_environment_validation() {
        let env: Environment = [("GOOD", "x")].into_iter().collect();
        assert!(env.validate().is_ok());

        let env: Environment = [("BAD=KEY", "x")].into_iter().collect();
        assert!(env.validate().is_err());

        let env: Environment = [("KEY", "two\nlines")].into_iter().collect();
        assert!(env.validate().is_err());

        let env: Environment = [("", "x")].into_iter().collect();
        assert!(env.validate().is_err());
    }

    #[test]
    fn test_launch_spec_rejects_empty_command() {
        let err = LaunchSpec::new(vec![], Environment::new(), ResourceLimits::default());
        assert!(matches!(err, Err(CoreError::EmptyCommand)));

        let err = LaunchSpec::new(argv(&[""]), Environment::new(), ResourceLimits::default());
        assert!(matches!(err, Err(CoreError::EmptyCommand)));
    }

    #[test]
    fn test_launch_spec_rejects_bad_limits() {
        for cpu in [0.0, -1.0, f64::INFINITY, 0.00004] {
            let limits = ResourceLimits {
                memory: None,
                cpu: Some(cpu),
            };
            let err = LaunchSpec::new(argv(&["jupyterhub-singleuser"]), Environment::new(), limits);
            assert!(matches!(err, Err(CoreError::InvalidLimits(_))), "cpu={}", cpu);
        }
    }

    #[test]
    fn test_process_health_exit_codes() {
        assert_eq!(ProcessHealth::NotRunning.exit_code(), Some(0));
        assert_eq!(ProcessHealth::Running.exit_code(), None);
        assert_eq!(ProcessHealth::FailedWithCode(3).exit_code(), Some(3));
    }

    #[test]
    fn test_runtime_status_collapse() {
        assert_eq!(RuntimeStatus::from(ContainerStatus::Running), RuntimeStatus::Running);
        assert_eq!(RuntimeStatus::from(ContainerStatus::Stopped), RuntimeStatus::Stopped);
        assert_eq!(RuntimeStatus::from(ContainerStatus::Frozen), RuntimeStatus::Other);
        assert_eq!(RuntimeStatus::from(ContainerStatus::Error), RuntimeStatus::Other);
    }

    #[test]
    fn test_endpoint_display() {
        let ep = Endpoint {
            address: "10.0.0.5".to_string(),
            port: 8888,
        };
        assert_eq!(ep.to_string(), "10.0.0.5:8888");
    }
}
