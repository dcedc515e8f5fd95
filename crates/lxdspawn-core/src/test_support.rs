//! Test support utilities for lxdspawn-core
//!
//! Provides an in-memory MockProvider for testing the Spawner without a
//! real LXD server. The mock keeps container state between calls so
//! multi-step flows (create, then reuse) behave like the real thing.

use async_trait::async_trait;
use lxdspawn_provider::*;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Address handed to containers started by the mock
pub const DEFAULT_BOOT_ADDRESS: &str = "10.0.0.2";

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Get {
        name: String,
    },
    Create {
        name: String,
        config: BTreeMap<String, String>,
        profiles: Vec<String>,
    },
    Start {
        name: String,
    },
    Stop {
        name: String,
    },
    Delete {
        name: String,
    },
    State {
        name: String,
    },
    PushFile {
        name: String,
        path: String,
        contents: String,
    },
    Exec {
        name: String,
        cmd: Vec<String>,
    },
    ProfileExists {
        profile: String,
    },
    Ping,
}

/// A container held by the mock
#[derive(Debug, Clone)]
pub struct MockContainer {
    pub status: ContainerStatus,
    pub network: HashMap<String, NetworkInterface>,
    /// Files pushed into the container, by path
    pub files: HashMap<String, Vec<u8>>,
}

impl MockContainer {
    pub fn new(status: ContainerStatus, network: HashMap<String, NetworkInterface>) -> Self {
        Self {
            status,
            network,
            files: HashMap::new(),
        }
    }
}

/// Stateful mock container provider for testing
pub struct MockProvider {
    pub calls: Arc<Mutex<Vec<MockCall>>>,
    pub containers: Arc<Mutex<HashMap<String, MockContainer>>>,
    pub profiles: Arc<Mutex<Vec<String>>>,
    /// Answers to `systemctl is-active`, consumed in order; the last one repeats
    pub liveness: Arc<Mutex<VecDeque<String>>>,
    /// Output of `systemctl status`
    pub status_output: Arc<Mutex<String>>,
    /// Exit code of `systemctl restart`
    pub restart_exit_code: Arc<Mutex<i64>>,
    /// Network a container gets when started
    pub boot_network: Arc<Mutex<HashMap<String, NetworkInterface>>>,
    /// Statuses reported by `state` before the real one, consumed in order
    pub scripted_states: Arc<Mutex<VecDeque<ContainerStatus>>>,
    /// Delete the container on the next file push, as if removed concurrently
    pub vanish_on_push: Arc<Mutex<bool>>,
    /// Errors returned by the matching call when set
    pub get_error: Arc<Mutex<Option<ProviderError>>>,
    pub create_error: Arc<Mutex<Option<ProviderError>>>,
    pub start_error: Arc<Mutex<Option<ProviderError>>>,
    pub stop_error: Arc<Mutex<Option<ProviderError>>>,
    pub delete_error: Arc<Mutex<Option<ProviderError>>>,
    pub state_error: Arc<Mutex<Option<ProviderError>>>,
    pub push_error: Arc<Mutex<Option<ProviderError>>>,
    pub exec_error: Arc<Mutex<Option<ProviderError>>>,
    pub ping_error: Arc<Mutex<Option<ProviderError>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create an empty mock whose service always reports active
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            containers: Arc::new(Mutex::new(HashMap::new())),
            profiles: Arc::new(Mutex::new(Vec::new())),
            liveness: Arc::new(Mutex::new(VecDeque::new())),
            status_output: Arc::new(Mutex::new(String::new())),
            restart_exit_code: Arc::new(Mutex::new(0)),
            boot_network: Arc::new(Mutex::new(global_ipv4_network("eth0", DEFAULT_BOOT_ADDRESS))),
            scripted_states: Arc::new(Mutex::new(VecDeque::new())),
            vanish_on_push: Arc::new(Mutex::new(false)),
            get_error: Arc::new(Mutex::new(None)),
            create_error: Arc::new(Mutex::new(None)),
            start_error: Arc::new(Mutex::new(None)),
            stop_error: Arc::new(Mutex::new(None)),
            delete_error: Arc::new(Mutex::new(None)),
            state_error: Arc::new(Mutex::new(None)),
            push_error: Arc::new(Mutex::new(None)),
            exec_error: Arc::new(Mutex::new(None)),
            ping_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Seed an existing container
    pub fn with_container(
        self,
        name: &str,
        status: ContainerStatus,
        network: HashMap<String, NetworkInterface>,
    ) -> Self {
        self.containers
            .lock()
            .unwrap()
            .insert(name.to_string(), MockContainer::new(status, network));
        self
    }

    pub fn with_profile(self, profile: &str) -> Self {
        self.profiles.lock().unwrap().push(profile.to_string());
        self
    }

    /// Script the answers to the liveness query
    pub fn with_liveness(self, answers: &[&str]) -> Self {
        *self.liveness.lock().unwrap() = answers.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Script the statuses seen by `state`; a scripted non-running status
    /// comes with an empty network
    pub fn with_states(self, statuses: &[ContainerStatus]) -> Self {
        *self.scripted_states.lock().unwrap() = statuses.iter().copied().collect();
        self
    }

    /// Record a call
    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_liveness(&self) -> String {
        let mut answers = self.liveness.lock().unwrap();
        if answers.len() > 1 {
            answers.pop_front().unwrap_or_default()
        } else {
            answers.front().cloned().unwrap_or_else(|| "active".to_string())
        }
    }

    fn with_existing<T>(
        &self,
        name: &ContainerName,
        f: impl FnOnce(&mut MockContainer) -> T,
    ) -> Result<T> {
        let mut containers = self.containers.lock().unwrap();
        containers
            .get_mut(name.as_str())
            .map(f)
            .ok_or_else(|| ProviderError::ContainerNotFound(name.to_string()))
    }

    fn info_for(name: &str, container: &MockContainer) -> InstanceInfo {
        InstanceInfo {
            name: ContainerName::new(name),
            status: container.status,
        }
    }
}

/// Fail with a clone of the injected error, if any
fn injected(slot: &Arc<Mutex<Option<ProviderError>>>) -> Result<()> {
    match &*slot.lock().unwrap() {
        Some(e) => Err(clone_provider_error(e)),
        None => Ok(()),
    }
}

/// Clone a ProviderError (thiserror types don't implement Clone)
fn clone_provider_error(e: &ProviderError) -> ProviderError {
    match e {
        ProviderError::ConnectionError(s) => ProviderError::ConnectionError(s.clone()),
        ProviderError::ContainerNotFound(s) => ProviderError::ContainerNotFound(s.clone()),
        ProviderError::Api { code, message } => ProviderError::Api {
            code: *code,
            message: message.clone(),
        },
        ProviderError::ExecError(s) => ProviderError::ExecError(s.clone()),
        ProviderError::OperationFailed(s) => ProviderError::OperationFailed(s.clone()),
        ProviderError::ConfigError(s) => ProviderError::ConfigError(s.clone()),
        ProviderError::InvalidResponse(s) => ProviderError::InvalidResponse(s.clone()),
        ProviderError::Timeout => ProviderError::Timeout,
        ProviderError::Http(e) => ProviderError::ConnectionError(e.to_string()),
        ProviderError::Json(e) => ProviderError::InvalidResponse(e.to_string()),
        ProviderError::IoError(_) => ProviderError::OperationFailed("IO error (cloned)".into()),
    }
}

/// Network state with one global IPv4 address on `interface`
pub fn global_ipv4_network(interface: &str, address: &str) -> HashMap<String, NetworkInterface> {
    let mut network = HashMap::new();
    network.insert(
        interface.to_string(),
        NetworkInterface {
            addresses: vec![
                InterfaceAddress::new(AddressFamily::Inet6, "fe80::216:3eff:fe00:1", AddressScope::Link),
                InterfaceAddress::new(AddressFamily::Inet, address, AddressScope::Global),
            ],
            state: "up".to_string(),
        },
    );
    network
}

#[async_trait]
impl ContainerProvider for MockProvider {
    async fn get(&self, name: &ContainerName) -> Result<Option<InstanceInfo>> {
        self.record(MockCall::Get {
            name: name.to_string(),
        });
        injected(&self.get_error)?;
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .get(name.as_str())
            .map(|c| Self::info_for(name.as_str(), c)))
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<InstanceInfo> {
        self.record(MockCall::Create {
            name: config.name.clone(),
            config: config.config.clone(),
            profiles: config.profiles.clone(),
        });
        injected(&self.create_error)?;

        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&config.name) {
            return Err(ProviderError::Api {
                code: 409,
                message: format!("Instance \"{}\" already exists", config.name),
            });
        }
        let container = MockContainer::new(ContainerStatus::Stopped, HashMap::new());
        let info = Self::info_for(&config.name, &container);
        containers.insert(config.name.clone(), container);
        Ok(info)
    }

    async fn start(&self, name: &ContainerName) -> Result<()> {
        self.record(MockCall::Start {
            name: name.to_string(),
        });
        injected(&self.start_error)?;
        let network = self.boot_network.lock().unwrap().clone();
        self.with_existing(name, |c| {
            c.status = ContainerStatus::Running;
            c.network = network;
        })
    }

    async fn stop(&self, name: &ContainerName, _timeout: Option<u32>) -> Result<()> {
        self.record(MockCall::Stop {
            name: name.to_string(),
        });
        injected(&self.stop_error)?;
        self.with_existing(name, |c| {
            c.status = ContainerStatus::Stopped;
            c.network.clear();
        })
    }

    async fn delete(&self, name: &ContainerName) -> Result<()> {
        self.record(MockCall::Delete {
            name: name.to_string(),
        });
        injected(&self.delete_error)?;
        self.containers
            .lock()
            .unwrap()
            .remove(name.as_str())
            .map(|_| ())
            .ok_or_else(|| ProviderError::ContainerNotFound(name.to_string()))
    }

    async fn state(&self, name: &ContainerName) -> Result<InstanceState> {
        self.record(MockCall::State {
            name: name.to_string(),
        });
        injected(&self.state_error)?;
        let scripted = self.scripted_states.lock().unwrap().pop_front();
        self.with_existing(name, |c| match scripted {
            Some(status) if !status.is_running() => InstanceState {
                status,
                network: HashMap::new(),
            },
            Some(status) => InstanceState {
                status,
                network: c.network.clone(),
            },
            None => InstanceState {
                status: c.status,
                network: c.network.clone(),
            },
        })
    }

    async fn push_file(&self, name: &ContainerName, file: &PushFileConfig) -> Result<()> {
        self.record(MockCall::PushFile {
            name: name.to_string(),
            path: file.path.clone(),
            contents: String::from_utf8_lossy(&file.contents).into_owned(),
        });
        injected(&self.push_error)?;
        if std::mem::take(&mut *self.vanish_on_push.lock().unwrap()) {
            self.containers.lock().unwrap().remove(name.as_str());
        }
        self.with_existing(name, |c| {
            c.files.insert(file.path.clone(), file.contents.clone());
        })
    }

    async fn exec(&self, name: &ContainerName, config: &ExecConfig) -> Result<ExecResult> {
        self.record(MockCall::Exec {
            name: name.to_string(),
            cmd: config.cmd.clone(),
        });
        injected(&self.exec_error)?;

        let running = self.with_existing(name, |c| c.status.is_running())?;
        if !running {
            return Err(ProviderError::OperationFailed(format!(
                "Instance is not running: {}",
                name
            )));
        }

        let verb = config.cmd.get(1).map(String::as_str);
        let result = match verb {
            Some("is-active") => {
                let answer = self.next_liveness();
                ExecResult {
                    exit_code: if answer == "active" { 0 } else { 3 },
                    stdout: format!("{}\n", answer),
                    stderr: String::new(),
                }
            }
            Some("status") => ExecResult {
                exit_code: 3,
                stdout: self.status_output.lock().unwrap().clone(),
                stderr: String::new(),
            },
            Some("restart") => ExecResult {
                exit_code: *self.restart_exit_code.lock().unwrap(),
                ..ExecResult::default()
            },
            _ => ExecResult::default(),
        };
        Ok(result)
    }

    async fn profile_exists(&self, profile: &str) -> Result<bool> {
        self.record(MockCall::ProfileExists {
            profile: profile.to_string(),
        });
        Ok(self.profiles.lock().unwrap().iter().any(|p| p == profile))
    }

    async fn ping(&self) -> Result<()> {
        self.record(MockCall::Ping);
        injected(&self.ping_error)
    }
}
