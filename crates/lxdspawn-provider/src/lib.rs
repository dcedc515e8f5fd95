//! Virtualization gateway trait and implementations for lxdspawn
//!
//! This crate provides an abstraction over the container control plane
//! (LXD) with a consistent API for the operations the spawner needs:
//! lookup, create, start/stop/delete, file push, exec and state queries.

mod error;
mod lxd;
mod types;

pub use error::*;
pub use lxd::LxdProvider;
pub use types::*;

use async_trait::async_trait;

/// Trait for container control planes
///
/// Every call is a synchronous remote operation from the caller's point
/// of view: implementations wait for asynchronous server-side operations
/// to finish before returning.
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Look up a container by name; `Ok(None)` if it does not exist
    async fn get(&self, name: &ContainerName) -> Result<Option<InstanceInfo>>;

    /// Create a container and wait until it exists (it is not started)
    async fn create(&self, config: &CreateContainerConfig) -> Result<InstanceInfo>;

    /// Start a container
    async fn start(&self, name: &ContainerName) -> Result<()>;

    /// Stop a container, waiting until the control plane reports it stopped
    async fn stop(&self, name: &ContainerName, timeout: Option<u32>) -> Result<()>;

    /// Delete a stopped container
    async fn delete(&self, name: &ContainerName) -> Result<()>;

    /// Read the live runtime state (status and network addresses)
    async fn state(&self, name: &ContainerName) -> Result<InstanceState>;

    /// Write a file into the container's filesystem
    async fn push_file(&self, name: &ContainerName, file: &PushFileConfig) -> Result<()>;

    /// Execute a command inside a running container
    async fn exec(&self, name: &ContainerName, config: &ExecConfig) -> Result<ExecResult>;

    /// Check whether a profile exists
    async fn profile_exists(&self, profile: &str) -> Result<bool>;

    /// Check if the control plane is reachable
    async fn ping(&self) -> Result<()>;
}

/// Create the LXD provider described by the global config
pub async fn create_provider(
    config: &lxdspawn_config::LxdConfig,
) -> Result<Box<dyn ContainerProvider>> {
    match LxdProvider::new(config).await {
        Ok(provider) => Ok(Box::new(provider)),
        Err(e) => Err(ProviderError::ConnectionError(format_connection_error(
            config, &e,
        ))),
    }
}

/// Format a helpful connection error message with actionable instructions
fn format_connection_error(
    config: &lxdspawn_config::LxdConfig,
    underlying: &ProviderError,
) -> String {
    let mut msg = format!("Cannot reach LXD at {}\n\n", config.endpoint);

    if config.client_identity_paths().is_none() {
        msg.push_str("No client certificate is configured. LXD's HTTPS API requires one:\n");
        msg.push_str("  set lxd.client_cert and lxd.client_key in config.toml, then\n");
        msg.push_str("  lxc config trust add <client.crt>\n\n");
    } else {
        msg.push_str("To verify the server is listening on the network, run:\n");
        msg.push_str("  lxc config get core.https_address\n\n");
    }

    msg.push_str(&format!("Underlying error: {}\n", underlying));
    msg
}
