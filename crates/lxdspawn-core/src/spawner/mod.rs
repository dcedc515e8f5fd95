//! Lifecycle orchestrator - creates, starts, polls and stops containers

mod poll;
mod start;
mod stop;

pub use poll::parse_exit_status;

use crate::{derive_identity, ContainerRuntimeState, Result};
use lxdspawn_config::{GlobalConfig, GuestConfig};
use lxdspawn_provider::{ContainerName, ContainerProvider, ImageSource, ProviderError};

/// Seconds LXD gets to stop a container cleanly before it is killed
const DEFAULT_STOP_TIMEOUT: u32 = 30;

/// Everything the orchestrator needs besides the launch spec
#[derive(Debug, Clone)]
pub struct SpawnSettings {
    /// Template expanded into the container name
    pub name_template: String,
    pub image: ImageSource,
    /// Profile applied at creation; None leaves the server default
    pub profile: Option<String>,
    /// Interface scanned for the container address
    pub interface: String,
    /// Port the managed process listens on
    pub port: u16,
    pub delete_on_stop: bool,
    pub stop_timeout: Option<u32>,
    pub guest: GuestConfig,
}

impl SpawnSettings {
    pub fn from_config(config: &GlobalConfig) -> Self {
        let container = &config.container;
        Self {
            name_template: container.name_template.clone(),
            image: ImageSource {
                alias: container.image_alias.clone(),
                server: container.image_server.clone(),
                protocol: container.image_protocol.clone(),
            },
            profile: container.profile.clone(),
            interface: container.interface.clone(),
            port: container.port,
            delete_on_stop: container.delete_on_stop,
            stop_timeout: Some(DEFAULT_STOP_TIMEOUT),
            guest: config.guest.clone(),
        }
    }
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self::from_config(&GlobalConfig::default())
    }
}

/// Drives one container per identity through its lifecycle
///
/// The spawner keeps no state between calls: every operation looks the
/// container up by name. Concurrent `start`/`stop` calls for the same
/// identity race on container creation and must be serialized by the
/// caller. Calls for different identities may run in parallel.
pub struct Spawner {
    provider: Box<dyn ContainerProvider>,
    settings: SpawnSettings,
}

impl Spawner {
    pub fn new(provider: Box<dyn ContainerProvider>, settings: SpawnSettings) -> Self {
        Self { provider, settings }
    }

    pub fn from_config(provider: Box<dyn ContainerProvider>, config: &GlobalConfig) -> Self {
        Self::new(provider, SpawnSettings::from_config(config))
    }

    pub fn provider(&self) -> &dyn ContainerProvider {
        self.provider.as_ref()
    }

    pub fn settings(&self) -> &SpawnSettings {
        &self.settings
    }

    /// Container name for a user under the configured template
    pub fn identity_for(&self, username: &str) -> Result<ContainerName> {
        derive_identity(&self.settings.name_template, username)
    }

    /// Live status and network state of a container
    pub async fn status(&self, identity: &ContainerName) -> Result<ContainerRuntimeState> {
        match self.provider.state(identity).await {
            Ok(state) => Ok(state.into()),
            Err(ProviderError::ContainerNotFound(_)) => Ok(ContainerRuntimeState::missing()),
            Err(e) => Err(e.into()),
        }
    }

    /// Check that the control plane is reachable
    pub async fn ping(&self) -> Result<()> {
        self.provider.ping().await?;
        Ok(())
    }
}

/// `None` when the container was deleted between the lookup and this call
fn unless_vanished<T>(
    identity: &ContainerName,
    result: lxdspawn_provider::Result<T>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => {
            tracing::debug!("Container {} disappeared: {}", identity, e);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::RuntimeStatus;
    use lxdspawn_provider::ContainerStatus;

    #[test]
    fn test_settings_from_config() {
        let mut config = GlobalConfig::default();
        config.container.profile = Some("jupyter".to_string());
        config.container.image_server = Some("https://images.example.org".to_string());
        config.container.delete_on_stop = true;

        let settings = SpawnSettings::from_config(&config);
        assert_eq!(settings.image.alias, "jupyterhub/singleuser");
        assert_eq!(
            settings.image.server.as_deref(),
            Some("https://images.example.org")
        );
        assert_eq!(settings.profile.as_deref(), Some("jupyter"));
        assert_eq!(settings.interface, "eth0");
        assert_eq!(settings.port, 8888);
        assert!(settings.delete_on_stop);
    }

    #[test]
    fn test_identity_for() {
        let spawner = Spawner::new(Box::new(MockProvider::new()), SpawnSettings::default());
        let name = spawner.identity_for("alice").unwrap();
        assert_eq!(name.as_str(), "jupyterhub-singleuser-instance-alice");
    }

    #[tokio::test]
    async fn test_status_missing_container() {
        let spawner = Spawner::new(Box::new(MockProvider::new()), SpawnSettings::default());
        let state = spawner.status(&ContainerName::new("nb-alice")).await.unwrap();
        assert_eq!(state.status, RuntimeStatus::Missing);
        assert!(state.interfaces.is_empty());
    }

    #[tokio::test]
    async fn test_status_running_container() {
        let mock = MockProvider::new().with_container(
            "nb-alice",
            ContainerStatus::Running,
            global_ipv4_network("eth0", "10.1.2.3"),
        );
        let spawner = Spawner::new(Box::new(mock), SpawnSettings::default());
        let state = spawner.status(&ContainerName::new("nb-alice")).await.unwrap();
        assert_eq!(state.status, RuntimeStatus::Running);
        assert!(state.interfaces.contains_key("eth0"));
    }

    #[test]
    fn test_unless_vanished() {
        let name = ContainerName::new("nb-alice");
        assert_eq!(unless_vanished(&name, Ok(7)).unwrap(), Some(7));

        let gone: lxdspawn_provider::Result<()> =
            Err(ProviderError::ContainerNotFound("nb-alice".to_string()));
        assert_eq!(unless_vanished(&name, gone).unwrap(), None);

        let gone: lxdspawn_provider::Result<()> = Err(ProviderError::Api {
            code: 404,
            message: "Instance not found".to_string(),
        });
        assert_eq!(unless_vanished(&name, gone).unwrap(), None);

        let down: lxdspawn_provider::Result<()> =
            Err(ProviderError::ConnectionError("refused".to_string()));
        assert!(unless_vanished(&name, down).is_err());
    }

    #[tokio::test]
    async fn test_status_propagates_gateway_errors() {
        let mock = MockProvider::new();
        *mock.state_error.lock().unwrap() =
            Some(ProviderError::ConnectionError("refused".to_string()));
        let spawner = Spawner::new(Box::new(mock), SpawnSettings::default());
        let err = spawner.status(&ContainerName::new("nb-alice")).await.unwrap_err();
        assert!(matches!(err, crate::CoreError::Provider(_)));
    }
}
