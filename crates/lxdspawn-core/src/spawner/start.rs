//! Start flow: create-or-reuse, inject config, start and wait for readiness

use super::{unless_vanished, Spawner};
use crate::{
    render, render_limits, resolve_address, CoreError, Endpoint, LaunchSpec, ProcessHealth,
    RenderedConfig, Result, RuntimeStatus, StartOutcome, USER_DATA_KEY,
};
use lxdspawn_provider::{ContainerName, CreateContainerConfig, ExecConfig, PushFileConfig};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay between readiness polls
const POLL_INTERVAL: Duration = Duration::from_secs(1);

const UNIT_MODE: u32 = 0o644;
/// The environment file may carry API tokens
const ENV_FILE_MODE: u32 = 0o600;

impl Spawner {
    /// Start the managed process for `identity` and wait until it is reachable
    ///
    /// An existing container is reused and only its environment file is
    /// refreshed. A new container is created from the launch spec, also when
    /// the reused one disappears before the file lands. The service is then
    /// restarted (running container) or the container is started, and the
    /// service is polled once per second for up to `timeout_secs` ticks. A
    /// container deleted during this sequence shows up as a timeout.
    pub async fn start(
        &self,
        identity: &ContainerName,
        spec: &LaunchSpec,
        timeout_secs: u32,
    ) -> Result<StartOutcome> {
        self.start_with_cancel(identity, spec, timeout_secs, &CancellationToken::new())
            .await
    }

    /// Like [`Spawner::start`], returning [`CoreError::Cancelled`] as soon as
    /// `cancel` fires during the readiness loop
    pub async fn start_with_cancel(
        &self,
        identity: &ContainerName,
        spec: &LaunchSpec,
        timeout_secs: u32,
        cancel: &CancellationToken,
    ) -> Result<StartOutcome> {
        let rendered = render(spec, &self.settings.guest)?;

        let reused = match self.provider.get(identity).await? {
            Some(info) => {
                tracing::debug!("Reusing container {} ({})", identity, info.status);
                self.push_env_file(identity, &rendered).await?.is_some()
            }
            None => false,
        };
        if !reused {
            self.create_container(identity, spec, &rendered).await?;
        }

        let state = self.provider.state(identity).await;
        let running = unless_vanished(identity, state)?.is_some_and(|s| s.status.is_running());
        if running {
            self.restart_service(identity).await?;
        } else {
            tracing::info!("Starting container {}", identity);
            let started = self.provider.start(identity).await;
            if unless_vanished(identity, started)?.is_none() {
                tracing::warn!("Container {} disappeared before it could be started", identity);
            }
        }

        self.wait_until_ready(identity, timeout_secs, cancel).await
    }

    async fn create_container(
        &self,
        identity: &ContainerName,
        spec: &LaunchSpec,
        rendered: &RenderedConfig,
    ) -> Result<()> {
        let mut profiles = Vec::new();
        if let Some(profile) = &self.settings.profile {
            if !self.provider.profile_exists(profile).await? {
                return Err(CoreError::ProfileNotFound(profile.clone()));
            }
            profiles.push(profile.clone());
        }

        let mut config = render_limits(spec.limits())?;
        config.insert(USER_DATA_KEY.to_string(), rendered.boot_config.clone());

        tracing::info!(
            "Creating container {} from image {}",
            identity,
            self.settings.image.alias
        );
        self.provider
            .create(&CreateContainerConfig {
                name: identity.to_string(),
                config,
                profiles,
                source: self.settings.image.clone(),
            })
            .await?;

        let guest = &self.settings.guest;
        let unit = self
            .provider
            .push_file(
                identity,
                &PushFileConfig::root_owned(guest.unit_path.as_str(), rendered.unit.as_str(), UNIT_MODE),
            )
            .await;
        if unless_vanished(identity, unit)?.is_some() {
            self.push_env_file(identity, rendered).await?;
        }
        Ok(())
    }

    /// `None` if the container is gone
    async fn push_env_file(
        &self,
        identity: &ContainerName,
        rendered: &RenderedConfig,
    ) -> Result<Option<()>> {
        tracing::debug!("Writing {} into {}", self.settings.guest.env_path, identity);
        let pushed = self
            .provider
            .push_file(
                identity,
                &PushFileConfig::root_owned(
                    self.settings.guest.env_path.as_str(),
                    rendered.env_file.as_str(),
                    ENV_FILE_MODE,
                ),
            )
            .await;
        unless_vanished(identity, pushed)
    }

    /// Restart the unit so it re-reads its environment file
    async fn restart_service(&self, identity: &ContainerName) -> Result<()> {
        let service = self.settings.guest.service_name.as_str();
        tracing::info!("Restarting {} in running container {}", service, identity);

        let result = self
            .provider
            .exec(identity, &ExecConfig::command(["systemctl", "restart", service]))
            .await;
        let result = match unless_vanished(identity, result)? {
            Some(result) => result,
            None => return Ok(()),
        };
        if result.exit_code != 0 {
            // the readiness loop reports the outcome
            tracing::warn!(
                "systemctl restart {} exited with {}: {}",
                service,
                result.exit_code,
                result.stderr.trim_end()
            );
        }
        Ok(())
    }

    async fn wait_until_ready(
        &self,
        identity: &ContainerName,
        timeout_secs: u32,
        cancel: &CancellationToken,
    ) -> Result<StartOutcome> {
        for tick in 1..=timeout_secs {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let health = self.poll(identity).await?;
            tracing::debug!("Poll {}/{} for {}: {}", tick, timeout_secs, identity, health);

            if health == ProcessHealth::Running {
                match self.current_endpoint(identity).await {
                    Ok(endpoint) => {
                        tracing::info!("{} is ready at {}", identity, endpoint);
                        return Ok(StartOutcome::Ready(endpoint));
                    }
                    Err(CoreError::NoGlobalAddress(_)) => {
                        tracing::debug!("{} has no global address yet", identity);
                    }
                    Err(e) => return Err(e),
                }
            }

            if tick < timeout_secs {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
        }

        tracing::warn!(
            "{} did not become ready within {} polls",
            identity,
            timeout_secs
        );
        Ok(StartOutcome::TimedOut {
            ticks: timeout_secs,
        })
    }

    /// Resolve the endpoint from a fresh state query
    ///
    /// A container that stopped since the last poll is reported like one
    /// without an address so the loop keeps waiting.
    async fn current_endpoint(&self, identity: &ContainerName) -> Result<Endpoint> {
        let state = self.status(identity).await?;
        if state.status != RuntimeStatus::Running {
            return Err(CoreError::NoGlobalAddress(identity.to_string()));
        }
        let address = resolve_address(&state, &self.settings.interface)?;
        Ok(Endpoint {
            address,
            port: self.settings.port,
        })
    }
}
