//! Lifecycle commands: start, stop, poll

use anyhow::{bail, Result};
use lxdspawn_config::GlobalConfig;
use lxdspawn_core::{
    Environment, LaunchSpec, ProcessHealth, ResourceLimits, Spawner, StartOutcome,
};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use super::{resolve_identity, update_sessions};

/// Arguments of the `start` command
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub username: String,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Overrides `container.cpu_limit`
    pub cpu: Option<f64>,
    /// Overrides `container.memory_limit`
    pub memory: Option<String>,
    /// Overrides `container.start_timeout_secs`
    pub timeout: Option<u32>,
}

/// Start a user's container and print its endpoint
pub async fn start(
    spawner: &Spawner,
    config: &GlobalConfig,
    sessions: &Path,
    request: StartRequest,
) -> Result<()> {
    let identity = resolve_identity(spawner, sessions, &request.username)?;

    let limits = ResourceLimits {
        memory: request
            .memory
            .or_else(|| config.container.memory_limit.clone()),
        cpu: request.cpu.or(config.container.cpu_limit),
    };
    let env: Environment = request.env.into_iter().collect();
    let spec = LaunchSpec::new(request.command, env, limits)?;
    let timeout = request
        .timeout
        .unwrap_or(config.container.start_timeout_secs);

    // Ctrl-C stops the readiness loop instead of killing the process mid-call
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    let outcome = spawner
        .start_with_cancel(&identity, &spec, timeout, &cancel)
        .await;
    ctrl_c.abort();

    match outcome? {
        StartOutcome::Ready(endpoint) => {
            let username = request.username;
            let recorded = endpoint.clone();
            let name = identity.clone();
            update_sessions(sessions, move |store| {
                store.upsert(&username, &name, Some(recorded));
            })
            .await?;
            println!("{}", endpoint);
            Ok(())
        }
        StartOutcome::TimedOut { ticks } => {
            bail!(
                "Container '{}' did not become ready within {} seconds",
                identity,
                ticks
            )
        }
    }
}

/// Stop a user's container
pub async fn stop(spawner: &Spawner, sessions: &Path, username: &str) -> Result<()> {
    let identity = resolve_identity(spawner, sessions, username)?;

    println!("Stopping '{}'...", identity);
    spawner.stop(&identity).await?;

    let deleted = spawner.settings().delete_on_stop;
    let user = username.to_string();
    update_sessions(sessions, move |store| {
        if deleted {
            store.remove(&user);
        } else {
            store.clear_endpoint(&user);
        }
    })
    .await?;

    if deleted {
        println!("Stopped and deleted '{}'", identity);
    } else {
        println!("Stopped '{}'", identity);
    }
    Ok(())
}

/// Print the service state using the host framework's exit-code convention
///
/// Prints `running` while the service is up, otherwise the exit code.
pub async fn poll(spawner: &Spawner, sessions: &Path, username: &str) -> Result<()> {
    let identity = resolve_identity(spawner, sessions, username)?;
    let health = spawner.poll(&identity).await?;
    println!("{}", format_health(health));
    Ok(())
}

fn format_health(health: ProcessHealth) -> String {
    match health.exit_code() {
        None => "running".to_string(),
        Some(code) => code.to_string(),
    }
}
