//! Readiness probe for the managed service

use super::{unless_vanished, Spawner};
use crate::{ProcessHealth, Result};
use lxdspawn_provider::{ContainerName, ExecConfig};
use regex::Regex;
use std::sync::OnceLock;

const SYSTEMCTL: &str = "/bin/systemctl";

impl Spawner {
    /// Report whether the managed service is up inside the container
    ///
    /// An absent or non-running container is `NotRunning`, as is one that
    /// disappears while it is being queried. Output that cannot be
    /// understood also maps to `NotRunning`; only gateway failures are
    /// returned as errors.
    pub async fn poll(&self, identity: &ContainerName) -> Result<ProcessHealth> {
        let info = match self.provider.get(identity).await? {
            Some(info) => info,
            None => {
                tracing::debug!("Container {} does not exist", identity);
                return Ok(ProcessHealth::NotRunning);
            }
        };
        if !info.status.is_running() {
            tracing::debug!("Container {} is {}", identity, info.status);
            return Ok(ProcessHealth::NotRunning);
        }

        let service = self.settings.guest.service_name.as_str();
        let liveness = self
            .provider
            .exec(identity, &ExecConfig::command([SYSTEMCTL, "is-active", service]))
            .await;
        let liveness = match unless_vanished(identity, liveness)? {
            Some(result) => result,
            None => return Ok(ProcessHealth::NotRunning),
        };

        match liveness.stdout.trim_end() {
            "active" => Ok(ProcessHealth::Running),
            "inactive" => Ok(ProcessHealth::NotRunning),
            other => {
                tracing::debug!("Service {} in {} reports '{}'", service, identity, other);
                self.diagnose(identity, service).await
            }
        }
    }

    /// Pull the exit code out of `systemctl status` for a failed service
    async fn diagnose(&self, identity: &ContainerName, service: &str) -> Result<ProcessHealth> {
        let status = self
            .provider
            .exec(identity, &ExecConfig::command([SYSTEMCTL, "status", service]))
            .await;
        let status = match unless_vanished(identity, status)? {
            Some(result) => result,
            None => return Ok(ProcessHealth::NotRunning),
        };

        match parse_exit_status(&status.stdout) {
            Some(code) => Ok(ProcessHealth::FailedWithCode(code)),
            None => {
                tracing::warn!(
                    "Could not read an exit status for {} in {}, treating it as not running",
                    service,
                    identity
                );
                Ok(ProcessHealth::NotRunning)
            }
        }
    }
}

/// Extract `n` from a `status=n` or `status=n/NAME` fragment
///
/// The `Main PID:` line is preferred since it describes the service's own
/// process; other lines (e.g. `ExecStartPre`) are only consulted when it
/// carries no status.
pub fn parse_exit_status(text: &str) -> Option<i32> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"status=(\d+)(?:/\w+)?").ok())
        .as_ref()?;

    let capture = |haystack: &str| {
        pattern
            .captures(haystack)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<i32>().ok())
    };

    text.lines()
        .filter(|line| line.trim_start().starts_with("Main PID:"))
        .find_map(|line| capture(line))
        .or_else(|| capture(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::{CoreError, SpawnSettings};
    use lxdspawn_provider::{ContainerStatus, ProviderError};
    use std::collections::HashMap;

    const FAILED_STATUS: &str = "\
x jupyterhub-singleuser.service - jupyterhub-singleuser
     Loaded: loaded (/etc/systemd/system/jupyterhub-singleuser.service; enabled)
     Active: failed (Result: exit-code) since Tue 2024-03-05 10:00:00 UTC; 3s ago
    Process: 101 ExecStart=/usr/local/bin/jupyterhub-singleuser (code=exited, status=1/FAILURE)
   Main PID: 101 (code=exited, status=1/FAILURE)";

    fn running_spawner(mock: MockProvider) -> Spawner {
        let mock = mock.with_container(
            "nb-alice",
            ContainerStatus::Running,
            global_ipv4_network("eth0", "10.0.0.7"),
        );
        Spawner::new(Box::new(mock), SpawnSettings::default())
    }

    fn alice() -> ContainerName {
        ContainerName::new("nb-alice")
    }

    #[test]
    fn test_parse_exit_status_main_pid() {
        assert_eq!(parse_exit_status(FAILED_STATUS), Some(1));
    }

    #[test]
    fn test_parse_exit_status_prefers_main_pid() {
        let text = "  Process: 90 ExecStartPre=/bin/true (code=exited, status=0/SUCCESS)\n\
                    Main PID: 91 (code=exited, status=203/EXEC)";
        assert_eq!(parse_exit_status(text), Some(203));
    }

    #[test]
    fn test_parse_exit_status_without_signal_name() {
        assert_eq!(parse_exit_status("Main PID: 7 (code=exited, status=2)"), Some(2));
        assert_eq!(parse_exit_status("(code=exited, status=42)"), Some(42));
    }

    #[test]
    fn test_parse_exit_status_unparseable() {
        assert_eq!(parse_exit_status(""), None);
        assert_eq!(parse_exit_status("Unit jupyterhub-singleuser.service could not be found."), None);
        assert_eq!(parse_exit_status("Main PID: 7 (code=killed, signal=KILL)"), None);
    }

    #[tokio::test]
    async fn test_poll_missing_container() {
        let mock = MockProvider::new();
        let calls = mock.calls.clone();
        let spawner = Spawner::new(Box::new(mock), SpawnSettings::default());

        assert_eq!(spawner.poll(&alice()).await.unwrap(), ProcessHealth::NotRunning);
        assert!(!calls.lock().unwrap().iter().any(|c| matches!(c, MockCall::Exec { .. })));
    }

    #[tokio::test]
    async fn test_poll_stopped_container() {
        let mock = MockProvider::new().with_container("nb-alice", ContainerStatus::Stopped, HashMap::new());
        let calls = mock.calls.clone();
        let spawner = Spawner::new(Box::new(mock), SpawnSettings::default());

        assert_eq!(spawner.poll(&alice()).await.unwrap(), ProcessHealth::NotRunning);
        assert!(!calls.lock().unwrap().iter().any(|c| matches!(c, MockCall::Exec { .. })));
    }

    #[tokio::test]
    async fn test_poll_active_and_inactive() {
        let spawner = running_spawner(MockProvider::new().with_liveness(&["inactive", "active"]));
        assert_eq!(spawner.poll(&alice()).await.unwrap(), ProcessHealth::NotRunning);
        assert_eq!(spawner.poll(&alice()).await.unwrap(), ProcessHealth::Running);
        // last answer repeats
        assert_eq!(spawner.poll(&alice()).await.unwrap(), ProcessHealth::Running);
    }

    #[tokio::test]
    async fn test_poll_uses_liveness_query() {
        let mock = MockProvider::new().with_liveness(&["active"]);
        let calls = mock.calls.clone();
        let spawner = running_spawner(mock);
        spawner.poll(&alice()).await.unwrap();

        assert!(calls.lock().unwrap().contains(&MockCall::Exec {
            name: "nb-alice".to_string(),
            cmd: vec![
                "/bin/systemctl".to_string(),
                "is-active".to_string(),
                "jupyterhub-singleuser".to_string(),
            ],
        }));
    }

    #[tokio::test]
    async fn test_poll_failed_service_reports_exit_code() {
        let mock = MockProvider::new().with_liveness(&["failed"]);
        *mock.status_output.lock().unwrap() = FAILED_STATUS.to_string();
        let spawner = running_spawner(mock);

        let health = spawner.poll(&alice()).await.unwrap();
        assert_eq!(health, ProcessHealth::FailedWithCode(1));
        assert_eq!(health.exit_code(), Some(1));
    }

    #[tokio::test]
    async fn test_poll_unrecognized_diagnostic_is_not_running() {
        let mock = MockProvider::new().with_liveness(&["activating"]);
        *mock.status_output.lock().unwrap() = "something unexpected".to_string();
        let calls = mock.calls.clone();
        let spawner = running_spawner(mock);

        assert_eq!(spawner.poll(&alice()).await.unwrap(), ProcessHealth::NotRunning);
        let status_queries = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, MockCall::Exec { cmd, .. } if cmd.get(1).map(String::as_str) == Some("status")))
            .count();
        assert_eq!(status_queries, 1);
    }

    #[tokio::test]
    async fn test_poll_propagates_exec_failure() {
        let mock = MockProvider::new();
        *mock.exec_error.lock().unwrap() =
            Some(ProviderError::Api { code: 500, message: "boom".to_string() });
        let spawner = running_spawner(mock);

        let err = spawner.poll(&alice()).await.unwrap_err();
        assert!(matches!(err, CoreError::Provider(ProviderError::Api { code: 500, .. })));
    }

    #[tokio::test]
    async fn test_poll_container_deleted_during_query() {
        let mock = MockProvider::new();
        *mock.exec_error.lock().unwrap() =
            Some(ProviderError::ContainerNotFound("nb-alice".to_string()));
        let spawner = running_spawner(mock);

        assert_eq!(spawner.poll(&alice()).await.unwrap(), ProcessHealth::NotRunning);
    }
}
