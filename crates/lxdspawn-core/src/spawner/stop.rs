//! Stop flow

use super::{unless_vanished, Spawner};
use crate::Result;
use lxdspawn_provider::{ContainerName, ContainerStatus};

impl Spawner {
    /// Stop the container for `identity`
    ///
    /// Only running and frozen containers get a stop request. Absent
    /// containers, including one deleted while this runs, are not an error.
    /// With `delete_on_stop` the container is deleted afterwards, whatever
    /// state it was found in.
    pub async fn stop(&self, identity: &ContainerName) -> Result<()> {
        let info = match self.provider.get(identity).await? {
            Some(info) => info,
            None => {
                tracing::debug!("Container {} does not exist, nothing to stop", identity);
                return Ok(());
            }
        };

        match info.status {
            ContainerStatus::Running | ContainerStatus::Frozen => {
                tracing::info!("Stopping container {} ({})", identity, info.status);
                let stopped = self.provider.stop(identity, self.settings.stop_timeout).await;
                if unless_vanished(identity, stopped)?.is_none() {
                    return Ok(());
                }
            }
            ContainerStatus::Stopped => {
                tracing::debug!("Container {} is already stopped", identity);
            }
            status => {
                tracing::warn!("Container {} is {}, not sending a stop request", identity, status);
            }
        }

        if self.settings.delete_on_stop {
            tracing::info!("Deleting container {}", identity);
            let deleted = self.provider.delete(identity).await;
            unless_vanished(identity, deleted)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use crate::{SpawnSettings, Spawner};
    use lxdspawn_provider::{ContainerName, ContainerStatus, ProviderError};
    use std::collections::HashMap;

    fn alice() -> ContainerName {
        ContainerName::new("nb-alice")
    }

    fn deleting() -> SpawnSettings {
        SpawnSettings {
            delete_on_stop: true,
            ..SpawnSettings::default()
        }
    }

    fn stop_or_delete(calls: &[MockCall]) -> usize {
        calls
            .iter()
            .filter(|c| matches!(c, MockCall::Stop { .. } | MockCall::Delete { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_stop_missing_is_noop() {
        let mock = MockProvider::new();
        let calls = mock.calls.clone();
        let spawner = Spawner::new(Box::new(mock), SpawnSettings::default());

        spawner.stop(&alice()).await.unwrap();
        assert_eq!(stop_or_delete(&calls.lock().unwrap()), 0);
    }

    #[tokio::test]
    async fn test_stop_already_stopped_is_noop() {
        let mock = MockProvider::new().with_container("nb-alice", ContainerStatus::Stopped, HashMap::new());
        let calls = mock.calls.clone();
        let spawner = Spawner::new(Box::new(mock), SpawnSettings::default());

        spawner.stop(&alice()).await.unwrap();
        assert_eq!(stop_or_delete(&calls.lock().unwrap()), 0);
    }

    #[tokio::test]
    async fn test_stop_running_keeps_container() {
        let mock = MockProvider::new().with_container(
            "nb-alice",
            ContainerStatus::Running,
            global_ipv4_network("eth0", "10.0.0.4"),
        );
        let calls = mock.calls.clone();
        let containers = mock.containers.clone();
        let spawner = Spawner::new(Box::new(mock), SpawnSettings::default());

        spawner.stop(&alice()).await.unwrap();

        let recorded = calls.lock().unwrap().clone();
        assert!(recorded.contains(&MockCall::Stop {
            name: "nb-alice".to_string()
        }));
        assert!(!recorded.iter().any(|c| matches!(c, MockCall::Delete { .. })));
        let containers = containers.lock().unwrap();
        assert_eq!(containers["nb-alice"].status, ContainerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_frozen_container() {
        let mock = MockProvider::new().with_container("nb-alice", ContainerStatus::Frozen, HashMap::new());
        let calls = mock.calls.clone();
        let spawner = Spawner::new(Box::new(mock), SpawnSettings::default());

        spawner.stop(&alice()).await.unwrap();
        assert!(calls.lock().unwrap().contains(&MockCall::Stop {
            name: "nb-alice".to_string()
        }));
    }

    #[tokio::test]
    async fn test_delete_on_stop_removes_running_container() {
        let mock = MockProvider::new().with_container(
            "nb-alice",
            ContainerStatus::Running,
            global_ipv4_network("eth0", "10.0.0.4"),
        );
        let calls = mock.calls.clone();
        let containers = mock.containers.clone();
        let spawner = Spawner::new(Box::new(mock), deleting());

        spawner.stop(&alice()).await.unwrap();

        assert_eq!(stop_or_delete(&calls.lock().unwrap()), 2);
        assert!(containers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_on_stop_removes_stopped_container() {
        let mock = MockProvider::new().with_container("nb-alice", ContainerStatus::Stopped, HashMap::new());
        let calls = mock.calls.clone();
        let spawner = Spawner::new(Box::new(mock), deleting());

        spawner.stop(&alice()).await.unwrap();

        let recorded = calls.lock().unwrap().clone();
        assert!(!recorded.iter().any(|c| matches!(c, MockCall::Stop { .. })));
        assert!(recorded.contains(&MockCall::Delete {
            name: "nb-alice".to_string()
        }));
    }

    #[tokio::test]
    async fn test_delete_on_stop_missing_is_noop() {
        let mock = MockProvider::new();
        let calls = mock.calls.clone();
        let spawner = Spawner::new(Box::new(mock), deleting());

        spawner.stop(&alice()).await.unwrap();
        assert_eq!(stop_or_delete(&calls.lock().unwrap()), 0);
    }

    #[tokio::test]
    async fn test_stop_propagates_gateway_error() {
        let mock = MockProvider::new().with_container(
            "nb-alice",
            ContainerStatus::Running,
            HashMap::new(),
        );
        *mock.stop_error.lock().unwrap() = Some(ProviderError::Timeout);
        let spawner = Spawner::new(Box::new(mock), SpawnSettings::default());

        assert!(spawner.stop(&alice()).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_container_deleted_during_stop() {
        let mock = MockProvider::new().with_container(
            "nb-alice",
            ContainerStatus::Running,
            global_ipv4_network("eth0", "10.0.0.4"),
        );
        *mock.stop_error.lock().unwrap() =
            Some(ProviderError::ContainerNotFound("nb-alice".to_string()));
        let calls = mock.calls.clone();
        let spawner = Spawner::new(Box::new(mock), deleting());

        spawner.stop(&alice()).await.unwrap();
        // nothing left to delete
        assert!(!calls.lock().unwrap().iter().any(|c| matches!(c, MockCall::Delete { .. })));
    }

    #[tokio::test]
    async fn test_delete_on_stop_container_deleted_concurrently() {
        let mock = MockProvider::new().with_container("nb-alice", ContainerStatus::Stopped, HashMap::new());
        *mock.delete_error.lock().unwrap() = Some(ProviderError::Api {
            code: 404,
            message: "Instance not found".to_string(),
        });
        let spawner = Spawner::new(Box::new(mock), deleting());

        spawner.stop(&alice()).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_on_stop_propagates_gateway_error() {
        let mock = MockProvider::new().with_container("nb-alice", ContainerStatus::Stopped, HashMap::new());
        *mock.delete_error.lock().unwrap() = Some(ProviderError::Api {
            code: 400,
            message: "Instance is running".to_string(),
        });
        let spawner = Spawner::new(Box::new(mock), deleting());

        assert!(spawner.stop(&alice()).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_skips_error_state() {
        let mock = MockProvider::new().with_container("nb-alice", ContainerStatus::Error, HashMap::new());
        let calls = mock.calls.clone();
        let spawner = Spawner::new(Box::new(mock), SpawnSettings::default());

        spawner.stop(&alice()).await.unwrap();
        assert_eq!(stop_or_delete(&calls.lock().unwrap()), 0);
    }

    #[tokio::test]
    async fn test_delete_on_stop_removes_error_state_container() {
        let mock = MockProvider::new().with_container("nb-alice", ContainerStatus::Error, HashMap::new());
        let calls = mock.calls.clone();
        let containers = mock.containers.clone();
        let spawner = Spawner::new(Box::new(mock), deleting());

        spawner.stop(&alice()).await.unwrap();

        let recorded = calls.lock().unwrap().clone();
        assert!(!recorded.iter().any(|c| matches!(c, MockCall::Stop { .. })));
        assert!(containers.lock().unwrap().is_empty());
    }
}
