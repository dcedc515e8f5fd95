//! Address resolution from live container state

use crate::{ContainerRuntimeState, CoreError, Result, RuntimeStatus};
use lxdspawn_provider::{AddressFamily, AddressScope};

/// Return the first global IPv4 address on `interface`
///
/// The caller must have checked that the container is running. A missing
/// address is expected early in boot and is reported as
/// [`CoreError::NoGlobalAddress`] so the caller can retry.
pub fn resolve_address(state: &ContainerRuntimeState, interface: &str) -> Result<String> {
    debug_assert_eq!(state.status, RuntimeStatus::Running);

    state
        .interfaces
        .get(interface)
        .and_then(|iface| {
            iface
                .addresses
                .iter()
                .find(|a| a.family == AddressFamily::Inet && a.scope == AddressScope::Global)
        })
        .map(|a| a.address.clone())
        .ok_or_else(|| CoreError::NoGlobalAddress(interface.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxdspawn_provider::{InterfaceAddress, NetworkInterface};
    use std::collections::HashMap;

    fn running_with(interface: &str, addresses: Vec<InterfaceAddress>) -> ContainerRuntimeState {
        let mut interfaces = HashMap::new();
        interfaces.insert(
            interface.to_string(),
            NetworkInterface {
                addresses,
                state: "up".to_string(),
            },
        );
        ContainerRuntimeState {
            status: RuntimeStatus::Running,
            interfaces,
        }
    }

    #[test]
    fn test_picks_global_ipv4_only() {
        let state = running_with(
            "eth0",
            vec![
                InterfaceAddress::new(AddressFamily::Inet, "169.254.3.4", AddressScope::Link),
                InterfaceAddress::new(AddressFamily::Inet6, "2001:db8::5", AddressScope::Global),
                InterfaceAddress::new(AddressFamily::Inet, "10.20.30.40", AddressScope::Global),
            ],
        );
        assert_eq!(resolve_address(&state, "eth0").unwrap(), "10.20.30.40");
    }

    #[test]
    fn test_no_global_ipv4_fails() {
        let state = running_with(
            "eth0",
            vec![
                InterfaceAddress::new(AddressFamily::Inet6, "2001:db8::5", AddressScope::Global),
                InterfaceAddress::new(AddressFamily::Inet6, "fe80::1", AddressScope::Link),
            ],
        );
        assert!(matches!(
            resolve_address(&state, "eth0"),
            Err(CoreError::NoGlobalAddress(_))
        ));
    }

    #[test]
    fn test_only_configured_interface_is_scanned() {
        let state = running_with(
            "eth1",
            vec![InterfaceAddress::new(AddressFamily::Inet, "10.0.0.9", AddressScope::Global)],
        );
        assert!(resolve_address(&state, "eth0").is_err());
        assert_eq!(resolve_address(&state, "eth1").unwrap(), "10.0.0.9");
    }

    #[test]
    fn test_first_matching_address_wins() {
        let state = running_with(
            "eth0",
            vec![
                InterfaceAddress::new(AddressFamily::Inet, "10.0.0.1", AddressScope::Global),
                InterfaceAddress::new(AddressFamily::Inet, "10.0.0.2", AddressScope::Global),
            ],
        );
        assert_eq!(resolve_address(&state, "eth0").unwrap(), "10.0.0.1");
    }
}
