//! Fleet networks as seen by one physical node.

use crate::error::ControllerError;
use crds::{BRIDGE_SENTINEL, Network, NetworkInterface, Range};
use ipam::IpamError;
use ipam::address::DEFAULT_MAC_PREFIX;
use k8s_openapi::api::core::v1::Node;

/// Network every domain gets its boot MAC from
pub const BOOT_NETWORK_NAME: &str = "pxe-boot";
pub const BOOT_SUBNET: &str = "10.153.241.0/24";
pub const BOOT_RANGE_START: &str = "10.153.241.2";
pub const BOOT_RANGE_STOP: &str = "10.153.241.254";
pub const BOOT_MAC_PREFIX: &str = "52:54:00:32:00:00";

/// The fixed PXE boot network, registered next to the fleet's own networks
pub fn boot_network() -> Network {
    Network {
        name: BOOT_NETWORK_NAME.to_string(),
        subnet: BOOT_SUBNET.to_string(),
        allocation_start: BOOT_RANGE_START.to_string(),
        allocation_stop: BOOT_RANGE_STOP.to_string(),
        mac_prefix: Some(BOOT_MAC_PREFIX.to_string()),
        ..Default::default()
    }
}

/// Allocation range declared by a network
pub fn allocation_range(network: &Network) -> Result<Range, IpamError> {
    ipam::new_range(&network.allocation_start, &network.allocation_stop)
}

/// MAC prefix declared by a network, or the default
pub fn mac_prefix(network: &Network) -> &str {
    network
        .mac_prefix
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_MAC_PREFIX)
}

pub fn has_bridge_sentinel(networks: &[Network]) -> bool {
    networks
        .iter()
        .flat_map(|n| n.routes.iter())
        .any(|r| r.gateway == BRIDGE_SENTINEL)
}

/// Replace every sentinel gateway in every network with `gateway`.
///
/// Returns the number of routes rewritten.
pub fn resolve_bridge_sentinel(networks: &mut [Network], gateway: &str) -> usize {
    let mut rewritten = 0;
    for route in networks.iter_mut().flat_map(|n| n.routes.iter_mut()) {
        if route.gateway == BRIDGE_SENTINEL {
            route.gateway = gateway.to_string();
            rewritten += 1;
        }
    }
    rewritten
}

/// Network an interface attaches to
pub fn network_for<'a>(networks: &'a [Network], interface: &NetworkInterface) -> Result<&'a Network, ControllerError> {
    networks
        .iter()
        .find(|n| n.name == interface.network_name)
        .ok_or_else(|| ControllerError::NetworkNotFound {
            interface: interface.name.clone(),
            network: interface.network_name.clone(),
        })
}

/// The node's InternalIP address
pub fn internal_ip(node: &Node) -> Option<&str> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.as_str())
}
