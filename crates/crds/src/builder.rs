//! Fleet agent hand-off types
//!
//! The controller publishes one `BuilderManifest` per physical node, serialized
//! as YAML into the node annotation [`BUILDER_MANIFEST_ANNOTATION`]. The fleet
//! agent on that node reads it and realizes the listed domains.

use crate::virtual_fleet::{CpuConfiguration, Network, NodeSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node annotation holding the serialized `BuilderManifest`
pub const BUILDER_MANIFEST_ANNOTATION: &str = "dcops.microscaler.io/builder-manifest";

/// Node label written by the fleet agent with its local bridge gateway address
pub const NODE_BRIDGE_GW_LABEL: &str = "dcops.microscaler.io/node-bridge-gw";

/// Route gateway placeholder replaced with the node's bridge address
pub const BRIDGE_SENTINEL: &str = "$nodebridge";

/// Pod/selector label carrying the owning fleet's name
pub const FLEET_NAME_LABEL: &str = "dcops.microscaler.io/fleet-name";

/// Pod/selector label carrying the owning fleet's namespace
pub const FLEET_NAMESPACE_LABEL: &str = "dcops.microscaler.io/fleet-namespace";

/// Per-node manifest consumed by the fleet agent
///
/// Always rebuilt from scratch and written over any previous value.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuilderManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pxe_boot_image_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pxe_boot_image_host_port: Option<u16>,

    /// Fleet networks, with bridge sentinels resolved for this node
    #[serde(default)]
    pub networks: Vec<Network>,

    /// Role definitions from the fleet
    #[serde(default)]
    pub node_roles: Vec<NodeSet>,

    #[serde(default)]
    pub cpu_configuration: CpuConfiguration,

    /// Domains to realize, ordered by role then replica index
    #[serde(default)]
    pub domains: Vec<BuilderDomain>,
}

/// One virtual host the agent must create
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuilderDomain {
    pub name: String,
    pub role: String,
    #[serde(rename = "bootMACAddress")]
    pub boot_mac_address: String,
    /// Interface name to allocated addresses
    #[serde(default)]
    pub interfaces: BTreeMap<String, BuilderInterface>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuilderInterface {
    pub ip_address: String,
    pub mac_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_wire_names() {
        let mut interfaces = BTreeMap::new();
        interfaces.insert(
            "eth0".to_string(),
            BuilderInterface {
                ip_address: "10.0.1.10".to_string(),
                mac_address: "02:00:00:00:00:00".to_string(),
            },
        );
        let manifest = BuilderManifest {
            pxe_boot_image_host: Some("10.0.0.1".to_string()),
            pxe_boot_image_host_port: Some(8099),
            domains: vec![BuilderDomain {
                name: "default-fleet-node01-worker-0".to_string(),
                role: "worker".to_string(),
                boot_mac_address: "52:54:00:32:00:00".to_string(),
                interfaces,
            }],
            ..Default::default()
        };

        let value = serde_json::to_value(&manifest).expect("serialize");
        assert_eq!(value["pxeBootImageHost"], "10.0.0.1");
        assert_eq!(value["pxeBootImageHostPort"], 8099);
        assert_eq!(value["domains"][0]["bootMACAddress"], "52:54:00:32:00:00");
        assert_eq!(value["domains"][0]["interfaces"]["eth0"]["ipAddress"], "10.0.1.10");
        assert_eq!(value["domains"][0]["interfaces"]["eth0"]["macAddress"], "02:00:00:00:00:00");
        assert!(value.get("nodeRoles").is_some());
    }

    #[test]
    fn test_manifest_yaml_parses_back() {
        let manifest = BuilderManifest {
            networks: vec![Network {
                name: "oam".to_string(),
                subnet: "10.0.1.0/24".to_string(),
                allocation_start: "10.0.1.10".to_string(),
                allocation_stop: "10.0.1.12".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&manifest).expect("yaml");
        let parsed: BuilderManifest = serde_yaml::from_str(&yaml).expect("parse");
        assert_eq!(parsed, manifest);
    }
}
