//! VirtualFleet CRD
//!
//! Declares a fleet of virtual bare-metal hosts to run on every physical node
//! selected by `nodeSelector`: the networks they attach to, the roles and
//! replica counts per node, and how the per-node agent is deployed.

use crate::conditions::Condition;
use crate::references::NamespacedName;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "VirtualFleet",
    namespaced,
    status = "VirtualFleetStatus",
    shortname = "vfleet"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualFleetSpec {
    /// Physical nodes the fleet agent is scheduled on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<NodeSelector>,

    /// CPU configuration handed to the agent
    #[serde(default)]
    pub cpu_configuration: CpuConfiguration,

    /// Networks the virtual hosts attach to
    #[serde(default)]
    pub networks: Vec<Network>,

    /// Roles and replica counts, per physical node
    #[serde(default)]
    pub nodes: Vec<NodeSet>,

    /// How the fleet agent DaemonSet is built
    #[serde(default)]
    pub agent_options: AgentOptions,

    /// Interface on the physical node used as the bridge for virtual hosts
    #[serde(default)]
    pub vm_bridge: String,

    /// Credentials for the emulated BMC endpoints
    pub bmc_credentials: BmcCredentials,

    /// Labels copied from the physical node onto each BareMetalHost
    #[serde(default)]
    pub node_label_keys_to_copy: Vec<String>,

    /// Host serving the PXE boot image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pxe_boot_image_host: Option<String>,

    /// Port of the PXE boot image host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pxe_boot_image_host_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CpuConfiguration {
    /// CPUs excluded from virtual hosts, e.g. "0-4,54-60"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_exclude: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub name: String,

    /// Subnet CIDR registered with IPAM
    pub subnet: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_subnet: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// First address of the allocation range
    pub allocation_start: String,

    /// Last address of the allocation range
    pub allocation_stop: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    /// MAC prefix, in full MAC notation (e.g. 06:42:42:00:00:00).
    /// This is also the first MAC handed out. A private default is used when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_interface: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub libvirt_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub network: String,
    pub netmask: String,
    /// Gateway address, or the bridge sentinel to use the node's bridge address
    pub gateway: String,
}

/// A role and its replica count on every physical node
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSet {
    /// Role name, e.g. "master" or "worker"
    pub name: String,

    pub count: u32,

    /// Labels set on each BareMetalHost; these win over copied node labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bmh_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub libvirt_template: Option<NamespacedName>,

    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disk_drives: Vec<DiskDrive>,

    /// Secret holding the network-data template under key "template"
    pub network_data_template: NamespacedName,

    /// Root device of the virtual host, defaults to /dev/sda
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_device_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_interface_name: Option<String>,

    #[serde(default, rename = "enableVNC")]
    pub enable_vnc: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Name of the network in `spec.networks` this interface attaches to
    #[serde(rename = "network")]
    pub network_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiskDrive {
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<DiskOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiskOptions {
    #[serde(default)]
    pub size_gb: u32,
    #[serde(default)]
    pub sparse: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentOptions {
    /// ConfigMap holding the DaemonSet template under key "template"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<NamespacedName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub libvirt_image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder_image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct BmcCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualFleetStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Number of BareMetalHosts committed by the last successful pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<u32>,

    /// Last reconciliation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}
