//! Test utilities for unit testing the provisioner and reconciler
//!
//! Builds a two-network, one-role fleet and a mock cluster that already runs
//! its agent on the requested nodes.

#[cfg(test)]
use crate::cluster::MockClusterClient;
#[cfg(test)]
use crate::config::ControllerConfig;
#[cfg(test)]
use crate::metrics::Metrics;
#[cfg(test)]
use crate::reconciler::{Reconciler, agent};
#[cfg(test)]
use crds::*;
#[cfg(test)]
use ipam::{Ipam, MemorySubnetStore};
#[cfg(test)]
use k8s_openapi::api::apps::v1::DaemonSetStatus;
#[cfg(test)]
use std::collections::BTreeMap;
#[cfg(test)]
use std::net::SocketAddr;
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
pub const RUNTIME_NAMESPACE: &str = "dcops-system";

#[cfg(test)]
pub const NETWORK_TEMPLATE_SECRET: &str = "worker-network-data";

/// Gateway the mock cluster publishes on every node's bridge label
#[cfg(test)]
pub const BRIDGE_GATEWAY: &str = "172.16.0.1";

#[cfg(test)]
pub const NETWORK_TEMPLATE: &str = r#"hostname: {{ hostName }}
node: {{ node }}
boot: {{ bootMACAddress }}
{% for iface in interfaces %}- {{ iface.name }} {{ iface.network }} {{ iface.ipAddress }} {{ iface.macAddress }}
{% endfor %}"#;

#[cfg(test)]
pub const AGENT_TEMPLATE: &str = r#"
apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: fleet-agent
spec:
  selector:
    matchLabels:
      app: fleet-agent
  template:
    metadata:
      labels:
        app: fleet-agent
    spec:
      containers:
        - name: builder
          image: builder:latest
"#;

/// Helper to create a test VirtualFleet with two bridged networks and two workers per node
#[cfg(test)]
pub fn create_test_virtual_fleet(name: &str, namespace: &str) -> VirtualFleet {
    let bridge_route = |network: &str| Route {
        network: network.to_string(),
        netmask: "255.255.255.0".to_string(),
        gateway: BRIDGE_SENTINEL.to_string(),
    };

    let mut fleet = VirtualFleet::new(
        name,
        VirtualFleetSpec {
            node_selector: Some(NodeSelector {
                match_labels: BTreeMap::from([(
                    "fleet.dcops.microscaler.io/enabled".to_string(),
                    "true".to_string(),
                )]),
            }),
            networks: vec![
                Network {
                    name: "management".to_string(),
                    subnet: "10.0.1.0/24".to_string(),
                    allocation_start: "10.0.1.10".to_string(),
                    allocation_stop: "10.0.1.20".to_string(),
                    routes: vec![bridge_route("10.96.0.0")],
                    ..Default::default()
                },
                Network {
                    name: "tenant".to_string(),
                    subnet: "10.0.2.0/24".to_string(),
                    allocation_start: "10.0.2.10".to_string(),
                    allocation_stop: "10.0.2.20".to_string(),
                    routes: vec![bridge_route("10.97.0.0")],
                    mac_prefix: Some("06:00:00:00:00:00".to_string()),
                    ..Default::default()
                },
            ],
            nodes: vec![NodeSet {
                name: "worker".to_string(),
                count: 2,
                bmh_labels: BTreeMap::from([
                    ("dcops.microscaler.io/role".to_string(), "worker".to_string()),
                    ("rack".to_string(), "override".to_string()),
                ]),
                network_interfaces: vec![
                    NetworkInterface {
                        name: "eth0".to_string(),
                        network_name: "management".to_string(),
                        ..Default::default()
                    },
                    NetworkInterface {
                        name: "eth1".to_string(),
                        network_name: "tenant".to_string(),
                        ..Default::default()
                    },
                ],
                network_data_template: NamespacedName::new(NETWORK_TEMPLATE_SECRET),
                ..Default::default()
            }],
            bmc_credentials: BmcCredentials {
                username: "admin".to_string(),
                password: "password".to_string(),
            },
            node_label_keys_to_copy: vec!["rack".to_string(), "zone".to_string()],
            ..Default::default()
        },
    );
    fleet.metadata.namespace = Some(namespace.to_string());
    fleet.metadata.generation = Some(1);
    fleet
}

/// Helper to create a config with millisecond waits
#[cfg(test)]
pub fn create_test_config() -> ControllerConfig {
    ControllerConfig {
        runtime_namespace: RUNTIME_NAMESPACE.to_string(),
        watch_namespace: None,
        bridge_discovery_timeout: Duration::from_millis(200),
        agent_scheduled_timeout: Duration::from_millis(200),
        agent_ready_timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(5),
        resync_interval: Duration::from_secs(600),
        ipam_conflict_retries: ipam::DEFAULT_CONFLICT_RETRIES,
        metrics_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
    }
}

/// Helper to create a mock cluster running the fleet agent on `nodes`
///
/// Every node gets an InternalIP of `192.168.10.{n+4}`, a `rack` label and the
/// bridge gateway label. The agent DaemonSet reports all pods ready.
#[cfg(test)]
pub fn create_test_cluster(fleet: &VirtualFleet, nodes: &[&str]) -> MockClusterClient {
    let cluster = MockClusterClient::new();
    let labels = agent::selector_labels(fleet).expect("fleet has a name");
    let namespace = fleet.metadata.namespace.as_deref().unwrap_or("default");

    for (i, node) in nodes.iter().enumerate() {
        let ip = format!("192.168.10.{}", i + 4);
        cluster.add_node(node, Some(&ip), &[("rack", "r1"), (NODE_BRIDGE_GW_LABEL, BRIDGE_GATEWAY)]);
        cluster.add_pod(RUNTIME_NAMESPACE, &format!("fleet-agent-{}", node), node, labels.clone());
    }
    cluster.add_secret(namespace, NETWORK_TEMPLATE_SECRET, &[("template", NETWORK_TEMPLATE)]);
    cluster.add_config_map(
        RUNTIME_NAMESPACE,
        agent::DEFAULT_AGENT_TEMPLATE,
        &[(agent::AGENT_TEMPLATE_KEY, AGENT_TEMPLATE)],
    );

    let desired = i32::try_from(nodes.len()).expect("small node count");
    cluster.set_daemon_set_status(DaemonSetStatus {
        desired_number_scheduled: desired,
        current_number_scheduled: desired,
        number_ready: desired,
        ..Default::default()
    });
    cluster
}

/// Helper to create an IPAM engine over an in-memory store
#[cfg(test)]
pub fn create_test_ipam(store: &MemorySubnetStore) -> Ipam {
    Ipam::new(Box::new(store.clone()))
}

/// Helper to create a reconciler over a mock cluster and in-memory store
#[cfg(test)]
pub fn create_test_reconciler(cluster: &MockClusterClient, store: &MemorySubnetStore) -> Reconciler {
    Reconciler::new(
        Box::new(cluster.clone()),
        create_test_ipam(store),
        create_test_config(),
        Metrics::new().expect("metrics register"),
    )
}
