//! Unit tests for the provisioner

#[cfg(test)]
mod tests {
    use crate::cluster::MockClusterClient;
    use crate::config::ControllerConfig;
    use crate::error::ControllerError;
    use crate::metrics::Metrics;
    use crate::provisioner::Provisioner;
    use crate::provisioner::network::BOOT_SUBNET;
    use crate::test_utils::*;
    use crds::{BRIDGE_SENTINEL, BUILDER_MANIFEST_ANNOTATION, BuilderManifest, NODE_BRIDGE_GW_LABEL, VirtualFleet};
    use ipam::{Ipam, MemorySubnetStore};

    struct Fixture {
        cluster: MockClusterClient,
        store: MemorySubnetStore,
        ipam: Ipam,
        config: ControllerConfig,
        metrics: Metrics,
    }

    impl Fixture {
        fn new(fleet: &VirtualFleet, nodes: &[&str]) -> Self {
            let store = MemorySubnetStore::new();
            Self {
                cluster: create_test_cluster(fleet, nodes),
                ipam: create_test_ipam(&store),
                store,
                config: create_test_config(),
                metrics: Metrics::new().unwrap(),
            }
        }

        fn provisioner(&self) -> Provisioner<'_> {
            Provisioner::new(&self.cluster, &self.ipam, &self.config, &self.metrics)
        }

        fn published(&self, node: &str) -> Option<BuilderManifest> {
            self.cluster
                .node_annotation(node, BUILDER_MANIFEST_ANNOTATION)
                .map(|yaml| serde_yaml::from_str(&yaml).unwrap())
        }
    }

    #[tokio::test]
    async fn test_plan_allocates_and_stages_hosts() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &["node-1"]);

        let pending = fixture.provisioner().plan(&fleet).await.unwrap();

        let names: Vec<_> = pending.hosts.iter().map(|h| h.metadata.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["lab-fleet-a-node-1-worker-0", "lab-fleet-a-node-1-worker-1"]);

        let host = &pending.hosts[0];
        assert_eq!(host.metadata.namespace.as_deref(), Some(RUNTIME_NAMESPACE));
        assert!(!host.spec.online, "hosts are registered powered off");
        assert_eq!(
            host.spec.bmc.address,
            "redfish+http://192.168.10.4:8000/redfish/v1/Systems/worker-0"
        );
        assert_eq!(host.spec.bmc.credentials_name, "lab-fleet-a-bmc-credentials");
        assert!(host.spec.bmc.disable_certificate_verification);
        assert_eq!(host.spec.boot_mac_address, "52:54:00:32:00:00");
        assert_eq!(pending.hosts[1].spec.boot_mac_address, "52:54:00:32:00:01");
        assert_eq!(
            host.spec.root_device_hints.as_ref().unwrap().device_name.as_deref(),
            Some("/dev/sda")
        );
        let network_data = host.spec.network_data.as_ref().unwrap();
        assert_eq!(network_data.name, "lab-fleet-a-node-1-worker-0-network-data");
        assert_eq!(network_data.namespace.as_deref(), Some(RUNTIME_NAMESPACE));

        // role labels win over copied node labels; missing node labels are kept empty
        let labels = host.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("rack").map(String::as_str), Some("override"));
        assert_eq!(labels.get("zone").map(String::as_str), Some(""));
        assert_eq!(labels.get("dcops.microscaler.io/role").map(String::as_str), Some("worker"));

        let rendered = pending.network_secrets[0].string_data.as_ref().unwrap().get("networkData").unwrap();
        assert!(rendered.contains("hostname: lab-fleet-a-node-1-worker-0"), "{rendered}");
        assert!(rendered.contains("boot: 52:54:00:32:00:00"), "{rendered}");
        assert!(rendered.contains("- eth0 management 10.0.1.10 02:00:00:00:00:00"), "{rendered}");
        assert!(rendered.contains("- eth1 tenant 10.0.2.10 06:00:00:00:00:00"), "{rendered}");

        let credentials = pending.credentials_secret.as_ref().unwrap();
        assert_eq!(credentials.metadata.name.as_deref(), Some("lab-fleet-a-bmc-credentials"));
        let data = credentials.string_data.as_ref().unwrap();
        assert_eq!(data.get("username").map(String::as_str), Some("admin"));
        assert_eq!(data.get("password").map(String::as_str), Some("password"));

        // planning writes nothing but the manifest
        assert!(fixture.cluster.applied().is_empty());
        assert_eq!(fixture.metrics.allocations.get(), 6);
    }

    #[tokio::test]
    async fn test_plan_publishes_manifest_per_node() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &["node-1"]);

        let pending = fixture.provisioner().plan(&fleet).await.unwrap();
        let manifest = fixture.published("node-1").expect("manifest published");

        assert_eq!(pending.manifests.get("node-1"), Some(&manifest));
        let domains: Vec<_> = manifest.domains.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(domains, vec!["worker-0", "worker-1"]);

        let second = &manifest.domains[1];
        assert_eq!(second.role, "worker");
        assert_eq!(second.boot_mac_address, "52:54:00:32:00:01");
        assert_eq!(second.interfaces["eth0"].ip_address, "10.0.1.11");
        assert_eq!(second.interfaces["eth0"].mac_address, "02:00:00:00:00:01");
        assert_eq!(second.interfaces["eth1"].ip_address, "10.0.2.11");
        assert_eq!(second.interfaces["eth1"].mac_address, "06:00:00:00:00:01");

        // every sentinel route, in every network, points at the node bridge
        for network in &manifest.networks {
            assert!(network.routes.iter().all(|r| r.gateway == BRIDGE_GATEWAY), "{network:?}");
        }
        assert_eq!(manifest.node_roles, fleet.spec.nodes);

        // the fleet itself still carries the sentinel
        assert_eq!(fleet.spec.networks[0].routes[0].gateway, BRIDGE_SENTINEL);
    }

    #[tokio::test]
    async fn test_plan_registers_boot_network() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &["node-1"]);

        fixture.provisioner().plan(&fleet).await.unwrap();

        let boot = fixture.store.get(BOOT_SUBNET).expect("boot subnet registered");
        assert_eq!(boot.mac_prefix, "52:54:00:32:00:00");
        assert_eq!(boot.allocated_ips.len(), 2);
        assert!(
            boot.allocated_ips
                .iter()
                .any(|a| a.allocated_to == "lab-fleet-a-node-1-worker-1/pxe-boot")
        );
        let management = fixture.store.get("10.0.1.0/24").unwrap();
        assert!(
            management
                .allocated_ips
                .iter()
                .any(|a| a.allocated_to == "lab-fleet-a-node-1-worker-0/eth0")
        );
    }

    #[tokio::test]
    async fn test_plan_is_idempotent() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &["node-1"]);

        let first = fixture.provisioner().plan(&fleet).await.unwrap();
        let writes = fixture.store.writes();
        let second = fixture.provisioner().plan(&fleet).await.unwrap();

        assert_eq!(first.manifests, second.manifests);
        let specs = |p: &crate::provisioner::PendingObjectSet| p.hosts.iter().map(|h| h.spec.clone()).collect::<Vec<_>>();
        assert_eq!(specs(&first), specs(&second));
        assert_eq!(fixture.store.writes(), writes, "re-planning must not allocate again");
        assert_eq!(fixture.store.get("10.0.1.0/24").unwrap().allocated_ips.len(), 2);
    }

    #[tokio::test]
    async fn test_each_node_gets_its_own_bridge_gateway() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &["node-1", "node-2"]);
        fixture
            .cluster
            .add_node("node-2", Some("192.168.10.5"), &[("rack", "r2"), (NODE_BRIDGE_GW_LABEL, "172.16.1.1")]);

        let pending = fixture.provisioner().plan(&fleet).await.unwrap();

        assert_eq!(pending.hosts.len(), 4);
        assert_eq!(pending.nodes().into_iter().collect::<Vec<_>>(), vec!["node-1", "node-2"]);
        let gateway = |node: &str| fixture.published(node).unwrap().networks[1].routes[0].gateway.clone();
        assert_eq!(gateway("node-1"), BRIDGE_GATEWAY);
        assert_eq!(gateway("node-2"), "172.16.1.1");

        // nodes are planned in order, so node-2 continues where node-1 stopped
        let node_2 = fixture.published("node-2").unwrap();
        assert_eq!(node_2.domains[0].interfaces["eth0"].ip_address, "10.0.1.12");
        assert_eq!(
            pending.hosts[2].spec.bmc.address,
            "redfish+http://192.168.10.5:8000/redfish/v1/Systems/worker-0"
        );
    }

    #[tokio::test]
    async fn test_bridge_label_is_polled_until_present() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &["node-1"]);
        fixture.cluster.add_node("node-1", Some("192.168.10.4"), &[("rack", "r1")]);
        fixture
            .cluster
            .set_label_after_reads("node-1", NODE_BRIDGE_GW_LABEL, "172.16.9.1", 3);

        fixture.provisioner().plan(&fleet).await.unwrap();

        assert!(fixture.cluster.node_reads("node-1") >= 3);
        let manifest = fixture.published("node-1").unwrap();
        assert_eq!(manifest.networks[0].routes[0].gateway, "172.16.9.1");
        assert_eq!(manifest.networks[1].routes[0].gateway, "172.16.9.1");
    }

    #[tokio::test]
    async fn test_bridge_discovery_times_out() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &["node-1"]);
        fixture.cluster.add_node("node-1", Some("192.168.10.4"), &[("rack", "r1")]);

        let err = fixture.provisioner().plan(&fleet).await.unwrap_err();

        assert!(matches!(err, ControllerError::DeadlineExceeded { .. }), "{err}");
        assert!(err.is_retryable());
        assert!(fixture.published("node-1").is_none());
        assert!(fixture.store.get("10.0.1.0/24").unwrap().allocated_ips.is_empty());
    }

    #[tokio::test]
    async fn test_no_bridge_wait_without_sentinel() {
        let mut fleet = create_test_virtual_fleet("fleet-a", "lab");
        for network in &mut fleet.spec.networks {
            network.routes[0].gateway = "10.0.0.1".to_string();
        }
        let fixture = Fixture::new(&fleet, &["node-1"]);
        fixture.cluster.add_node("node-1", Some("192.168.10.4"), &[]);

        fixture.provisioner().plan(&fleet).await.unwrap();

        assert_eq!(fixture.cluster.node_reads("node-1"), 1);
        assert_eq!(fixture.published("node-1").unwrap().networks[0].routes[0].gateway, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_unknown_network_is_not_retryable() {
        let mut fleet = create_test_virtual_fleet("fleet-a", "lab");
        fleet.spec.nodes[0].network_interfaces[1].network_name = "storage".to_string();
        let fixture = Fixture::new(&fleet, &["node-1"]);

        let err = fixture.provisioner().plan(&fleet).await.unwrap_err();

        assert_eq!(err.to_string(), "Interface eth1 doesn't have a matching network storage defined");
        assert!(!err.is_retryable());
        assert!(fixture.published("node-1").is_none());
    }

    #[tokio::test]
    async fn test_node_without_internal_ip() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &["node-1"]);
        fixture.cluster.add_node("node-1", None, &[(NODE_BRIDGE_GW_LABEL, BRIDGE_GATEWAY)]);

        let err = fixture.provisioner().plan(&fleet).await.unwrap_err();

        assert!(matches!(err, ControllerError::NodeAddressMissing { ref node } if node == "node-1"));
    }

    #[tokio::test]
    async fn test_template_secret_without_template_key() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &["node-1"]);
        fixture.cluster.add_secret("lab", NETWORK_TEMPLATE_SECRET, &[("other", "x")]);

        let err = fixture.provisioner().plan(&fleet).await.unwrap_err();

        assert!(matches!(err, ControllerError::InvalidConfig(_)), "{err}");
    }

    #[tokio::test]
    async fn test_broken_template_fails_render() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &["node-1"]);
        fixture
            .cluster
            .add_secret("lab", NETWORK_TEMPLATE_SECRET, &[("template", "{% for x in %}")]);

        let err = fixture.provisioner().plan(&fleet).await.unwrap_err();

        assert!(matches!(err, ControllerError::Template(_)), "{err}");
    }

    #[tokio::test]
    async fn test_no_agent_pods() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &[]);

        let err = fixture.provisioner().plan(&fleet).await.unwrap_err();

        assert!(matches!(err, ControllerError::NoAgentsScheduled(ref key) if key == "lab/fleet-a"));
        // networks are registered before agents are looked up
        assert!(fixture.store.get("10.0.2.0/24").is_some());
    }

    #[tokio::test]
    async fn test_other_fleets_agents_are_ignored() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let other = create_test_virtual_fleet("fleet-b", "lab");
        let fixture = Fixture::new(&fleet, &["node-1"]);
        fixture.cluster.add_node("node-9", Some("192.168.10.9"), &[(NODE_BRIDGE_GW_LABEL, BRIDGE_GATEWAY)]);
        fixture.cluster.add_pod(
            RUNTIME_NAMESPACE,
            "fleet-agent-b",
            "node-9",
            crate::reconciler::agent::selector_labels(&other).unwrap(),
        );

        let nodes = fixture.provisioner().agent_nodes(&fleet).await.unwrap();

        assert_eq!(nodes.into_iter().collect::<Vec<_>>(), vec!["node-1"]);
    }

    #[tokio::test]
    async fn test_commit_writes_secrets_before_hosts() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &["node-1"]);
        let provisioner = fixture.provisioner();

        let pending = provisioner.plan(&fleet).await.unwrap();
        let committed = provisioner.commit(&pending).await.unwrap();

        assert_eq!(committed, 2);
        assert_eq!(
            fixture.cluster.applied(),
            vec![
                "Secret/dcops-system/lab-fleet-a-node-1-worker-0-network-data",
                "Secret/dcops-system/lab-fleet-a-node-1-worker-1-network-data",
                "Secret/dcops-system/lab-fleet-a-bmc-credentials",
                "BareMetalHost/dcops-system/lab-fleet-a-node-1-worker-0",
                "BareMetalHost/dcops-system/lab-fleet-a-node-1-worker-1",
            ]
        );
        assert!(
            fixture
                .cluster
                .host(RUNTIME_NAMESPACE, "lab-fleet-a-node-1-worker-1")
                .is_some()
        );
        assert_eq!(fixture.metrics.hosts_committed.get(), 2);
    }

    #[tokio::test]
    async fn test_unpublish_removes_manifests() {
        let fleet = create_test_virtual_fleet("fleet-a", "lab");
        let fixture = Fixture::new(&fleet, &["node-1", "node-2"]);
        let provisioner = fixture.provisioner();
        provisioner.plan(&fleet).await.unwrap();
        assert!(fixture.published("node-2").is_some());

        provisioner.unpublish(&fleet).await.unwrap();

        assert!(fixture.published("node-1").is_none());
        assert!(fixture.published("node-2").is_none());
    }
}
