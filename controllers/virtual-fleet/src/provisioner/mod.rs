//! Provisioning: turn a VirtualFleet into addresses, manifests and hosts.
//!
//! A pass has two halves. [`Provisioner::plan`] registers networks, discovers
//! the physical nodes running the fleet agent, allocates addresses for every
//! domain, publishes one `BuilderManifest` per node and stages the secrets and
//! BareMetalHosts in a [`PendingObjectSet`]. [`Provisioner::commit`] writes the
//! staged objects once the agent is ready.
//!
//! Nodes, roles and interfaces are processed strictly in order.

pub mod identity;
pub mod network;
pub mod template;

use crate::cluster::ClusterClientTrait;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::poll::wait_until;
use crate::reconciler::agent;
use crds::{
    BUILDER_MANIFEST_ANNOTATION, BareMetalHost, BareMetalHostSpec, BmcDetails, BuilderDomain, BuilderInterface,
    BuilderManifest, DEFAULT_ROOT_DEVICE, NODE_BRIDGE_GW_LABEL, Network, NodeSet, RootDeviceHints, SecretReference,
    VirtualFleet,
};
use identity::{BOOT_OWNER_SUFFIX, HostIdentity, bmc_address, credentials_secret_name};
use ipam::Ipam;
use k8s_openapi::api::core::v1::{Node, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};
use template::{InterfaceValues, NETWORK_DATA_KEY, NetworkDataValues, TEMPLATE_KEY, render_network_data};
use tracing::{debug, info, warn};

/// Objects computed while planning, written only by [`Provisioner::commit`]
#[derive(Debug, Default)]
pub struct PendingObjectSet {
    pub network_secrets: Vec<Secret>,
    pub credentials_secret: Option<Secret>,
    pub hosts: Vec<BareMetalHost>,
    /// Published manifest per physical node
    pub manifests: BTreeMap<String, BuilderManifest>,
}

impl PendingObjectSet {
    /// Physical nodes the plan covers
    pub fn nodes(&self) -> BTreeSet<String> {
        self.manifests.keys().cloned().collect()
    }
}

/// Provisions one VirtualFleet per call, borrowing the reconciler's collaborators
pub struct Provisioner<'a> {
    cluster: &'a (dyn ClusterClientTrait + Send + Sync),
    ipam: &'a Ipam,
    config: &'a ControllerConfig,
    metrics: &'a Metrics,
}

impl std::fmt::Debug for Provisioner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("runtime_namespace", &self.config.runtime_namespace)
            .finish_non_exhaustive()
    }
}

/// Objects a BareMetalHost points at, resolved before it is built
struct HostRefs<'r> {
    network_data_secret: &'r str,
    credentials_name: &'r str,
    node_ip: &'r str,
    boot_mac_address: &'r str,
}

/// Role template source, already pulled out of its secret
struct RoleTemplate<'f> {
    role: &'f NodeSet,
    source: String,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        cluster: &'a (dyn ClusterClientTrait + Send + Sync),
        ipam: &'a Ipam,
        config: &'a ControllerConfig,
        metrics: &'a Metrics,
    ) -> Self {
        Self {
            cluster,
            ipam,
            config,
            metrics,
        }
    }

    /// Register networks, allocate, publish manifests and stage objects.
    pub async fn plan(&self, fleet: &VirtualFleet) -> Result<PendingObjectSet, ControllerError> {
        let (namespace, name) = fleet_key(fleet)?;

        self.register_networks(&fleet.spec.networks).await?;

        let nodes = self.agent_nodes(fleet).await?;
        if nodes.is_empty() {
            return Err(ControllerError::NoAgentsScheduled(format!("{}/{}", namespace, name)));
        }
        info!(
            "Planning VirtualFleet {}/{} on {} node(s): {:?}",
            namespace,
            name,
            nodes.len(),
            nodes
        );

        let templates = self.load_templates(fleet, namespace).await?;
        let mut pending = PendingObjectSet {
            credentials_secret: Some(self.credentials_secret(fleet, namespace, name)),
            ..Default::default()
        };

        for node in &nodes {
            self.plan_node(fleet, node, &templates, &mut pending).await?;
        }

        Ok(pending)
    }

    /// Write staged secrets, then credentials, then hosts. Returns the host count.
    pub async fn commit(&self, pending: &PendingObjectSet) -> Result<usize, ControllerError> {
        for secret in &pending.network_secrets {
            self.cluster.apply_secret(secret).await?;
        }
        if let Some(credentials) = &pending.credentials_secret {
            self.cluster.apply_secret(credentials).await?;
        }
        for host in &pending.hosts {
            self.cluster.apply_bare_metal_host(host).await?;
            self.metrics.hosts_committed.inc();
        }
        info!(
            "Committed {} BareMetalHost(s) and {} network-data secret(s)",
            pending.hosts.len(),
            pending.network_secrets.len()
        );
        Ok(pending.hosts.len())
    }

    /// Remove the manifest annotation from every node running the fleet agent
    pub async fn unpublish(&self, fleet: &VirtualFleet) -> Result<(), ControllerError> {
        for node in self.agent_nodes(fleet).await? {
            info!("Removing builder manifest from node {}", node);
            match self.cluster.set_node_annotation(&node, BUILDER_MANIFEST_ANNOTATION, None).await {
                Ok(()) => {}
                Err(ControllerError::Kube(kube::Error::Api(resp))) if resp.code == 404 => {
                    debug!("Node {} is gone, nothing to unpublish", node);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Nodes currently hosting one of this fleet's agent pods
    pub async fn agent_nodes(&self, fleet: &VirtualFleet) -> Result<BTreeSet<String>, ControllerError> {
        let selector = agent::label_selector(fleet)?;
        let pods = self
            .cluster
            .list_pods(&self.config.runtime_namespace, &selector)
            .await?;
        Ok(pods
            .into_iter()
            .filter_map(|pod| pod.spec.and_then(|spec| spec.node_name))
            .filter(|node| !node.is_empty())
            .collect())
    }

    async fn register_networks(&self, networks: &[Network]) -> Result<(), ControllerError> {
        let boot = network::boot_network();
        for net in networks.iter().chain(std::iter::once(&boot)) {
            let range = network::allocation_range(net)?;
            debug!("Registering network {} ({} {})", net.name, net.subnet, range);
            self.ipam
                .register_range(&net.subnet, &range, network::mac_prefix(net))
                .await?;
        }
        Ok(())
    }

    async fn load_templates<'f>(
        &self,
        fleet: &'f VirtualFleet,
        namespace: &str,
    ) -> Result<Vec<RoleTemplate<'f>>, ControllerError> {
        let mut templates = Vec::with_capacity(fleet.spec.nodes.len());
        for role in &fleet.spec.nodes {
            let reference = &role.network_data_template;
            let secret_namespace = reference.namespace_or(namespace);
            debug!("Loading network-data template {}/{} for role {}", secret_namespace, reference.name, role.name);

            let secret = self
                .cluster
                .get_secret(secret_namespace, &reference.name)
                .await?
                .ok_or_else(|| {
                    ControllerError::NotFound(format!(
                        "network template secret {}/{} for role {}",
                        secret_namespace, reference.name, role.name
                    ))
                })?;
            let raw = secret
                .data
                .as_ref()
                .and_then(|data| data.get(TEMPLATE_KEY))
                .ok_or_else(|| {
                    ControllerError::InvalidConfig(format!(
                        "network template secret {}/{} has no key '{}'",
                        secret_namespace, reference.name, TEMPLATE_KEY
                    ))
                })?;
            let source = String::from_utf8(raw.0.clone()).map_err(|e| {
                ControllerError::InvalidConfig(format!(
                    "network template secret {}/{} is not valid UTF-8: {}",
                    secret_namespace, reference.name, e
                ))
            })?;
            templates.push(RoleTemplate { role, source });
        }
        Ok(templates)
    }

    async fn discover_bridge(&self, node: &str) -> Result<String, ControllerError> {
        info!("Waiting for bridge gateway label on node {}", node);
        let what = format!("bridge gateway label on node {}", node);
        wait_until(
            &what,
            self.config.bridge_discovery_timeout,
            self.config.poll_interval,
            || async move {
                let k8s_node = self.cluster.get_node(node).await?;
                Ok(k8s_node
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(NODE_BRIDGE_GW_LABEL))
                    .filter(|gw| !gw.is_empty())
                    .cloned())
            },
        )
        .await
    }

    async fn plan_node(
        &self,
        fleet: &VirtualFleet,
        node_name: &str,
        templates: &[RoleTemplate<'_>],
        pending: &mut PendingObjectSet,
    ) -> Result<(), ControllerError> {
        let (namespace, name) = fleet_key(fleet)?;
        let node = self.cluster.get_node(node_name).await?;
        let node_ip = network::internal_ip(&node)
            .ok_or_else(|| ControllerError::NodeAddressMissing {
                node: node_name.to_string(),
            })?
            .to_string();

        // per-node copy: the bridge address is local to this node
        let mut networks = fleet.spec.networks.clone();
        if network::has_bridge_sentinel(&networks) {
            let gateway = self.discover_bridge(node_name).await?;
            let rewritten = network::resolve_bridge_sentinel(&mut networks, &gateway);
            info!("Resolved {} bridge route(s) on node {} to {}", rewritten, node_name, gateway);
        }

        let copied_labels = copied_node_labels(&node, &fleet.spec.node_label_keys_to_copy);
        let credentials_name = credentials_secret_name(namespace, name);
        let mut domains = Vec::new();

        for role_template in templates {
            let role = role_template.role;
            for index in 0..role.count {
                let identity = HostIdentity::new(namespace, name, node_name, &role.name, index);
                let (domain, interfaces) = self.allocate_domain(&identity, role, &networks).await?;

                let values = NetworkDataValues {
                    host_name: identity.name(),
                    node: node_name,
                    role,
                    networks: &networks,
                    boot_mac_address: &domain.boot_mac_address,
                    interfaces,
                };
                let rendered = render_network_data(&role_template.source, &values)?;
                let secret_name = identity.network_data_secret_name();
                pending.network_secrets.push(self.network_data_secret(&secret_name, rendered));

                let mut labels = copied_labels.clone();
                labels.extend(role.bmh_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
                let refs = HostRefs {
                    network_data_secret: &secret_name,
                    credentials_name: &credentials_name,
                    node_ip: &node_ip,
                    boot_mac_address: &domain.boot_mac_address,
                };
                pending.hosts.push(self.bare_metal_host(&identity, role, labels, &refs));

                domains.push(domain);
            }
        }

        let manifest = BuilderManifest {
            pxe_boot_image_host: fleet.spec.pxe_boot_image_host.clone(),
            pxe_boot_image_host_port: fleet.spec.pxe_boot_image_host_port,
            networks,
            node_roles: fleet.spec.nodes.clone(),
            cpu_configuration: fleet.spec.cpu_configuration.clone(),
            domains,
        };
        let serialized = serde_yaml::to_string(&manifest)?;
        self.cluster
            .set_node_annotation(node_name, BUILDER_MANIFEST_ANNOTATION, Some(&serialized))
            .await?;
        info!(
            "Published builder manifest with {} domain(s) to node {}",
            manifest.domains.len(),
            node_name
        );
        pending.manifests.insert(node_name.to_string(), manifest);
        Ok(())
    }

    /// Allocate every interface plus the boot MAC for one domain
    async fn allocate_domain<'r>(
        &self,
        identity: &HostIdentity,
        role: &'r NodeSet,
        networks: &[Network],
    ) -> Result<(BuilderDomain, Vec<InterfaceValues<'r>>), ControllerError> {
        let mut interfaces = BTreeMap::new();
        let mut values = Vec::with_capacity(role.network_interfaces.len());

        for iface in &role.network_interfaces {
            let net = network::network_for(networks, iface)?;
            let range = network::allocation_range(net)?;
            let allocation = self
                .ipam
                .allocate(&net.subnet, &range, &identity.owner_key(&iface.name))
                .await?;
            self.metrics.allocations.inc();
            info!(
                "Allocated {} / {} on network {} for {}",
                allocation.ip,
                allocation.mac,
                net.name,
                identity.owner_key(&iface.name)
            );

            interfaces.insert(
                iface.name.clone(),
                BuilderInterface {
                    ip_address: allocation.ip.clone(),
                    mac_address: allocation.mac.clone(),
                },
            );
            values.push(InterfaceValues {
                interface: iface,
                ip_address: allocation.ip,
                mac_address: allocation.mac,
            });
        }

        let boot = network::boot_network();
        let boot_range = network::allocation_range(&boot)?;
        let boot_allocation = self
            .ipam
            .allocate(&boot.subnet, &boot_range, &identity.owner_key(BOOT_OWNER_SUFFIX))
            .await?;
        self.metrics.allocations.inc();
        debug!("Boot MAC {} for {}", boot_allocation.mac, identity.name());

        let domain = BuilderDomain {
            name: identity.role_suffix().to_string(),
            role: identity.role().to_string(),
            boot_mac_address: boot_allocation.mac,
            interfaces,
        };
        Ok((domain, values))
    }

    fn network_data_secret(&self, name: &str, rendered: String) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.config.runtime_namespace.clone()),
                ..Default::default()
            },
            string_data: Some(BTreeMap::from([(NETWORK_DATA_KEY.to_string(), rendered)])),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }

    fn credentials_secret(&self, fleet: &VirtualFleet, namespace: &str, name: &str) -> Secret {
        let credentials = &fleet.spec.bmc_credentials;
        Secret {
            metadata: ObjectMeta {
                name: Some(credentials_secret_name(namespace, name)),
                namespace: Some(self.config.runtime_namespace.clone()),
                ..Default::default()
            },
            string_data: Some(BTreeMap::from([
                ("username".to_string(), credentials.username.clone()),
                ("password".to_string(), credentials.password.clone()),
            ])),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }

    /// Host stays powered off; whoever consumes it decides when to power on
    fn bare_metal_host(
        &self,
        identity: &HostIdentity,
        role: &NodeSet,
        labels: BTreeMap<String, String>,
        refs: &HostRefs<'_>,
    ) -> BareMetalHost {
        let device_name = role
            .root_device_name
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_ROOT_DEVICE.to_string());

        let mut host = BareMetalHost::new(
            identity.name(),
            BareMetalHostSpec {
                online: false,
                bmc: BmcDetails {
                    address: bmc_address(refs.node_ip, identity.role_suffix()),
                    credentials_name: refs.credentials_name.to_string(),
                    disable_certificate_verification: true,
                },
                boot_mac_address: refs.boot_mac_address.to_string(),
                network_data: Some(SecretReference {
                    name: refs.network_data_secret.to_string(),
                    namespace: Some(self.config.runtime_namespace.clone()),
                }),
                root_device_hints: Some(RootDeviceHints {
                    device_name: Some(device_name),
                }),
            },
        );
        host.metadata.namespace = Some(self.config.runtime_namespace.clone());
        host.metadata.labels = Some(labels);
        host
    }
}

/// `(namespace, name)` of a fleet
pub(crate) fn fleet_key(fleet: &VirtualFleet) -> Result<(&str, &str), ControllerError> {
    let name = fleet
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidConfig("VirtualFleet missing name".to_string()))?;
    let namespace = fleet.metadata.namespace.as_deref().unwrap_or("default");
    Ok((namespace, name))
}

/// Labels listed in `keys`, read from the node; missing ones are kept empty
fn copied_node_labels(node: &Node, keys: &[String]) -> BTreeMap<String, String> {
    let node_labels = node.metadata.labels.as_ref();
    let node_name = node.metadata.name.as_deref().unwrap_or("<unknown>");
    keys.iter()
        .map(|key| {
            let value = node_labels.and_then(|l| l.get(key)).cloned().unwrap_or_else(|| {
                warn!("Node {} is missing label {} listed in nodeLabelKeysToCopy", node_name, key);
                String::new()
            });
            (key.clone(), value)
        })
        .collect()
}
