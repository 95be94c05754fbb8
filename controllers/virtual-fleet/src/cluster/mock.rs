//! In-memory `ClusterClientTrait` for unit tests.

use super::ClusterClientTrait;
use crate::error::ControllerError;
use crds::{BareMetalHost, VirtualFleetStatus};
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Node, NodeAddress, NodeStatus, Pod, PodSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// A label that shows up on a node only after it has been read a few times
struct DelayedLabel {
    key: String,
    value: String,
    after_reads: usize,
}

#[derive(Default)]
struct MockState {
    pods: Vec<Pod>,
    /// Pods that only show up from the n-th `list_pods` call onwards
    late_pods: Vec<(usize, Pod)>,
    /// Pods (by name) no longer listed from the n-th `list_pods` call onwards
    removed_pods: Vec<(usize, String)>,
    pod_lists: usize,
    nodes: BTreeMap<String, Node>,
    delayed_labels: HashMap<String, DelayedLabel>,
    node_reads: HashMap<String, usize>,
    secrets: BTreeMap<Key, Secret>,
    config_maps: BTreeMap<Key, ConfigMap>,
    daemon_sets: BTreeMap<Key, DaemonSet>,
    daemon_set_status: Option<DaemonSetStatus>,
    hosts: BTreeMap<Key, BareMetalHost>,
    applied: Vec<String>,
    statuses: Vec<VirtualFleetStatus>,
    deleted_daemon_sets: Vec<String>,
}

/// Mock cluster for testing
///
/// Clones share state, so a test can keep one handle for assertions while the
/// reconciler owns another.
#[derive(Clone, Default)]
pub struct MockClusterClient {
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterClient").finish_non_exhaustive()
    }
}

impl MockClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_node(&self, name: &str, internal_ip: Option<&str>, labels: &[(&str, &str)]) {
        let addresses = internal_ip.map(|ip| {
            vec![
                NodeAddress {
                    address: format!("{}.hostname", name),
                    type_: "Hostname".to_string(),
                },
                NodeAddress {
                    address: ip.to_string(),
                    type_: "InternalIP".to_string(),
                },
            ]
        });
        let node = Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                addresses,
                ..Default::default()
            }),
            ..Default::default()
        };
        self.lock().nodes.insert(name.to_string(), node);
    }

    /// Add a pod scheduled on `node`
    pub fn add_pod(&self, namespace: &str, name: &str, node: &str, labels: BTreeMap<String, String>) {
        self.lock().pods.push(pod(namespace, name, node, labels));
    }

    /// Add a pod that is only listed from the `after_lists`-th `list_pods` call
    pub fn add_pod_after_lists(
        &self,
        namespace: &str,
        name: &str,
        node: &str,
        labels: BTreeMap<String, String>,
        after_lists: usize,
    ) {
        self.lock()
            .late_pods
            .push((after_lists, pod(namespace, name, node, labels)));
    }

    /// Stop listing pod `name` from the `after_lists`-th `list_pods` call
    pub fn remove_pod_after_lists(&self, name: &str, after_lists: usize) {
        self.lock().removed_pods.push((after_lists, name.to_string()));
    }

    /// Make `label` appear on `node` from its `after_reads`-th read onwards
    pub fn set_label_after_reads(&self, node: &str, label: &str, value: &str, after_reads: usize) {
        self.lock().delayed_labels.insert(
            node.to_string(),
            DelayedLabel {
                key: label.to_string(),
                value: value.to_string(),
                after_reads,
            },
        );
    }

    pub fn add_secret(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        };
        self.lock().secrets.insert(key(namespace, name), secret);
    }

    pub fn add_config_map(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(data.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            ..Default::default()
        };
        self.lock().config_maps.insert(key(namespace, name), config_map);
    }

    /// Status reported for every DaemonSet read back
    pub fn set_daemon_set_status(&self, status: DaemonSetStatus) {
        self.lock().daemon_set_status = Some(status);
    }

    pub fn node_annotation(&self, node: &str, annotation: &str) -> Option<String> {
        self.lock()
            .nodes
            .get(node)
            .and_then(|n| n.metadata.annotations.as_ref())
            .and_then(|a| a.get(annotation).cloned())
    }

    pub fn node_reads(&self, node: &str) -> usize {
        self.lock().node_reads.get(node).copied().unwrap_or(0)
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock().secrets.get(&key(namespace, name)).cloned()
    }

    pub fn host(&self, namespace: &str, name: &str) -> Option<BareMetalHost> {
        self.lock().hosts.get(&key(namespace, name)).cloned()
    }

    pub fn hosts(&self) -> Vec<BareMetalHost> {
        self.lock().hosts.values().cloned().collect()
    }

    pub fn daemon_set(&self, namespace: &str, name: &str) -> Option<DaemonSet> {
        self.lock().daemon_sets.get(&key(namespace, name)).cloned()
    }

    /// Applied objects in order, as `Kind/namespace/name`
    pub fn applied(&self) -> Vec<String> {
        self.lock().applied.clone()
    }

    /// Every status patch, oldest first
    pub fn statuses(&self) -> Vec<VirtualFleetStatus> {
        self.lock().statuses.clone()
    }

    pub fn deleted_daemon_sets(&self) -> Vec<String> {
        self.lock().deleted_daemon_sets.clone()
    }
}

fn pod(namespace: &str, name: &str, node: &str, labels: BTreeMap<String, String>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.and_then(|l| l.get(k)).is_some_and(|actual| actual == v),
            None => labels.is_some_and(|l| l.contains_key(term)),
        })
}

fn meta_key(meta: &ObjectMeta) -> Result<Key, ControllerError> {
    match (&meta.namespace, &meta.name) {
        (Some(namespace), Some(name)) => Ok(key(namespace, name)),
        _ => Err(ControllerError::InvalidConfig("object is missing name or namespace".to_string())),
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ControllerError> {
        let mut state = self.lock();
        state.pod_lists += 1;
        let lists = state.pod_lists;
        let late = state
            .late_pods
            .iter()
            .filter(|(after, _)| *after <= lists)
            .map(|(_, p)| p);
        Ok(state
            .pods
            .iter()
            .chain(late)
            .filter(|p| {
                !state
                    .removed_pods
                    .iter()
                    .any(|(after, name)| *after <= lists && p.metadata.name.as_deref() == Some(name.as_str()))
            })
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| selector_matches(label_selector, p.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node, ControllerError> {
        let mut state = self.lock();
        let reads = {
            let count = state.node_reads.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let ready_label = match state.delayed_labels.get(name) {
            Some(delayed) if reads >= delayed.after_reads => Some((delayed.key.clone(), delayed.value.clone())),
            _ => None,
        };
        let node = state
            .nodes
            .get_mut(name)
            .ok_or_else(|| ControllerError::NotFound(format!("Node {}", name)))?;
        if let Some((k, v)) = ready_label {
            node.metadata.labels.get_or_insert_with(BTreeMap::new).insert(k, v);
        }
        Ok(node.clone())
    }

    async fn set_node_annotation(&self, node: &str, annotation: &str, value: Option<&str>) -> Result<(), ControllerError> {
        let mut state = self.lock();
        let node = state
            .nodes
            .get_mut(node)
            .ok_or_else(|| ControllerError::NotFound(format!("Node {}", node)))?;
        let annotations = node.metadata.annotations.get_or_insert_with(BTreeMap::new);
        match value {
            Some(v) => {
                annotations.insert(annotation.to_string(), v.to_string());
            }
            None => {
                annotations.remove(annotation);
            }
        }
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        Ok(self.secret(namespace, name))
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), ControllerError> {
        let (namespace, name) = meta_key(&secret.metadata)?;
        let mut state = self.lock();
        state.applied.push(format!("Secret/{}/{}", namespace, name));
        state.secrets.insert((namespace, name), secret.clone());
        Ok(())
    }

    async fn apply_bare_metal_host(&self, host: &BareMetalHost) -> Result<(), ControllerError> {
        let (namespace, name) = meta_key(&host.metadata)?;
        let mut state = self.lock();
        state.applied.push(format!("BareMetalHost/{}/{}", namespace, name));
        state.hosts.insert((namespace, name), host.clone());
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ControllerError> {
        Ok(self.lock().config_maps.get(&key(namespace, name)).cloned())
    }

    async fn apply_daemon_set(&self, daemon_set: &DaemonSet) -> Result<(), ControllerError> {
        let (namespace, name) = meta_key(&daemon_set.metadata)?;
        let mut state = self.lock();
        state.applied.push(format!("DaemonSet/{}/{}", namespace, name));
        state.daemon_sets.insert((namespace, name), daemon_set.clone());
        Ok(())
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, ControllerError> {
        let state = self.lock();
        Ok(state.daemon_sets.get(&key(namespace, name)).cloned().map(|mut ds| {
            if let Some(status) = &state.daemon_set_status {
                ds.status = Some(status.clone());
            }
            ds
        }))
    }

    async fn delete_daemon_set(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let mut state = self.lock();
        state.daemon_sets.remove(&key(namespace, name));
        state.deleted_daemon_sets.push(format!("{}/{}", namespace, name));
        Ok(())
    }

    async fn patch_fleet_status(
        &self,
        _namespace: &str,
        _name: &str,
        status: &VirtualFleetStatus,
    ) -> Result<(), ControllerError> {
        self.lock().statuses.push(status.clone());
        Ok(())
    }
}
