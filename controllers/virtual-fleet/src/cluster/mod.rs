//! Cluster access for the VirtualFleet controller.
//!
//! Everything the reconciler and provisioner read or write in the cluster goes
//! through [`ClusterClientTrait`], so both can be driven by
//! [`mock::MockClusterClient`] in unit tests.

pub mod client;
#[cfg(test)]
pub mod mock;

pub use client::KubeClusterClient;
#[cfg(test)]
pub use mock::MockClusterClient;

use crate::error::ControllerError;
use crds::{BareMetalHost, VirtualFleetStatus};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod, Secret};

/// Cluster operations needed by the controller
///
/// All methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// Pods in `namespace` matching a `key=value[,key=value]` selector
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ControllerError>;

    async fn get_node(&self, name: &str) -> Result<Node, ControllerError>;

    /// Set (`Some`) or remove (`None`) one annotation on a node
    async fn set_node_annotation(&self, node: &str, key: &str, value: Option<&str>) -> Result<(), ControllerError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError>;

    /// Create or patch a secret in its own namespace
    async fn apply_secret(&self, secret: &Secret) -> Result<(), ControllerError>;

    /// Create or patch a BareMetalHost in its own namespace
    async fn apply_bare_metal_host(&self, host: &BareMetalHost) -> Result<(), ControllerError>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ControllerError>;

    /// Create or patch a DaemonSet in its own namespace
    async fn apply_daemon_set(&self, daemon_set: &DaemonSet) -> Result<(), ControllerError>;

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, ControllerError>;

    /// Delete a DaemonSet; a missing one is not an error
    async fn delete_daemon_set(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    async fn patch_fleet_status(
        &self,
        namespace: &str,
        name: &str,
        status: &VirtualFleetStatus,
    ) -> Result<(), ControllerError>;
}
