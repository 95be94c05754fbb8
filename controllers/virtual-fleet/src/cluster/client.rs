//! `ClusterClientTrait` over the Kubernetes API.

use super::ClusterClientTrait;
use crate::error::ControllerError;
use crds::{BareMetalHost, VirtualFleet, VirtualFleetStatus};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod, Secret};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::{debug, info};

/// Kubernetes-backed cluster client
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

fn object_name<K: Resource<DynamicType = ()>>(obj: &K) -> Result<(String, String), ControllerError> {
    let meta = obj.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| ControllerError::InvalidConfig(format!("{} is missing a name", K::kind(&()))))?;
    let namespace = meta.namespace.clone().ok_or_else(|| {
        ControllerError::InvalidConfig(format!("{} {} is missing a namespace", K::kind(&()), name))
    })?;
    Ok((namespace, name))
}

/// Create the object if it does not exist, merge-patch it otherwise
async fn create_or_patch<K>(api: &Api<K>, name: &str, obj: &K) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
{
    match api.get_opt(name).await? {
        None => {
            api.create(&PostParams::default(), obj).await?;
            info!("Created {} {}", K::kind(&()), name);
        }
        Some(_) => {
            api.patch(name, &PatchParams::default(), &Patch::Merge(obj)).await?;
            debug!("Patched {} {}", K::kind(&()), name);
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ControllerError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(pods.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node, ControllerError> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn set_node_annotation(&self, node: &str, key: &str, value: Option<&str>) -> Result<(), ControllerError> {
        let api: Api<Node> = Api::all(self.client.clone());
        // merge patch: null removes the key
        let patch = json!({
            "metadata": {
                "annotations": {
                    key: value,
                }
            }
        });
        api.patch(node, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), ControllerError> {
        let (namespace, name) = object_name(secret)?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        create_or_patch(&api, &name, secret).await
    }

    async fn apply_bare_metal_host(&self, host: &BareMetalHost) -> Result<(), ControllerError> {
        let (namespace, name) = object_name(host)?;
        let api: Api<BareMetalHost> = Api::namespaced(self.client.clone(), &namespace);
        create_or_patch(&api, &name, host).await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ControllerError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply_daemon_set(&self, daemon_set: &DaemonSet) -> Result<(), ControllerError> {
        let (namespace, name) = object_name(daemon_set)?;
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &namespace);
        create_or_patch(&api, &name, daemon_set).await
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, ControllerError> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn delete_daemon_set(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("Deleted DaemonSet {}/{}", namespace, name);
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!("DaemonSet {}/{} already gone", namespace, name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_fleet_status(
        &self,
        namespace: &str,
        name: &str,
        status: &VirtualFleetStatus,
    ) -> Result<(), ControllerError> {
        let api: Api<VirtualFleet> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = json!({
            "status": status
        });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch))
            .await?;
        Ok(())
    }
}
