//! Fleet agent DaemonSet.
//!
//! The agent is deployed from a DaemonSet manifest kept in a ConfigMap, then
//! pinned to the fleet's nodes and labelled so its pods can be told apart from
//! other fleets' agents.

use crate::cluster::ClusterClientTrait;
use crate::error::ControllerError;
use crate::provisioner::fleet_key;
use crds::{FLEET_NAME_LABEL, FLEET_NAMESPACE_LABEL, NamespacedName, VirtualFleet};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::EnvVar;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// ConfigMap used when the fleet does not name an agent template
pub const DEFAULT_AGENT_TEMPLATE: &str = "fleet-agent-template";

/// ConfigMap key holding the DaemonSet manifest
pub const AGENT_TEMPLATE_KEY: &str = "template";

pub const ENV_VM_BRIDGE_INTERFACE: &str = "VM_BRIDGE_INTERFACE";
pub const ENV_BASIC_AUTH_USERNAME: &str = "BASIC_AUTH_USERNAME";
pub const ENV_BASIC_AUTH_PASSWORD: &str = "BASIC_AUTH_PASSWORD";

/// `{namespace}-{name}` of the fleet
pub fn daemon_set_name(fleet: &VirtualFleet) -> Result<String, ControllerError> {
    let (namespace, name) = fleet_key(fleet)?;
    Ok(format!("{}-{}", namespace, name))
}

/// Selector and pod labels identifying this fleet's agents
pub fn selector_labels(fleet: &VirtualFleet) -> Result<BTreeMap<String, String>, ControllerError> {
    let (namespace, name) = fleet_key(fleet)?;
    Ok(BTreeMap::from([
        (FLEET_NAME_LABEL.to_string(), name.to_string()),
        (FLEET_NAMESPACE_LABEL.to_string(), namespace.to_string()),
    ]))
}

/// [`selector_labels`] as a `key=value,...` list selector
pub fn label_selector(fleet: &VirtualFleet) -> Result<String, ControllerError> {
    Ok(selector_labels(fleet)?
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(","))
}

/// Read the agent DaemonSet manifest referenced by the fleet
pub async fn load_template(
    cluster: &(dyn ClusterClientTrait + Send + Sync),
    runtime_namespace: &str,
    fleet: &VirtualFleet,
) -> Result<DaemonSet, ControllerError> {
    let reference = match &fleet.spec.agent_options.template {
        Some(reference) if !reference.is_empty() => reference.clone(),
        _ => {
            debug!("Using default fleet agent template {}", DEFAULT_AGENT_TEMPLATE);
            NamespacedName::new(DEFAULT_AGENT_TEMPLATE)
        }
    };
    let namespace = reference.namespace_or(runtime_namespace);

    let config_map = cluster
        .get_config_map(namespace, &reference.name)
        .await?
        .ok_or_else(|| ControllerError::NotFound(format!("fleet agent template {}/{}", namespace, reference.name)))?;
    let manifest = config_map
        .data
        .as_ref()
        .and_then(|data| data.get(AGENT_TEMPLATE_KEY))
        .ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "malformed fleet agent template {}/{}: data doesn't have key {}",
                namespace, reference.name, AGENT_TEMPLATE_KEY
            ))
        })?;

    Ok(serde_yaml::from_str(manifest)?)
}

/// Name, place, pin and label the agent DaemonSet for one fleet
pub fn decorate(
    mut daemon_set: DaemonSet,
    fleet: &VirtualFleet,
    runtime_namespace: &str,
) -> Result<DaemonSet, ControllerError> {
    let labels = selector_labels(fleet)?;

    daemon_set.metadata.name = Some(daemon_set_name(fleet)?);
    daemon_set.metadata.namespace = Some(runtime_namespace.to_string());
    daemon_set.status = None;

    let spec = daemon_set.spec.get_or_insert_with(Default::default);
    spec.selector
        .match_labels
        .get_or_insert_with(BTreeMap::new)
        .extend(labels.clone());
    spec.template
        .metadata
        .get_or_insert_with(Default::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(labels);

    let pod_spec = spec.template.spec.get_or_insert_with(Default::default);
    pod_spec.node_selector = fleet
        .spec
        .node_selector
        .as_ref()
        .map(|selector| selector.match_labels.clone());

    if !fleet.spec.vm_bridge.is_empty() {
        set_env(&mut daemon_set, ENV_VM_BRIDGE_INTERFACE, &fleet.spec.vm_bridge);
    }
    set_env(&mut daemon_set, ENV_BASIC_AUTH_USERNAME, &fleet.spec.bmc_credentials.username);
    set_env(&mut daemon_set, ENV_BASIC_AUTH_PASSWORD, &fleet.spec.bmc_credentials.password);

    Ok(daemon_set)
}

/// Set `name` on every container, overriding any existing value
pub fn set_env(daemon_set: &mut DaemonSet, name: &str, value: &str) {
    let containers = daemon_set
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .map(|pod| pod.containers.iter_mut());

    for container in containers.into_iter().flatten() {
        let env = container.env.get_or_insert_with(Vec::new);
        match env.iter_mut().find(|var| var.name == name) {
            Some(existing) => {
                if name != ENV_BASIC_AUTH_PASSWORD {
                    info!(
                        "Overriding {} on container {}: {:?} -> {}",
                        name,
                        container.name,
                        existing.value,
                        value
                    );
                }
                existing.value = Some(value.to_string());
                existing.value_from = None;
            }
            None => env.push(EnvVar {
                name: name.to_string(),
                value: Some(value.to_string()),
                ..Default::default()
            }),
        }
    }
}

/// Every desired agent pod has been scheduled
pub fn is_scheduled(daemon_set: &DaemonSet) -> bool {
    daemon_set
        .status
        .as_ref()
        .is_some_and(|s| s.desired_number_scheduled != 0 && s.desired_number_scheduled == s.current_number_scheduled)
}

/// Every desired agent pod is ready
pub fn is_ready(daemon_set: &DaemonSet) -> bool {
    daemon_set
        .status
        .as_ref()
        .is_some_and(|s| s.desired_number_scheduled != 0 && s.desired_number_scheduled == s.number_ready)
}
