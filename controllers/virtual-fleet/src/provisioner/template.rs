//! Network-data rendering.
//!
//! The template is a Tera template taken from the role's network-data secret.
//! It sees the values below under their camelCase names, for example
//! `{{ hostName }}`, `{{ role.name }}` and
//! `{% for iface in interfaces %}{{ iface.ipAddress }}{% endfor %}`.

use crate::error::ControllerError;
use crds::{Network, NetworkInterface, NodeSet};
use serde::Serialize;
use tera::{Context, Tera};

/// Key in the network-data template secret holding the template source
pub const TEMPLATE_KEY: &str = "template";

/// Key in the generated secret holding the rendered payload
pub const NETWORK_DATA_KEY: &str = "networkData";

/// Everything a network-data template can reference
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDataValues<'a> {
    pub host_name: &'a str,
    /// Physical node hosting the domain
    pub node: &'a str,
    pub role: &'a NodeSet,
    pub networks: &'a [Network],
    #[serde(rename = "bootMACAddress")]
    pub boot_mac_address: &'a str,
    pub interfaces: Vec<InterfaceValues<'a>>,
}

/// A role interface plus its allocated addresses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceValues<'a> {
    #[serde(flatten)]
    pub interface: &'a NetworkInterface,
    pub ip_address: String,
    pub mac_address: String,
}

/// Render a network-data template. Parse and render failures are both errors.
pub fn render_network_data(template: &str, values: &NetworkDataValues<'_>) -> Result<String, ControllerError> {
    let context = Context::from_serialize(values)?;
    Ok(Tera::one_off(template, &context, false)?)
}
