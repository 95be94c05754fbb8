//! BareMetalHost
//!
//! Subset of the metal3 `BareMetalHost` resource written by the fleet
//! controller. Only the fields the controller sets are modeled; the CRD itself
//! is owned and installed by metal3.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Root device used when a role does not name one
pub const DEFAULT_ROOT_DEVICE: &str = "/dev/sda";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(group = "metal3.io", version = "v1alpha1", kind = "BareMetalHost", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalHostSpec {
    pub online: bool,

    pub bmc: BmcDetails,

    #[serde(rename = "bootMACAddress")]
    pub boot_mac_address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_data: Option<SecretReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_device_hints: Option<RootDeviceHints>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BmcDetails {
    /// Redfish endpoint, e.g. redfish+http://10.0.0.5:8000/redfish/v1/Systems/worker-0
    pub address: String,

    /// Secret holding "username" and "password"
    pub credentials_name: String,

    #[serde(default)]
    pub disable_certificate_verification: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct SecretReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RootDeviceHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}
