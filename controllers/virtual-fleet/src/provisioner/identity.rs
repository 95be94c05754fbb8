//! Deterministic names for provisioned hosts and their objects.

/// Interface name used as the owner suffix for boot MAC allocations
pub const BOOT_OWNER_SUFFIX: &str = "pxe-boot";

/// Port the fleet agent serves its Redfish emulator on
pub const REDFISH_PORT: u16 = 8000;

/// Name of one virtual host: `{namespace}-{fleet}-{node}-{role}-{index}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    name: String,
    role: String,
    role_suffix: String,
}

impl HostIdentity {
    pub fn new(namespace: &str, fleet: &str, node: &str, role: &str, index: u32) -> Self {
        let role_suffix = format!("{}-{}", role, index);
        Self {
            name: format!("{}-{}-{}-{}", namespace, fleet, node, role_suffix),
            role: role.to_string(),
            role_suffix,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// `{role}-{index}`, the domain name the agent uses on its node
    pub fn role_suffix(&self) -> &str {
        &self.role_suffix
    }

    /// IPAM owner key for one of this host's interfaces
    pub fn owner_key(&self, interface: &str) -> String {
        format!("{}/{}", self.name, interface)
    }

    pub fn network_data_secret_name(&self) -> String {
        format!("{}-network-data", self.name)
    }
}

/// One credentials secret per fleet
pub fn credentials_secret_name(namespace: &str, fleet: &str) -> String {
    format!("{}-{}-bmc-credentials", namespace, fleet)
}

/// Redfish endpoint of a domain served by the agent on a physical node
pub fn bmc_address(node_internal_ip: &str, role_suffix: &str) -> String {
    format!(
        "redfish+http://{}:{}/redfish/v1/Systems/{}",
        node_internal_ip, REDFISH_PORT, role_suffix
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_identity_names() {
        let identity = HostIdentity::new("lab", "fleet-a", "node-1", "worker", 2);
        assert_eq!(identity.name(), "lab-fleet-a-node-1-worker-2");
        assert_eq!(identity.role(), "worker");
        assert_eq!(identity.role_suffix(), "worker-2");
        assert_eq!(identity.owner_key("eth0"), "lab-fleet-a-node-1-worker-2/eth0");
        assert_eq!(identity.owner_key(BOOT_OWNER_SUFFIX), "lab-fleet-a-node-1-worker-2/pxe-boot");
        assert_eq!(identity.network_data_secret_name(), "lab-fleet-a-node-1-worker-2-network-data");
    }

    #[test]
    fn test_bmc_address_and_credentials() {
        assert_eq!(
            bmc_address("192.168.10.4", "master-0"),
            "redfish+http://192.168.10.4:8000/redfish/v1/Systems/master-0"
        );
        assert_eq!(credentials_secret_name("lab", "fleet-a"), "lab-fleet-a-bmc-credentials");
    }
}
