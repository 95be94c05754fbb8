//! IPPool CRD
//!
//! Persistent record of one subnet managed by the IPAM engine: the ranges
//! addresses may be drawn from, the MAC counter, and every allocation made so far.
//! One IPPool exists per subnet CIDR; its name is derived from the CIDR.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "IPPool",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IPPoolSpec {
    /// Subnet CIDR (IPv4 or IPv6), e.g. "10.0.1.0/24"
    pub subnet: String,

    /// Ranges within the subnet from which addresses may be allocated
    #[serde(default)]
    pub ranges: Vec<Range>,

    /// Addresses already handed out, in allocation order
    #[serde(default, rename = "allocatedIPs")]
    pub allocated_ips: Vec<AllocatedIP>,

    /// MAC prefix for hosts in this subnet; immutable once the pool exists
    pub mac_prefix: String,

    /// Next MAC address (in sequence) to hand out in this subnet
    #[serde(rename = "nextMAC")]
    pub next_mac: String,
}

/// Inclusive address bounds within a subnet
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash)]
pub struct Range {
    /// First allocatable address
    pub start: String,

    /// Last allocatable address
    pub stop: String,
}

impl Range {
    /// Build a range without validating its bounds
    pub fn new(start: impl Into<String>, stop: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            stop: stop.into(),
        }
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.start, self.stop)
    }
}

/// An IP and MAC bound to an owner key
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedIP {
    /// Allocated IP address
    pub ip: String,

    /// Allocated MAC address
    pub mac: String,

    /// Owner key of the requester, e.g. "host-name/interface"
    pub allocated_to: String,
}

impl IPPoolSpec {
    /// Find the allocation held by `owner`, if any
    pub fn allocation_for(&self, owner: &str) -> Option<&AllocatedIP> {
        self.allocated_ips.iter().find(|a| a.allocated_to == owner)
    }

    /// True if an identical range is already registered
    pub fn has_range(&self, range: &Range) -> bool {
        self.ranges.iter().any(|r| r == range)
    }
}
