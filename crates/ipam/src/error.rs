//! IPAM errors

use crds::Range;
use thiserror::Error;

/// Errors returned by the allocation engine
///
/// Everything except `Store` and `ConflictRetriesExhausted` is a validation
/// failure that retrying with the same input will not fix.
#[derive(Debug, Error)]
pub enum IpamError {
    /// The subnet has never been registered
    #[error("IPAM subnet {subnet} not allocated")]
    SubnetNotAllocated { subnet: String },

    /// A range bound is unparsable or stop < start
    #[error("IPAM range {range} is invalid")]
    SubnetRangeInvalid { range: Range },

    /// The range collides with one already registered on the subnet
    #[error("IPAM range {range} in subnet {subnet} overlaps with an existing range")]
    SubnetRangeOverlapsExisting { subnet: String, range: Range },

    /// The subnet exists but this exact range was never registered on it
    #[error("IPAM range {range} in subnet {subnet} is not allocated")]
    SubnetRangeNotAllocated { subnet: String, range: Range },

    /// Every address in the range is already allocated
    #[error("IPAM range {range} in subnet {subnet} is exhausted")]
    SubnetRangeExhausted { subnet: String, range: Range },

    #[error("IP address {ip} is invalid")]
    InvalidIPAddress { ip: String },

    #[error("MAC address {mac} is invalid")]
    InvalidMACAddress { mac: String },

    /// Unsupported input, such as changing an immutable field
    #[error("{message}")]
    NotSupported { message: String },

    /// Persistence failure
    #[error("IPAM store error: {0}")]
    Store(#[from] StoreError),

    /// Writes kept losing the optimistic-concurrency race
    #[error("IPAM subnet {subnet} still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted { subnet: String, attempts: u32 },
}

/// Errors from a [`crate::SubnetStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The record changed since it was read
    #[error("Conflict writing {0}: resource version is stale")]
    Conflict(String),
}

impl IpamError {
    /// True for failures a later attempt may get past without any input change
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IpamError::Store(_) | IpamError::ConflictRetriesExhausted { .. }
        )
    }
}
