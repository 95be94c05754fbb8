//! Allocation engine
//!
//! Every operation is a read-decide-write cycle over a single subnet record.
//! The decision is a pure function of the record as read, so when the write
//! loses an optimistic-concurrency race the engine re-reads and decides again
//! against the fresh copy, up to a bounded number of attempts.

use crate::address::{format_mac, int_to_ip, ip_to_int, parse_mac, validate_range, AddressFamily};
use crate::error::{IpamError, StoreError};
use crate::store::{StoredSubnet, SubnetStore};
use crds::{AllocatedIP, IPPoolSpec, Range};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Write attempts per operation before giving up on a contended subnet
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// An (IP, MAC) pair bound to one owner key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub ip: String,
    pub mac: String,
}

/// What a planning step decided
#[derive(Debug)]
pub(crate) enum Outcome<T> {
    /// Nothing to persist
    Unchanged(T),
    /// Persist this record, then report the value
    Write(StoredSubnet, T),
}

/// IPAM engine over an injected subnet store
pub struct Ipam {
    store: Box<dyn SubnetStore>,
    max_attempts: u32,
}

impl std::fmt::Debug for Ipam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ipam").field("max_attempts", &self.max_attempts).finish_non_exhaustive()
    }
}

impl Ipam {
    pub fn new(store: Box<dyn SubnetStore>) -> Self {
        Self::with_conflict_retries(store, DEFAULT_CONFLICT_RETRIES)
    }

    /// `attempts` of zero is treated as one
    pub fn with_conflict_retries(store: Box<dyn SubnetStore>, attempts: u32) -> Self {
        Self {
            store,
            max_attempts: attempts.max(1),
        }
    }

    /// Register `range` on `subnet`, creating the subnet with `mac_prefix` if needed.
    ///
    /// Registering an identical range again is a no-op. A different range is
    /// appended. A range with an unparsable bound or stop < start is
    /// `SubnetRangeInvalid`. A MAC prefix different from the stored one is
    /// `NotSupported`.
    pub async fn register_range(&self, subnet: &str, range: &Range, mac_prefix: &str) -> Result<(), IpamError> {
        self.apply(subnet, |current| plan_register(current, subnet, range, mac_prefix))
            .await
    }

    /// Allocate an (IP, MAC) pair from `range` for `owner`.
    ///
    /// Idempotent per owner: if `owner` already holds an allocation in this
    /// subnet it is returned unchanged and nothing is written.
    pub async fn allocate(&self, subnet: &str, range: &Range, owner: &str) -> Result<Allocation, IpamError> {
        self.apply(subnet, |current| plan_allocate(current, subnet, range, owner))
            .await
    }

    async fn load(&self, subnet: &str) -> Result<Option<StoredSubnet>, IpamError> {
        let subnets = self.store.list_subnets().await?;
        Ok(subnets.into_iter().find(|s| s.spec.subnet == subnet))
    }

    async fn apply<T, F>(&self, subnet: &str, mut plan: F) -> Result<T, IpamError>
    where
        T: Send,
        F: FnMut(Option<StoredSubnet>) -> Result<Outcome<T>, IpamError> + Send,
    {
        for attempt in 1..=self.max_attempts {
            let current = self.load(subnet).await?;
            match plan(current)? {
                Outcome::Unchanged(value) => return Ok(value),
                Outcome::Write(record, value) => match self.store.upsert_subnet(&record).await {
                    Ok(()) => return Ok(value),
                    Err(StoreError::Conflict(name)) => {
                        warn!(
                            "IPAM write conflict on {} (attempt {}/{}), re-reading subnet {}",
                            name, attempt, self.max_attempts, subnet
                        );
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
        Err(IpamError::ConflictRetriesExhausted {
            subnet: subnet.to_string(),
            attempts: self.max_attempts,
        })
    }
}

pub(crate) fn plan_register(
    current: Option<StoredSubnet>,
    subnet: &str,
    range: &Range,
    mac_prefix: &str,
) -> Result<Outcome<()>, IpamError> {
    validate_range(range)?;
    let prefix = parse_mac(mac_prefix)?;

    let Some(mut record) = current else {
        info!("IPAM creating subnet {} with range {}", subnet, range);
        let spec = IPPoolSpec {
            subnet: subnet.to_string(),
            ranges: vec![range.clone()],
            allocated_ips: Vec::new(),
            mac_prefix: mac_prefix.to_string(),
            next_mac: mac_prefix.to_string(),
        };
        return Ok(Outcome::Write(StoredSubnet::new(spec), ()));
    };

    if parse_mac(&record.spec.mac_prefix).ok() != Some(prefix) {
        return Err(IpamError::NotSupported {
            message: format!(
                "Cannot change immutable field `macPrefix` of subnet {} from {} to {}",
                subnet, record.spec.mac_prefix, mac_prefix
            ),
        });
    }

    if record.spec.has_range(range) {
        debug!("IPAM range {} already registered in subnet {}", range, subnet);
        return Ok(Outcome::Unchanged(()));
    }

    info!("IPAM adding range {} to subnet {}", range, subnet);
    record.spec.ranges.push(range.clone());
    Ok(Outcome::Write(record, ()))
}

pub(crate) fn plan_allocate(
    current: Option<StoredSubnet>,
    subnet: &str,
    range: &Range,
    owner: &str,
) -> Result<Outcome<Allocation>, IpamError> {
    validate_range(range)?;
    let Some(mut record) = current else {
        return Err(IpamError::SubnetNotAllocated {
            subnet: subnet.to_string(),
        });
    };

    if !record.spec.has_range(range) {
        return Err(IpamError::SubnetRangeNotAllocated {
            subnet: subnet.to_string(),
            range: range.clone(),
        });
    }

    if let Some(existing) = record.spec.allocation_for(owner) {
        debug!("IPAM owner {} already holds {} in subnet {}", owner, existing.ip, subnet);
        return Ok(Outcome::Unchanged(Allocation {
            ip: existing.ip.clone(),
            mac: existing.mac.clone(),
        }));
    }

    let free = find_free_ip(&record.spec, range)?;
    let ip = int_to_ip(free, AddressFamily::of_subnet(subnet))?;

    let next = parse_mac(&record.spec.next_mac)?;
    let mac = format_mac(next);
    record.spec.next_mac = format_mac(next.wrapping_add(1));

    info!("IPAM allocating {} / {} in subnet {} to {}", ip, mac, subnet, owner);
    record.spec.allocated_ips.push(AllocatedIP {
        ip: ip.clone(),
        mac: mac.clone(),
        allocated_to: owner.to_string(),
    });
    Ok(Outcome::Write(record, Allocation { ip, mac }))
}

/// Lowest address in `range` not allocated anywhere in the subnet
fn find_free_ip(spec: &IPPoolSpec, range: &Range) -> Result<u64, IpamError> {
    let taken = spec
        .allocated_ips
        .iter()
        .map(|a| ip_to_int(&a.ip))
        .collect::<Result<HashSet<u64>, _>>()?;

    let start = ip_to_int(&range.start)?;
    let stop = ip_to_int(&range.stop)?;

    let mut candidate = start;
    while candidate <= stop {
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
        match candidate.checked_add(1) {
            Some(next) => candidate = next,
            None => break,
        }
    }

    Err(IpamError::SubnetRangeExhausted {
        subnet: spec.subnet.clone(),
        range: range.clone(),
    })
}
