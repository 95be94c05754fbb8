//! Address and MAC codecs
//!
//! IPv4 addresses map to a u64 by zero-extending the four octets. IPv6
//! addresses map to their top eight octets (routing prefix and subnet ID); the
//! interface identifier is dropped and comes back as zero.
//!
//! MACs are parsed into a u64 (left-padded to eight bytes) so they can be
//! incremented, and rendered back from the low six bytes.

use crate::error::IpamError;
use crds::Range;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// MAC prefix used for networks that do not declare one
pub const DEFAULT_MAC_PREFIX: &str = "02:00:00:00:00:00";

/// Address family of a subnet, which decides how integers are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Family of a subnet CIDR string
    pub fn of_subnet(subnet: &str) -> Self {
        if subnet.contains(':') {
            AddressFamily::V6
        } else {
            AddressFamily::V4
        }
    }
}

/// Parse an IP address string into its integer position
pub fn ip_to_int(ip: &str) -> Result<u64, IpamError> {
    let parsed: IpAddr = ip.parse().map_err(|_| IpamError::InvalidIPAddress { ip: ip.to_string() })?;

    let value = match parsed {
        IpAddr::V4(v4) => u64::from(u32::from(v4)),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => u64::from(u32::from(v4)),
            None => {
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&v6.octets()[..8]);
                u64::from_be_bytes(prefix)
            }
        },
    };
    Ok(value)
}

/// Render an integer position as an address of the given family
///
/// Returns `InvalidIPAddress` when an IPv4 value does not fit in 32 bits.
pub fn int_to_ip(value: u64, family: AddressFamily) -> Result<String, IpamError> {
    match family {
        AddressFamily::V4 => {
            let v4 = u32::try_from(value).map_err(|_| IpamError::InvalidIPAddress { ip: value.to_string() })?;
            Ok(Ipv4Addr::from(v4).to_string())
        }
        AddressFamily::V6 => {
            let mut octets = [0u8; 16];
            octets[..8].copy_from_slice(&value.to_be_bytes());
            Ok(Ipv6Addr::from(octets).to_string())
        }
    }
}

/// Parse a 6- or 8-octet hardware address
///
/// Accepts octets separated by ':' or '-' (`02:00:00:00:00:00`) and
/// dot-separated groups of four hex digits (`0200.0000.0000`).
pub fn parse_mac(mac: &str) -> Result<u64, IpamError> {
    let invalid = || IpamError::InvalidMACAddress { mac: mac.to_string() };

    let (separator, group_len) = if mac.contains('.') {
        ('.', 4)
    } else if mac.contains('-') {
        ('-', 2)
    } else {
        (':', 2)
    };

    let mut octets = Vec::with_capacity(8);
    for group in mac.split(separator) {
        if group.len() != group_len || !group.is_ascii() {
            return Err(invalid());
        }
        for i in (0..group_len).step_by(2) {
            octets.push(u8::from_str_radix(&group[i..i + 2], 16).map_err(|_| invalid())?);
        }
    }

    if octets.len() != 6 && octets.len() != 8 {
        return Err(invalid());
    }

    let mut padded = [0u8; 8];
    padded[8 - octets.len()..].copy_from_slice(&octets);
    Ok(u64::from_be_bytes(padded))
}

/// Render the low six bytes of a MAC integer, lowercase and colon separated
pub fn format_mac(value: u64) -> String {
    let bytes = value.to_be_bytes();
    bytes[2..]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Build a range, checking both bounds parse and stop >= start
pub fn new_range(start: &str, stop: &str) -> Result<Range, IpamError> {
    let range = Range::new(start, stop);
    validate_range(&range)?;
    Ok(range)
}

/// Check an already-built range: both bounds parse and stop >= start
pub fn validate_range(range: &Range) -> Result<(), IpamError> {
    match (ip_to_int(&range.start), ip_to_int(&range.stop)) {
        (Ok(s), Ok(e)) if e >= s => Ok(()),
        _ => Err(IpamError::SubnetRangeInvalid { range: range.clone() }),
    }
}

/// Kubernetes-safe IPPool name for a subnet CIDR
pub fn subnet_resource_name(subnet: &str) -> String {
    let sanitized: String = subnet
        .chars()
        .map(|c| if matches!(c, ':' | '.' | '/') { '-' } else { c })
        .collect();
    format!("ippool-{sanitized}")
}
