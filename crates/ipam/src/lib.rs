//! IPAM engine
//!
//! Registers subnets and address ranges and hands out (IP, MAC) pairs keyed by
//! an opaque owner key. State lives in one `IPPool` record per subnet, read and
//! written through a [`SubnetStore`].
//!
//! # Example
//!
//! ```no_run
//! use ipam::{Ipam, KubeSubnetStore, new_range};
//!
//! # async fn example(client: kube::Client) -> Result<(), ipam::IpamError> {
//! let ipam = Ipam::new(Box::new(KubeSubnetStore::new(client, "dcops-system")));
//! let range = new_range("10.0.1.10", "10.0.1.12")?;
//!
//! ipam.register_range("10.0.1.0/24", &range, "02:00:00:00:00:00").await?;
//! let allocation = ipam.allocate("10.0.1.0/24", &range, "host-0/eth0").await?;
//! println!("{} {}", allocation.ip, allocation.mac);
//! # Ok(())
//! # }
//! ```
//!
//! # Guarantees
//!
//! - Allocating twice for the same owner returns the same pair
//! - MACs only move forward and are never handed out twice
//! - A subnet's MAC prefix cannot change once the subnet exists
//! - IPv6 allocation works on the top 64 bits; returned addresses have a zero
//!   interface identifier

pub mod address;
pub mod engine;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod store;

pub use address::{new_range, subnet_resource_name, validate_range};
pub use engine::{Allocation, Ipam, DEFAULT_CONFLICT_RETRIES};
pub use error::{IpamError, StoreError};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemorySubnetStore;
pub use store::{KubeSubnetStore, StoredSubnet, SubnetStore};
