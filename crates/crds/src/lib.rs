//! DCops CRD Definitions
//!
//! Kubernetes Custom Resource Definitions and hand-off types shared by the
//! virtual fleet controller and the IPAM engine.

pub mod bare_metal_host;
pub mod builder;
pub mod conditions;
pub mod ip_pool;
pub mod references;
pub mod virtual_fleet;

pub use bare_metal_host::*;
pub use builder::*;
pub use conditions::*;
pub use ip_pool::*;
pub use references::*;
pub use virtual_fleet::*;
