//! Controller configuration.
//!
//! All settings come from environment variables. Parsing goes through a lookup
//! function so tests can feed values without touching the process environment.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::time::Duration;

/// Runtime settings for the VirtualFleet controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace holding the fleet agent, IPPools, BareMetalHosts and generated secrets
    pub runtime_namespace: String,
    /// Restrict VirtualFleet watching to one namespace (all namespaces if unset)
    pub watch_namespace: Option<String>,
    pub bridge_discovery_timeout: Duration,
    pub agent_scheduled_timeout: Duration,
    pub agent_ready_timeout: Duration,
    pub poll_interval: Duration,
    /// How long a successful pass stays current before the fleet is re-run
    pub resync_interval: Duration,
    /// Subnet write attempts before an allocation gives up on contention
    pub ipam_conflict_retries: u32,
    /// Listen address for probes and metrics
    pub metrics_addr: SocketAddr,
}

impl ControllerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let runtime_namespace = lookup("RUNTIME_NAMESPACE")
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig("RUNTIME_NAMESPACE environment variable is required".to_string())
            })?;
        let watch_namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty());

        let poll_interval = seconds(&lookup, "POLL_INTERVAL_SECS", 10)?;
        if poll_interval.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "POLL_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        let ipam_conflict_retries = match lookup("IPAM_CONFLICT_RETRIES") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| {
                ControllerError::InvalidConfig(format!("IPAM_CONFLICT_RETRIES={}: {}", raw, e))
            })?,
            None => ipam::DEFAULT_CONFLICT_RETRIES,
        };

        let metrics_addr = match lookup("METRICS_ADDR") {
            Some(raw) => raw
                .trim()
                .parse::<SocketAddr>()
                .map_err(|e| ControllerError::InvalidConfig(format!("METRICS_ADDR={}: {}", raw, e)))?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        Ok(Self {
            runtime_namespace,
            watch_namespace,
            bridge_discovery_timeout: seconds(&lookup, "BRIDGE_DISCOVERY_TIMEOUT_SECS", 30)?,
            agent_scheduled_timeout: seconds(&lookup, "AGENT_SCHEDULED_TIMEOUT_SECS", 180)?,
            agent_ready_timeout: seconds(&lookup, "AGENT_READY_TIMEOUT_SECS", 180)?,
            poll_interval,
            resync_interval: seconds(&lookup, "RESYNC_INTERVAL_SECS", 600)?,
            ipam_conflict_retries,
            metrics_addr,
        })
    }
}

fn seconds<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ControllerError::InvalidConfig(format!("{}={}: {}", key, raw, e))),
        None => Ok(Duration::from_secs(default)),
    }
}
