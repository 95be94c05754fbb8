//! Prometheus metrics for the VirtualFleet controller.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Controller metrics, registered on a private registry
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Reconciliation outcomes, labelled `result` = success | error
    pub reconciliations: IntCounterVec,
    /// Failed passes, labelled by the `phase` that failed and the error `kind`
    pub phase_failures: IntCounterVec,
    /// Address allocations requested from the IPAM engine
    pub allocations: IntCounter,
    /// BareMetalHosts applied during commit
    pub hosts_committed: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new("virtual_fleet_reconciliations_total", "VirtualFleet reconciliations by result"),
            &["result"],
        )?;
        let phase_failures = IntCounterVec::new(
            Opts::new("virtual_fleet_phase_failures_total", "VirtualFleet reconciliation failures by phase"),
            &["phase", "kind"],
        )?;
        let allocations = IntCounter::new(
            "virtual_fleet_ipam_allocations_total",
            "IP/MAC allocations requested by the provisioner",
        )?;
        let hosts_committed = IntCounter::new(
            "virtual_fleet_hosts_committed_total",
            "BareMetalHosts created or patched",
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(phase_failures.clone()))?;
        registry.register(Box::new(allocations.clone()))?;
        registry.register(Box::new(hosts_committed.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            phase_failures,
            allocations,
            hosts_committed,
        })
    }

    /// Text exposition format for the `/metrics` endpoint
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
