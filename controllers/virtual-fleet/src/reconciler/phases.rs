//! Reconciliation phases.
//!
//! A pass walks the phases in declaration order and stops at the first
//! failure. The failed phase is reported in the Ready condition and labels the
//! phase-failure metric.

use crate::error::ControllerError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Agent DaemonSet rendered and applied
    AgentDeployed,
    /// Bridges discovered, addresses allocated, manifests published
    NetworksRequested,
    /// Every agent pod scheduled, on exactly the planned nodes
    AgentScheduled,
    /// Every agent pod ready
    AgentReady,
    /// Staged secrets and BareMetalHosts written
    HostsCommitted,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::AgentDeployed => "agent-deployed",
            Phase::NetworksRequested => "networks-requested",
            Phase::AgentScheduled => "agent-scheduled",
            Phase::AgentReady => "agent-ready",
            Phase::HostsCommitted => "hosts-committed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pass failure and where it happened
#[derive(Debug)]
pub struct PhaseError {
    pub phase: Phase,
    pub error: ControllerError,
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase {} failed: {}", self.phase, self.error)
    }
}

/// `map_err` adapter tagging an error with its phase
pub fn at(phase: Phase) -> impl FnOnce(ControllerError) -> PhaseError {
    move |error| PhaseError { phase, error }
}
