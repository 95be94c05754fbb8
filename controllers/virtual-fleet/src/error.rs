//! Controller-specific error types.
//!
//! This module defines error types specific to the VirtualFleet controller
//! that are not covered by upstream library errors.

use ipam::IpamError;
use kube::Error as KubeError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the VirtualFleet controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Address allocation error
    #[error("{0}")]
    Ipam(#[from] IpamError),

    /// Network-data template failed to parse or render
    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An interface names a network the fleet does not declare
    #[error("Interface {interface} doesn't have a matching network {network} defined")]
    NetworkNotFound { interface: String, network: String },

    /// Physical node without an InternalIP address
    #[error("Node {node} doesn't have internal ip address defined")]
    NodeAddressMissing { node: String },

    /// Referenced object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A bounded wait ran out of time
    #[error("Timed out after {}s waiting for {what}", timeout.as_secs())]
    DeadlineExceeded { what: String, timeout: Duration },

    /// No fleet agent pod is running yet
    #[error("No fleet agent pods scheduled for {0}")]
    NoAgentsScheduled(String),

    /// Nodes were planned against a different agent set than the one now scheduled
    #[error(
        "Fleet agent set changed: planned but not scheduled [{}], scheduled but not planned [{}]",
        missing.join(", "),
        unplanned.join(", ")
    )]
    AgentSetChanged { missing: Vec<String>, unplanned: Vec<String> },

    /// Finalizer bookkeeping failed
    #[error("Finalizer error: {0}")]
    Finalizer(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe/metrics server I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// True when a quick retry may succeed without any change to the fleet or
    /// its referenced objects.
    ///
    /// Everything else is treated as configuration trouble and requeued on the
    /// slower Fibonacci backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            ControllerError::Kube(KubeError::Api(resp)) => resp.code != 404 && resp.code != 422,
            ControllerError::Kube(_) => true,
            ControllerError::Ipam(e) => e.is_transient(),
            ControllerError::DeadlineExceeded { .. }
            | ControllerError::NoAgentsScheduled(_)
            | ControllerError::AgentSetChanged { .. }
            | ControllerError::Finalizer(_)
            | ControllerError::Watch(_) => true,
            _ => false,
        }
    }

    /// Short label for the phase-failure metric
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::Kube(_) => "kube",
            ControllerError::Ipam(_) => "ipam",
            ControllerError::Template(_) => "template",
            ControllerError::Yaml(_) | ControllerError::Json(_) => "serialization",
            ControllerError::InvalidConfig(_)
            | ControllerError::NetworkNotFound { .. }
            | ControllerError::NodeAddressMissing { .. }
            | ControllerError::NotFound(_) => "config",
            ControllerError::DeadlineExceeded { .. } => "deadline",
            ControllerError::NoAgentsScheduled(_) | ControllerError::AgentSetChanged { .. } => "agent",
            ControllerError::Finalizer(_) | ControllerError::Watch(_) => "runtime",
            ControllerError::Metrics(_) | ControllerError::Io(_) => "server",
        }
    }
}
