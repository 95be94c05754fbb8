//! VirtualFleet Controller
//!
//! Provisions fleets of virtual bare-metal hosts:
//! - VirtualFleet: declares networks, roles and replica counts per physical node
//! - IPPool: one record per subnet, holding ranges and (IP, MAC) allocations
//! - BareMetalHost: one per virtual host, committed once the fleet agent is ready
//!
//! The controller deploys the fleet agent, allocates addresses, hands each
//! physical node a manifest of the domains it must create and registers the
//! resulting hosts with metal3.

mod backoff;
mod cluster;
mod config;
mod controller;
mod error;
mod http;
mod metrics;
mod poll;
mod provisioner;
mod provisioner_test;
mod reconciler;
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube is built on rustls; pick the crypto provider before any client exists
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting VirtualFleet Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Runtime namespace: {}", config.runtime_namespace);
    info!(
        "  Watch namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  Poll interval: {:?}", config.poll_interval);
    info!("  Metrics address: {}", config.metrics_addr);

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
