//! Main controller implementation.
//!
//! Wires the cluster client, IPAM engine and reconciler together and runs the
//! VirtualFleet watcher next to the probe/metrics server.

use crate::cluster::KubeClusterClient;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::http;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::VirtualFleet;
use ipam::{Ipam, KubeSubnetStore};
use kube::{Api, Client};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for VirtualFleet management.
pub struct Controller {
    fleet_watcher: JoinHandle<Result<(), ControllerError>>,
    http_server: JoinHandle<Result<(), ControllerError>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing VirtualFleet Controller");

        let kube_client = Client::try_default().await?;

        let fleet_api: Api<VirtualFleet> = match config.watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };

        // Subnet records live next to the agent and the generated hosts
        let store = KubeSubnetStore::new(kube_client.clone(), config.runtime_namespace.clone());
        let ipam = Ipam::with_conflict_retries(Box::new(store), config.ipam_conflict_retries);

        let metrics = Metrics::new()?;
        let ready = Arc::new(AtomicBool::new(false));
        let metrics_addr = config.metrics_addr;

        let reconciler = Arc::new(Reconciler::new(
            Box::new(KubeClusterClient::new(kube_client.clone())),
            ipam,
            config,
            metrics.clone(),
        ));

        let watcher = Watcher::new(reconciler, kube_client, fleet_api);

        let http_state = http::AppState {
            metrics,
            ready: ready.clone(),
        };
        let http_server = tokio::spawn(async move { http::serve(metrics_addr, http_state).await });

        let fleet_watcher = tokio::spawn(async move {
            ready.store(true, Ordering::SeqCst);
            watcher.watch_virtual_fleets().await
        });

        Ok(Self {
            fleet_watcher,
            http_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("VirtualFleet Controller running");

        // Either task exiting ends the process
        tokio::select! {
            result = &mut self.fleet_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("VirtualFleet watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("VirtualFleet watcher error: {}", e)))?;
            }
            result = &mut self.http_server => {
                result.map_err(|e| ControllerError::Watch(format!("HTTP server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
