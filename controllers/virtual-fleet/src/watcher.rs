//! Kubernetes resource watchers.
//!
//! VirtualFleets are watched through `kube_runtime::Controller`, which handles
//! reconnection, per-object serialization and requeues. Reconciliation runs
//! behind the fleet finalizer so deletions get a cleanup pass.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::VirtualFleet;
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::finalizer::{Error as FinalizerError, Event as FinalizerEvent, finalizer};
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Finalizer held on every VirtualFleet until its cleanup has run
pub const FLEET_FINALIZER: &str = "dcops.microscaler.io/virtual-fleet";

/// Unwrap the finalizer helper's error back into ours
fn from_finalizer_error(err: FinalizerError<ControllerError>) -> ControllerError {
    match err {
        FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => e,
        other => ControllerError::Finalizer(other.to_string()),
    }
}

/// Requeue delay after a failed pass
///
/// Transient failures come back after one poll interval; configuration
/// failures walk the resource's Fibonacci backoff.
pub(crate) fn requeue_after(reconciler: &Reconciler, resource_key: &str, error: &ControllerError) -> Duration {
    if error.is_retryable() {
        reconciler.config.poll_interval
    } else {
        reconciler.next_backoff(resource_key)
    }
}

/// Watches VirtualFleet resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
    fleet_api: Api<VirtualFleet>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, client: Client, fleet_api: Api<VirtualFleet>) -> Self {
        Self {
            reconciler,
            client,
            fleet_api,
        }
    }

    /// Starts watching VirtualFleet resources. Runs until the stream ends.
    pub async fn watch_virtual_fleets(&self) -> Result<(), ControllerError> {
        info!("Starting VirtualFleet watcher");

        let client = self.client.clone();
        let reconcile = move |fleet: Arc<VirtualFleet>, ctx: Arc<Reconciler>| {
            let client = client.clone();
            async move {
                let namespace = fleet.namespace().unwrap_or_else(|| "default".to_string());
                let api: Api<VirtualFleet> = Api::namespaced(client, &namespace);
                debug!("Reconciling VirtualFleet {}/{}", namespace, fleet.name_any());

                finalizer(&api, FLEET_FINALIZER, fleet, |event| async move {
                    match event {
                        FinalizerEvent::Apply(fleet) => {
                            ctx.reconcile_virtual_fleet(&fleet).await?;
                            Ok::<Action, ControllerError>(Action::requeue(ctx.config.resync_interval))
                        }
                        FinalizerEvent::Cleanup(fleet) => {
                            ctx.cleanup_virtual_fleet(&fleet).await?;
                            Ok(Action::await_change())
                        }
                    }
                })
                .await
                .map_err(from_finalizer_error)
            }
        };

        let error_policy = |fleet: Arc<VirtualFleet>, error: &ControllerError, ctx: Arc<Reconciler>| {
            let key = format!(
                "{}/{}",
                fleet.namespace().unwrap_or_else(|| "default".to_string()),
                fleet.name_any()
            );
            let delay = requeue_after(&ctx, &key, error);
            warn!("Reconciliation error for VirtualFleet {}: {} (requeue in {:?})", key, error, delay);
            Action::requeue(delay)
        };

        // Debounce batches bursts of events (including our own status patches)
        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(5))
            .concurrency(3);

        Controller::new(self.fleet_api.clone(), watcher::Config::default())
            .with_config(controller_config)
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled VirtualFleet {}", obj.name),
                    Err(e) => error!("Controller error for VirtualFleet: {}", e),
                }
            })
            .await;

        Ok(())
    }
}
