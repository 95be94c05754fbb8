//! Reconciliation logic for VirtualFleet CRDs.
//!
//! One pass per fleet, in phase order:
//! - `agent-deployed`: render and apply the fleet agent DaemonSet
//! - `networks-requested`: allocate addresses and publish node manifests
//! - `agent-scheduled`: wait for every agent pod to be scheduled
//! - `agent-ready`: wait for every agent pod to be ready
//! - `hosts-committed`: write network-data secrets, credentials and BareMetalHosts
//!
//! Any failure ends the pass with a not-ready condition and is requeued by the
//! watcher.

pub mod agent;
pub mod phases;

use crate::backoff::FibonacciBackoff;
use crate::cluster::ClusterClientTrait;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::poll::wait_until;
use crate::provisioner::{Provisioner, fleet_key};
use chrono::Utc;
use crds::{
    CONDITION_TYPE_AGENT_READY, CONDITION_TYPE_READY, Condition, ConditionStatus, REASON_PROGRESSING,
    REASON_RECONCILIATION_FAILED, REASON_RECONCILIATION_SUCCEEDED, VirtualFleet, VirtualFleetStatus, find_condition,
    set_condition,
};
use ipam::Ipam;
use k8s_openapi::api::apps::v1::DaemonSet;
use phases::{Phase, PhaseError, at};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10), // 1 minute min, 10 minutes max
            error_count: 0,
        }
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles VirtualFleet resources.
pub struct Reconciler {
    pub(crate) cluster: Box<dyn ClusterClientTrait + Send + Sync>,
    pub(crate) ipam: Ipam,
    pub(crate) config: ControllerConfig,
    pub(crate) metrics: Metrics,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("ipam", &self.ipam)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        cluster: Box<dyn ClusterClientTrait + Send + Sync>,
        ipam: Ipam,
        config: ControllerConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            cluster,
            ipam,
            config,
            metrics,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reconciles a VirtualFleet resource.
    ///
    /// A fleet whose Ready condition is already true for its current
    /// generation, and was reconciled within the resync interval, is left
    /// alone. This keeps the controller's own status patches from starting
    /// new passes.
    pub async fn reconcile_virtual_fleet(&self, fleet: &VirtualFleet) -> Result<(), ControllerError> {
        let (namespace, name) = fleet_key(fleet)?;
        let key = format!("{}/{}", namespace, name);
        let generation = fleet.metadata.generation;
        let mut status = fleet.status.clone().unwrap_or_default();

        if self.is_current(&status, generation) {
            debug!("VirtualFleet {} is ready for generation {:?}, skipping", key, generation);
            return Ok(());
        }

        info!("Reconciling VirtualFleet {}", key);

        let observed = find_condition(&status.conditions, CONDITION_TYPE_READY).map(|c| c.observed_generation);
        if observed != Some(generation) {
            set_condition(
                &mut status.conditions,
                Condition::new(
                    CONDITION_TYPE_READY,
                    ConditionStatus::False,
                    REASON_PROGRESSING,
                    format!("Reconciling generation {}", generation.unwrap_or_default()),
                    generation,
                ),
            );
            self.cluster.patch_fleet_status(namespace, name, &status).await?;
        }

        match self.run_phases(fleet, &mut status, generation).await {
            Ok(hosts) => {
                set_condition(
                    &mut status.conditions,
                    Condition::new(
                        CONDITION_TYPE_READY,
                        ConditionStatus::True,
                        REASON_RECONCILIATION_SUCCEEDED,
                        format!("{} host(s) committed", hosts),
                        generation,
                    ),
                );
                status.hosts = Some(u32::try_from(hosts).unwrap_or(u32::MAX));
                status.last_reconciled = Some(Utc::now());
                self.cluster.patch_fleet_status(namespace, name, &status).await?;

                self.metrics.reconciliations.with_label_values(&["success"]).inc();
                self.reset_error(&key);
                info!("Successfully reconciled VirtualFleet {} ({} hosts)", key, hosts);
                Ok(())
            }
            Err(PhaseError { phase, error: err }) => {
                let message = format!("{} failed: {}", phase, err);
                error!("Failed to reconcile VirtualFleet {}: {}", key, message);

                for type_ in [CONDITION_TYPE_READY, CONDITION_TYPE_AGENT_READY] {
                    set_condition(
                        &mut status.conditions,
                        Condition::new(
                            type_,
                            ConditionStatus::False,
                            REASON_RECONCILIATION_FAILED,
                            message.clone(),
                            generation,
                        ),
                    );
                }
                if let Err(e) = self.cluster.patch_fleet_status(namespace, name, &status).await {
                    error!("Failed to update VirtualFleet {} error status: {}", key, e);
                }

                self.metrics.reconciliations.with_label_values(&["error"]).inc();
                self.metrics
                    .phase_failures
                    .with_label_values(&[phase.as_str(), err.kind()])
                    .inc();
                Err(err)
            }
        }
    }

    /// Tear down what a fleet put in the cluster, before its finalizer is removed.
    ///
    /// Allocation records are kept.
    pub async fn cleanup_virtual_fleet(&self, fleet: &VirtualFleet) -> Result<(), ControllerError> {
        let (namespace, name) = fleet_key(fleet)?;
        info!("Finalizing VirtualFleet {}/{}", namespace, name);

        self.provisioner().unpublish(fleet).await?;
        self.cluster
            .delete_daemon_set(&self.config.runtime_namespace, &agent::daemon_set_name(fleet)?)
            .await?;

        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(&format!("{}/{}", namespace, name));
        }
        Ok(())
    }

    fn provisioner(&self) -> Provisioner<'_> {
        Provisioner::new(self.cluster.as_ref(), &self.ipam, &self.config, &self.metrics)
    }

    fn is_current(&self, status: &VirtualFleetStatus, generation: Option<i64>) -> bool {
        let Some(ready) = find_condition(&status.conditions, CONDITION_TYPE_READY) else {
            return false;
        };
        if !ready.is_true() || ready.observed_generation != generation {
            return false;
        }
        match (status.last_reconciled, chrono::Duration::from_std(self.config.resync_interval)) {
            (Some(last), Ok(resync)) => Utc::now() - last < resync,
            _ => false,
        }
    }

    async fn run_phases(
        &self,
        fleet: &VirtualFleet,
        status: &mut VirtualFleetStatus,
        generation: Option<i64>,
    ) -> Result<usize, PhaseError> {
        let provisioner = self.provisioner();

        let ds_name = self.ensure_agent(fleet).await.map_err(at(Phase::AgentDeployed))?;

        info!("Requesting virtual machines from fleet agents");
        let pending = provisioner.plan(fleet).await.map_err(at(Phase::NetworksRequested))?;

        info!("Waiting for fleet agent {} to become scheduled", ds_name);
        self.wait_for_agent(&ds_name, "scheduled", self.config.agent_scheduled_timeout, agent::is_scheduled)
            .await
            .map_err(at(Phase::AgentScheduled))?;
        let scheduled = provisioner
            .agent_nodes(fleet)
            .await
            .map_err(at(Phase::AgentScheduled))?;
        let planned = pending.nodes();
        if scheduled != planned {
            warn!("Fleet agent nodes changed during the pass: planned {:?}, scheduled {:?}", planned, scheduled);
            return Err(PhaseError {
                phase: Phase::AgentScheduled,
                error: ControllerError::AgentSetChanged {
                    missing: planned.difference(&scheduled).cloned().collect(),
                    unplanned: scheduled.difference(&planned).cloned().collect(),
                },
            });
        }

        info!("Waiting for fleet agent {} to become ready", ds_name);
        self.wait_for_agent(&ds_name, "ready", self.config.agent_ready_timeout, agent::is_ready)
            .await
            .map_err(at(Phase::AgentReady))?;
        set_condition(
            &mut status.conditions,
            Condition::new(
                CONDITION_TYPE_AGENT_READY,
                ConditionStatus::True,
                REASON_RECONCILIATION_SUCCEEDED,
                "Fleet agent ready",
                generation,
            ),
        );

        info!("Creating BareMetalHosts");
        provisioner.commit(&pending).await.map_err(at(Phase::HostsCommitted))
    }

    async fn ensure_agent(&self, fleet: &VirtualFleet) -> Result<String, ControllerError> {
        let template = agent::load_template(self.cluster.as_ref(), &self.config.runtime_namespace, fleet).await?;
        let daemon_set = agent::decorate(template, fleet, &self.config.runtime_namespace)?;
        let name = agent::daemon_set_name(fleet)?;
        self.cluster.apply_daemon_set(&daemon_set).await?;
        debug!("Applied fleet agent DaemonSet {}/{}", self.config.runtime_namespace, name);
        Ok(name)
    }

    /// Poll the agent DaemonSet until `check` holds. Read errors are logged and polled through.
    async fn wait_for_agent(
        &self,
        name: &str,
        condition: &str,
        timeout: Duration,
        check: fn(&DaemonSet) -> bool,
    ) -> Result<(), ControllerError> {
        let namespace = self.config.runtime_namespace.as_str();
        let what = format!("fleet agent {}/{} {}", namespace, name, condition);
        wait_until(&what, timeout, self.config.poll_interval, || async move {
            match self.cluster.get_daemon_set(namespace, name).await {
                Ok(Some(ds)) => {
                    debug!("Fleet agent {}/{} status: {:?}", namespace, name, ds.status);
                    Ok(check(&ds).then_some(()))
                }
                Ok(None) => {
                    debug!("Fleet agent {}/{} not found yet", namespace, name);
                    Ok(None)
                }
                Err(e) => {
                    warn!("Error reading fleet agent {}/{} while waiting: {}", namespace, name, e);
                    Ok(None)
                }
            }
        })
        .await
    }

    /// Next Fibonacci backoff for a resource; bumps its error count
    pub fn next_backoff(&self, resource_key: &str) -> Duration {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                state.error_count += 1;
                let delay = state.backoff.next_backoff();
                debug!("Backoff for {}: {:?} after {} error(s)", resource_key, delay, state.error_count);
                delay
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                Duration::from_secs(60)
            }
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
