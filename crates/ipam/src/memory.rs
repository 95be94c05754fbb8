//! In-memory SubnetStore for unit testing
//!
//! Behaves like the API server for the parts the engine relies on: every
//! write bumps a per-subnet version, and writes carrying a stale version (or
//! creating a subnet that exists) are rejected with a conflict.

use crate::address::subnet_resource_name;
use crate::error::StoreError;
use crate::store::{StoredSubnet, SubnetStore};
use crds::IPPoolSpec;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Interference = Box<dyn FnOnce(&mut IPPoolSpec) + Send>;

#[derive(Default)]
struct State {
    subnets: BTreeMap<String, (IPPoolSpec, u64)>,
    interference: HashMap<String, Interference>,
    writes: usize,
    conflicts: usize,
}

/// Mock SubnetStore for testing
#[derive(Clone, Default)]
pub struct MemorySubnetStore {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MemorySubnetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySubnetStore").finish_non_exhaustive()
    }
}

impl MemorySubnetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current record for a subnet CIDR
    pub fn get(&self, subnet: &str) -> Option<IPPoolSpec> {
        self.lock()
            .subnets
            .get(&subnet_resource_name(subnet))
            .map(|(spec, _)| spec.clone())
    }

    /// Seed a subnet directly (for test setup)
    pub fn insert(&self, spec: IPPoolSpec) {
        let name = subnet_resource_name(&spec.subnet);
        let mut state = self.lock();
        let version = state.subnets.get(&name).map_or(1, |(_, v)| v + 1);
        state.subnets.insert(name, (spec, version));
    }

    /// Number of successful writes so far
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Number of writes rejected as conflicts so far
    pub fn conflicts(&self) -> usize {
        self.lock().conflicts
    }

    /// Simulate another writer: just before the next upsert of `subnet`, apply
    /// `change` to the stored record and bump its version.
    pub fn interfere_before_next_upsert<F>(&self, subnet: &str, change: F)
    where
        F: FnOnce(&mut IPPoolSpec) + Send + 'static,
    {
        self.lock()
            .interference
            .insert(subnet_resource_name(subnet), Box::new(change));
    }
}

#[async_trait::async_trait]
impl SubnetStore for MemorySubnetStore {
    async fn list_subnets(&self) -> Result<Vec<StoredSubnet>, StoreError> {
        Ok(self
            .lock()
            .subnets
            .values()
            .map(|(spec, version)| StoredSubnet {
                spec: spec.clone(),
                resource_version: Some(version.to_string()),
            })
            .collect())
    }

    async fn upsert_subnet(&self, subnet: &StoredSubnet) -> Result<(), StoreError> {
        let name = subnet_resource_name(&subnet.spec.subnet);
        let mut state = self.lock();

        if let Some(change) = state.interference.remove(&name) {
            if let Some((spec, version)) = state.subnets.get_mut(&name) {
                change(spec);
                *version += 1;
            }
        }

        let current = state.subnets.get(&name).map(|(_, v)| v.to_string());
        if current != subnet.resource_version {
            state.conflicts += 1;
            return Err(StoreError::Conflict(name));
        }

        let next = current.as_deref().and_then(|v| v.parse::<u64>().ok()).map_or(1, |v| v + 1);
        state.subnets.insert(name, (subnet.spec.clone(), next));
        state.writes += 1;
        Ok(())
    }
}
