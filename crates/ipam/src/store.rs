//! Subnet persistence
//!
//! The engine reads every subnet in one go and writes one subnet back whole.
//! Writes carry the resource version they were read at, so a concurrent
//! writer surfaces as [`StoreError::Conflict`] instead of a lost update.

use crate::address::subnet_resource_name;
use crate::error::StoreError;
use crds::{IPPool, IPPoolSpec};
use kube::api::{ListParams, ObjectMeta, PostParams};
use kube::{Api, Client};
use tracing::{debug, info};

/// A subnet record plus the version it was read at
///
/// `resource_version` is `None` for a subnet that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSubnet {
    pub spec: IPPoolSpec,
    pub resource_version: Option<String>,
}

impl StoredSubnet {
    /// A subnet that does not exist in the store yet
    pub fn new(spec: IPPoolSpec) -> Self {
        Self {
            spec,
            resource_version: None,
        }
    }
}

/// Persistence port for subnet records
///
/// All methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait SubnetStore: Send + Sync {
    /// Every subnet in the store
    async fn list_subnets(&self) -> Result<Vec<StoredSubnet>, StoreError>;

    /// Create (no resource version) or replace (matching resource version) a subnet
    ///
    /// Returns `StoreError::Conflict` when the stored version moved on, or
    /// when creating a subnet that already exists.
    async fn upsert_subnet(&self, subnet: &StoredSubnet) -> Result<(), StoreError>;
}

/// `SubnetStore` backed by `IPPool` resources in one namespace
#[derive(Clone)]
pub struct KubeSubnetStore {
    api: Api<IPPool>,
    namespace: String,
}

impl KubeSubnetStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            api: Api::namespaced(client, &namespace),
            namespace,
        }
    }
}

impl std::fmt::Debug for KubeSubnetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSubnetStore").field("namespace", &self.namespace).finish()
    }
}

fn map_write_error(name: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ref resp) if resp.code == 409 => StoreError::Conflict(name.to_string()),
        other => StoreError::Kube(other),
    }
}

#[async_trait::async_trait]
impl SubnetStore for KubeSubnetStore {
    async fn list_subnets(&self) -> Result<Vec<StoredSubnet>, StoreError> {
        let pools = self.api.list(&ListParams::default()).await?;
        debug!("Listed {} IPPools in namespace {}", pools.items.len(), self.namespace);
        Ok(pools
            .items
            .into_iter()
            .map(|pool| StoredSubnet {
                resource_version: pool.metadata.resource_version,
                spec: pool.spec,
            })
            .collect())
    }

    async fn upsert_subnet(&self, subnet: &StoredSubnet) -> Result<(), StoreError> {
        let name = subnet_resource_name(&subnet.spec.subnet);
        let pool = IPPool {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: subnet.resource_version.clone(),
                ..Default::default()
            },
            spec: subnet.spec.clone(),
        };

        match &subnet.resource_version {
            None => {
                info!("Creating IPPool {}/{} for subnet {}", self.namespace, name, subnet.spec.subnet);
                self.api
                    .create(&PostParams::default(), &pool)
                    .await
                    .map_err(|e| map_write_error(&name, e))?;
            }
            Some(version) => {
                info!(
                    "Updating IPPool {}/{} for subnet {} (resourceVersion {})",
                    self.namespace, name, subnet.spec.subnet, version
                );
                self.api
                    .replace(&name, &PostParams::default(), &pool)
                    .await
                    .map_err(|e| map_write_error(&name, e))?;
            }
        }
        Ok(())
    }
}
