//! Kubernetes object references used by DCops CRDs
//!
//! Provides a namespaced reference for objects that a `VirtualFleet` points at
//! (network-data template secrets, agent template config maps, libvirt templates).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name and optional namespace of a referenced Kubernetes object
///
/// When `namespace` is omitted, the referencing controller decides which
/// namespace to look in (usually the namespace of the referencing resource).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedName {
    /// Name of the referenced object
    #[serde(default)]
    pub name: String,

    /// Namespace of the referenced object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl NamespacedName {
    /// Create a reference in the same namespace as the referencing resource
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Create a reference with an explicit namespace
    pub fn with_namespace(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// True when neither name nor namespace has been set
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.namespace.as_deref().is_none_or(str::is_empty)
    }

    /// Namespace of the reference, falling back to `default_namespace`
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => default_namespace,
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => write!(f, "{}/{}", ns, self.name),
            _ => write!(f, "{}", self.name),
        }
    }
}
