//! Namespace to tenant registry
//!
//! The controller's record of which tenant each namespace's configuration
//! was last pushed under. Individual operations are atomic; sequences of
//! operations on one namespace are serialized by the dispatcher, which
//! routes every event for a namespace through a single worker.

use dashmap::DashMap;
use tracing::debug;

/// Concurrent map of namespace name to tenant name
#[derive(Debug, Default)]
pub struct TenantRegistry {
    tenants: DashMap<String, String>,
}

impl TenantRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Tenant currently associated with a namespace
    pub fn get(&self, namespace: &str) -> Option<String> {
        self.tenants.get(namespace).map(|t| t.value().clone())
    }

    /// Associate a namespace with a tenant, returning the previous tenant
    pub fn set(&self, namespace: impl Into<String>, tenant: impl Into<String>) -> Option<String> {
        let namespace = namespace.into();
        let tenant = tenant.into();
        debug!(namespace = %namespace, tenant = %tenant, "Registering namespace tenant");
        self.tenants.insert(namespace, tenant)
    }

    /// Forget a namespace, returning the tenant it was associated with
    pub fn remove(&self, namespace: &str) -> Option<String> {
        self.tenants.remove(namespace).map(|(_, tenant)| tenant)
    }

    /// Whether a namespace is tracked
    pub fn contains(&self, namespace: &str) -> bool {
        self.tenants.contains_key(namespace)
    }

    /// Number of tracked namespaces
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    /// True when no namespace is tracked
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Drop every entry (controller shutdown)
    pub fn clear(&self) {
        self.tenants.clear();
    }
}
