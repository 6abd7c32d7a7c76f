//! Reconciliation events and namespace label helpers

use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::ResourceExt;

use sonar_common::{MONITORING_LABEL_KEY, TENANT_LABEL_KEY};

/// Kind of change observed on a watched resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// First sighting of the object
    Added,
    /// The object changed since it was last seen
    Modified,
    /// The object was deleted or stopped matching the watch selector
    Deleted,
}

impl ChangeKind {
    /// Lowercase label value for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed change, consumed exactly once by the controller
#[derive(Clone, Debug)]
pub enum ReconciliationEvent {
    /// A change to an opted-in namespace
    Namespace {
        /// What happened
        change: ChangeKind,
        /// Snapshot of the namespace at the time of the event
        namespace: Namespace,
    },
    /// A change to a configuration fragment ConfigMap
    ConfigFragment {
        /// What happened
        change: ChangeKind,
        /// Snapshot of the ConfigMap at the time of the event
        config_map: ConfigMap,
    },
}

impl ReconciliationEvent {
    /// Build a namespace event
    pub fn namespace(change: ChangeKind, namespace: Namespace) -> Self {
        Self::Namespace { change, namespace }
    }

    /// Build a configuration fragment event
    pub fn config_fragment(change: ChangeKind, config_map: ConfigMap) -> Self {
        Self::ConfigFragment { change, config_map }
    }

    /// The namespace this event belongs to, used as the serialization key
    pub fn namespace_key(&self) -> Option<&str> {
        match self {
            Self::Namespace { namespace, .. } => namespace.metadata.name.as_deref(),
            Self::ConfigFragment { config_map, .. } => config_map.metadata.namespace.as_deref(),
        }
    }

    /// The change kind
    pub fn change(&self) -> ChangeKind {
        match self {
            Self::Namespace { change, .. } | Self::ConfigFragment { change, .. } => *change,
        }
    }

    /// Resource label value for logs and metrics
    pub fn resource(&self) -> &'static str {
        match self {
            Self::Namespace { .. } => "namespace",
            Self::ConfigFragment { .. } => "config_fragment",
        }
    }

    /// True for a namespace deletion
    pub fn is_namespace_deletion(&self) -> bool {
        matches!(
            self,
            Self::Namespace {
                change: ChangeKind::Deleted,
                ..
            }
        )
    }
}

/// Whether a namespace carries the monitoring opt-in label
pub fn is_opted_in(namespace: &Namespace) -> bool {
    namespace
        .labels()
        .get(MONITORING_LABEL_KEY)
        .is_some_and(|v| v == "true")
}

/// The tenant a namespace declares
///
/// The tenant label wins when present and non-empty; otherwise the tenant is
/// the namespace name. Returns None only for a nameless object.
pub fn declared_tenant(namespace: &Namespace) -> Option<String> {
    match namespace.labels().get(TENANT_LABEL_KEY).map(|t| t.trim()) {
        Some(tenant) if !tenant.is_empty() => Some(tenant.to_string()),
        _ => namespace.metadata.name.clone(),
    }
}
