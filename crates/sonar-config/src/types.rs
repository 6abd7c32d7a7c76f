//! Service hierarchy types shared by fragments and the merged configuration
//!
//! Field names follow the SONAR API's camelCase JSON, so a merged
//! [`ServiceHierarchyConfiguration`] serializes directly into a request body.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A single health check attached to a service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckModel {
    /// Check name, unique within its service
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Check type understood by the health-check engine (e.g. "HttpRequest")
    #[serde(rename = "type")]
    pub check_type: String,
    /// Type-specific definition, opaque to the agent
    #[serde(default)]
    pub definition: serde_json::Value,
    /// Number of consecutive failures tolerated before reporting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoothing_tolerance: Option<u32>,
}

/// One service in the hierarchy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfiguration {
    /// Service name, unique within a configuration
    pub name: String,
    /// Name shown on dashboards
    pub display_name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Link to the service's own documentation or UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Health checks run against this service
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub health_checks: Vec<HealthCheckModel>,
    /// Names of child services
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    /// Arbitrary tags; a `None` value is a tag without a value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Option<String>>,
}

impl ServiceConfiguration {
    /// Create a service with only the required fields set
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: None,
            url: None,
            health_checks: Vec::new(),
            children: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Overlay a later declaration of the same service onto this one
    ///
    /// Required fields are replaced, optional fields only when the later
    /// declaration sets them. Health checks merge by name and tags by key,
    /// with the later value winning. Children are unioned in first-seen order.
    pub fn overlay(&mut self, later: ServiceConfiguration) {
        self.display_name = later.display_name;
        if later.description.is_some() {
            self.description = later.description;
        }
        if later.url.is_some() {
            self.url = later.url;
        }

        for check in later.health_checks {
            match self.health_checks.iter_mut().find(|c| c.name == check.name) {
                Some(existing) => *existing = check,
                None => self.health_checks.push(check),
            }
        }

        for child in later.children {
            if !self.children.contains(&child) {
                self.children.push(child);
            }
        }

        self.tags.extend(later.tags);
    }
}

/// The merged, canonical service hierarchy for one tenant
///
/// Invariants: service names are unique, and every root service name
/// refers to a service in `services`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHierarchyConfiguration {
    /// Services, sorted by name
    pub services: Vec<ServiceConfiguration>,
    /// Entry points of the hierarchy
    pub root_services: BTreeSet<String>,
}

impl ServiceHierarchyConfiguration {
    /// True when there are no services and no roots
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.root_services.is_empty()
    }

    /// Look up a service by name
    pub fn service(&self, name: &str) -> Option<&ServiceConfiguration> {
        self.services.iter().find(|s| s.name == name)
    }
}
