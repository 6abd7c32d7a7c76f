//! Configuration fragments backed by labelled ConfigMaps
//!
//! A fragment is captured from the cluster as-is ([`ConfigFragment`]) and
//! only validated when merged, so one malformed ConfigMap never stops the
//! controller from reading the rest of a namespace.

use std::collections::{BTreeSet, HashSet};

use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};

use sonar_common::{Error, Result, CONFIG_DATA_KEY, CONFIG_ORDER_LABEL_KEY};

use crate::types::ServiceConfiguration;

/// Raw snapshot of a configuration fragment as found in the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigFragment {
    /// Namespace owning the fragment
    pub namespace: String,
    /// ConfigMap name
    pub name: String,
    /// Raw value of the order label, if present
    pub order: Option<String>,
    /// Raw JSON payload, if the data key is present
    pub payload: Option<String>,
}

/// Deserialized fragment payload
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FragmentPayload {
    /// Service declarations in this layer
    #[serde(default)]
    pub services: Vec<ServiceConfiguration>,
    /// Root service names contributed by this layer
    #[serde(default)]
    pub root_services: BTreeSet<String>,
}

/// A fragment that passed validation and is ready to merge
#[derive(Clone, Debug, PartialEq)]
pub struct ValidFragment {
    /// Namespace owning the fragment
    pub namespace: String,
    /// ConfigMap name
    pub name: String,
    /// Merge priority, lower merges first
    pub order: i32,
    /// Parsed payload
    pub payload: FragmentPayload,
}

impl ConfigFragment {
    /// Capture a fragment from a ConfigMap
    ///
    /// Returns None only when the ConfigMap lacks a name or namespace,
    /// which the API server never produces for namespaced objects.
    pub fn from_config_map(cm: &ConfigMap) -> Option<Self> {
        let namespace = cm.metadata.namespace.clone()?;
        let name = cm.metadata.name.clone()?;
        let order = cm
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CONFIG_ORDER_LABEL_KEY))
            .cloned();
        let payload = cm
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIG_DATA_KEY))
            .cloned();

        Some(Self {
            namespace,
            name,
            order,
            payload,
        })
    }

    /// Validate and parse the fragment
    pub fn parse(&self) -> Result<ValidFragment> {
        let order = match self.order.as_deref().map(str::trim) {
            None | Some("") => 0,
            Some(raw) => raw.parse::<i32>().map_err(|_| {
                self.invalid(format!("order label '{raw}' is not an integer"))
            })?,
        };

        let raw = self
            .payload
            .as_deref()
            .ok_or_else(|| self.invalid(format!("missing data key {CONFIG_DATA_KEY}")))?;

        let payload: FragmentPayload = serde_json::from_str(raw)
            .map_err(|e| self.invalid(format!("malformed payload: {e}")))?;

        self.validate_payload(&payload)?;

        Ok(ValidFragment {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            order,
            payload,
        })
    }

    fn validate_payload(&self, payload: &FragmentPayload) -> Result<()> {
        let mut seen = HashSet::new();
        for service in &payload.services {
            if service.name.trim().is_empty() {
                return Err(self.invalid("service with empty name"));
            }
            if !seen.insert(service.name.as_str()) {
                return Err(self.invalid(format!("duplicate service '{}'", service.name)));
            }
            if service.children.iter().any(|c| c.trim().is_empty()) {
                return Err(self.invalid(format!(
                    "service '{}' has an empty child name",
                    service.name
                )));
            }
        }

        if payload.root_services.iter().any(|r| r.trim().is_empty()) {
            return Err(self.invalid("empty root service name"));
        }

        Ok(())
    }

    fn invalid(&self, msg: impl Into<String>) -> Error {
        Error::fragment(&self.namespace, &self.name, msg)
    }
}
