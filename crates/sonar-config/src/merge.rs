//! Merge a namespace's configuration fragments into one service hierarchy
//!
//! Fragments are validated individually, sorted by `(order, namespace, name)`
//! and folded in that order, so the result depends only on the set of
//! fragments and never on the order they were observed in.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use sonar_common::Error;

use crate::fragment::{ConfigFragment, ValidFragment};
use crate::types::{ServiceConfiguration, ServiceHierarchyConfiguration};

/// Result of a merge, with the fragments that were skipped
#[derive(Debug, Default)]
pub struct MergeReport {
    /// The merged configuration
    pub config: ServiceHierarchyConfiguration,
    /// Fragments that failed validation and were left out
    pub rejected: Vec<Error>,
    /// Root or child references to services no fragment declares
    pub dangling: Vec<String>,
}

/// Merge fragments, returning only the configuration
///
/// Invalid fragments are skipped; see [`merge_with_report`] to inspect them.
pub fn merge(fragments: &[ConfigFragment]) -> ServiceHierarchyConfiguration {
    merge_with_report(fragments).config
}

/// Merge fragments and report what was rejected
pub fn merge_with_report(fragments: &[ConfigFragment]) -> MergeReport {
    let mut report = MergeReport::default();

    let mut valid: Vec<ValidFragment> = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        match fragment.parse() {
            Ok(v) => valid.push(v),
            Err(e) => {
                warn!(
                    namespace = %fragment.namespace,
                    fragment = %fragment.name,
                    error = %e,
                    "Skipping invalid configuration fragment"
                );
                report.rejected.push(e);
            }
        }
    }

    valid.sort_by(|a, b| {
        a.order
            .cmp(&b.order)
            .then_with(|| a.namespace.cmp(&b.namespace))
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut services: BTreeMap<String, ServiceConfiguration> = BTreeMap::new();
    let mut roots: BTreeSet<String> = BTreeSet::new();

    for fragment in valid {
        for service in fragment.payload.services {
            match services.get_mut(&service.name) {
                Some(existing) => existing.overlay(service),
                None => {
                    services.insert(service.name.clone(), service);
                }
            }
        }
        roots.extend(fragment.payload.root_services);
    }

    // Enforce the hierarchy invariant: every reference resolves
    let declared: BTreeSet<String> = services.keys().cloned().collect();
    for service in services.values_mut() {
        service.children.retain(|child| {
            let known = declared.contains(child);
            if !known {
                report.dangling.push(child.clone());
            }
            known
        });
    }
    roots.retain(|root| {
        let known = declared.contains(root);
        if !known {
            report.dangling.push(root.clone());
        }
        known
    });

    if !report.dangling.is_empty() {
        warn!(
            references = ?report.dangling,
            "Dropped references to undeclared services"
        );
    }

    report.config = ServiceHierarchyConfiguration {
        services: services.into_values().collect(),
        root_services: roots,
    };
    report
}
