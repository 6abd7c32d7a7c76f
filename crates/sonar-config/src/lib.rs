//! Service hierarchy configuration for the SONAR agent
//!
//! - [`types`] - Service and hierarchy data model (SONAR API JSON shape)
//! - [`fragment`] - ConfigMap-backed configuration fragments and validation
//! - [`merge`] - Order-based merging of fragments into one hierarchy

#![deny(missing_docs)]

pub mod fragment;
pub mod merge;
pub mod types;

pub use fragment::{ConfigFragment, FragmentPayload, ValidFragment};
pub use merge::{merge, merge_with_report, MergeReport};
pub use types::{HealthCheckModel, ServiceConfiguration, ServiceHierarchyConfiguration};
