//! Common types for the SONAR agent: errors, retry, telemetry and label keys

#![deny(missing_docs)]

pub mod error;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label marking a namespace as opted in to SONAR monitoring
pub const MONITORING_LABEL_KEY: &str = "sonar.monitoring/enabled";

/// Label selector for opted-in namespaces (for Kubernetes API queries)
pub const MONITORING_LABEL_SELECTOR: &str = "sonar.monitoring/enabled=true";

/// Optional namespace label overriding the tenant name
///
/// When absent or empty the namespace name is used as the tenant.
pub const TENANT_LABEL_KEY: &str = "sonar.monitoring/tenant";

/// Label selector for configuration fragments (for Kubernetes API queries)
pub const CONFIG_LABEL_SELECTOR: &str = "sonar.monitoring/config=true";

/// Label carrying a fragment's merge priority (lower merges first)
pub const CONFIG_ORDER_LABEL_KEY: &str = "sonar.monitoring/config-order";

/// ConfigMap data key holding the fragment's JSON payload
pub const CONFIG_DATA_KEY: &str = "service-config.json";
