//! Error types for the SONAR agent
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the namespace, tenant or fragment they concern so a
//! failed reconciliation can be traced back to the cluster object.

use thiserror::Error;

/// Main error type for SONAR agent operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid agent configuration
    #[error("validation error for {field}: {message}")]
    Validation {
        /// The offending setting (e.g., "api_url")
        field: String,
        /// Description of what's invalid
        message: String,
    },

    /// A configuration fragment failed schema validation
    #[error("invalid fragment {namespace}/{name}: {message}")]
    Fragment {
        /// Namespace owning the fragment
        namespace: String,
        /// ConfigMap name of the fragment
        name: String,
        /// Description of what's invalid
        message: String,
    },

    /// Remote configuration store call failed
    #[error("remote store {operation} failed for tenant {tenant}: {message}")]
    RemoteStore {
        /// Tenant the call was made for
        tenant: String,
        /// Operation name (configure, delete)
        operation: String,
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Description of what failed
        message: String,
    },

    /// Operation abandoned because the agent is shutting down
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation that was interrupted
        operation: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "dispatcher", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a validation error for a configuration setting
    pub fn validation(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create a fragment validation error
    pub fn fragment(
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Fragment {
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a remote store error from an HTTP response status
    pub fn remote_status(
        tenant: impl Into<String>,
        operation: impl Into<String>,
        status: u16,
        msg: impl Into<String>,
    ) -> Self {
        Self::RemoteStore {
            tenant: tenant.into(),
            operation: operation.into(),
            status: Some(status),
            message: msg.into(),
        }
    }

    /// Create a remote store error for a transport failure (no response)
    pub fn remote_transport(
        tenant: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::RemoteStore {
            tenant: tenant.into(),
            operation: operation.into(),
            status: None,
            message: msg.into(),
        }
    }

    /// Create a cancellation error for the named operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and fragment errors need a config fix.
    /// Remote store errors retry on transport failures, 5xx and 429.
    /// Kubernetes errors retry unless the API returned a 4xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::Fragment { .. } => false,
            Error::RemoteStore { status, .. } => match status {
                None => true,
                Some(code) => *code >= 500 || *code == 429,
            },
            Error::Cancelled { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the namespace if this error is associated with one
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Error::Fragment { namespace, .. } => Some(namespace),
            _ => None,
        }
    }

    /// Get the tenant if this error is associated with one
    pub fn tenant(&self) -> Option<&str> {
        match self {
            Error::RemoteStore { tenant, .. } => Some(tenant),
            _ => None,
        }
    }
}
