//! Tenant-created notifications for the health-check scheduler
//!
//! Delivery is best-effort and in-process: a notification published while
//! nobody is subscribed is dropped, and slow subscribers may lag.

use tokio::sync::broadcast;
use tracing::trace;

/// Channel capacity for tenant notifications
const TENANT_CHANNEL_CAPACITY: usize = 256;

/// A tenant now has an active configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantCreated {
    /// Tenant whose configuration was (re)created
    pub tenant: String,
    /// Namespace the configuration came from
    pub namespace: String,
}

/// Publisher for [`TenantCreated`] notifications
#[derive(Clone, Debug)]
pub struct TenantNotifier {
    tx: broadcast::Sender<TenantCreated>,
}

impl Default for TenantNotifier {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(TENANT_CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl TenantNotifier {
    /// Create a notifier with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to notifications published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<TenantCreated> {
        self.tx.subscribe()
    }

    /// Publish a notification, returning the number of subscribers reached
    pub fn notify(&self, tenant: &str, namespace: &str) -> usize {
        let event = TenantCreated {
            tenant: tenant.to_string(),
            namespace: namespace.to_string(),
        };
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!(tenant = %tenant, "No subscribers for tenant notification");
                0
            }
        }
    }
}
