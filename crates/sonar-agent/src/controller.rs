//! Reconciliation controller
//!
//! Applies one [`ReconciliationEvent`] to the remote configuration store.
//! The transition table is a single `match` over resource and change kind:
//!
//! | resource  | added                 | modified                    | deleted                        |
//! |-----------|-----------------------|-----------------------------|--------------------------------|
//! | namespace | no-op                 | move config on tenant change | forget, clean up, delete tenant |
//! | fragment  | merge, push, register | merge, push                 | merge remaining, push          |
//!
//! The registry tracks what the store holds: it changes only once the
//! remote call it reflects has succeeded. Remote calls retry with backoff
//! until they succeed, fail permanently, or the agent shuts down.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::Namespace;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use sonar_common::metrics;
use sonar_common::retry::{retry_cancellable, RetryConfig};
use sonar_common::{Error, Result};
use sonar_config::{merge_with_report, ServiceHierarchyConfiguration};

use crate::client::ServiceConfigStore;
use crate::cluster::ClusterClient;
use crate::event::{declared_tenant, is_opted_in, ChangeKind, ReconciliationEvent};
use crate::notifier::TenantNotifier;
use crate::registry::TenantRegistry;

/// Shared state and collaborators for reconciliation
pub struct Context {
    /// Cluster reads and cleanup (trait object for testability)
    pub cluster: Arc<dyn ClusterClient>,
    /// Remote configuration store
    pub store: Arc<dyn ServiceConfigStore>,
    /// Namespace to tenant registry
    pub registry: Arc<TenantRegistry>,
    /// Tenant-created notifications for the health-check scheduler
    pub notifier: TenantNotifier,
    /// Backoff for remote and cluster calls
    pub retry: RetryConfig,
    /// Process-lifetime shutdown token
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a context with a fresh token
    ///
    /// Remote and cluster calls retry until they succeed, fail permanently
    /// or the shutdown token fires.
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        store: Arc<dyn ServiceConfigStore>,
        registry: Arc<TenantRegistry>,
    ) -> Self {
        Self {
            cluster,
            store,
            registry,
            notifier: TenantNotifier::new(),
            retry: RetryConfig::infinite(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Publish tenant notifications through the given notifier
    pub fn with_notifier(mut self, notifier: TenantNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Use the given backoff for remote and cluster calls
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Abandon in-flight calls when the given token fires
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Reconcile one event, recording its outcome
///
/// Failures are logged and counted, never propagated: one bad event must
/// not stop the worker from processing the next.
pub async fn handle_event(event: &ReconciliationEvent, ctx: &Context) {
    let start = Instant::now();
    let result = reconcile(event, ctx).await;
    metrics::record_reconcile(
        event.resource(),
        event.change().as_str(),
        metrics::result_label(&result),
        start.elapsed().as_secs_f64(),
    );

    match result {
        Ok(()) => {}
        Err(Error::Cancelled { operation }) => {
            debug!(
                namespace = ?event.namespace_key(),
                operation = %operation,
                "Reconciliation abandoned on shutdown"
            );
        }
        Err(e) => {
            error!(
                namespace = ?event.namespace_key(),
                resource = event.resource(),
                change = %event.change(),
                tenant = ?e.tenant(),
                error = %e,
                "Reconciliation failed"
            );
        }
    }
}

/// Apply one event to the remote store and registry
#[instrument(
    skip(event, ctx),
    fields(
        resource = event.resource(),
        change = %event.change(),
        namespace = event.namespace_key().unwrap_or_default()
    )
)]
pub async fn reconcile(event: &ReconciliationEvent, ctx: &Context) -> Result<()> {
    let name = event
        .namespace_key()
        .ok_or_else(|| Error::internal_with_context("controller", "event has no namespace"))?;

    match event {
        ReconciliationEvent::Namespace {
            change: ChangeKind::Added,
            ..
        } => {
            debug!("Namespace opted in, waiting for configuration fragments");
            Ok(())
        }
        ReconciliationEvent::Namespace {
            change: ChangeKind::Modified,
            namespace,
        } => namespace_modified(name, namespace, ctx).await,
        ReconciliationEvent::Namespace {
            change: ChangeKind::Deleted,
            namespace,
        } => namespace_deleted(name, namespace, ctx).await,
        ReconciliationEvent::ConfigFragment {
            change: ChangeKind::Added,
            ..
        } => fragment_added(name, ctx).await,
        ReconciliationEvent::ConfigFragment {
            change: ChangeKind::Modified,
            ..
        } => fragment_modified(name, ctx).await,
        ReconciliationEvent::ConfigFragment {
            change: ChangeKind::Deleted,
            ..
        } => fragment_deleted(name, ctx).await,
    }
}

async fn namespace_modified(name: &str, snapshot: &Namespace, ctx: &Context) -> Result<()> {
    let Some(previous) = ctx.registry.get(name) else {
        debug!("Namespace has no active configuration yet");
        return Ok(());
    };

    let tenant = declared_tenant(snapshot).unwrap_or_else(|| name.to_string());
    if tenant == previous {
        return Ok(());
    }

    info!(from = %previous, to = %tenant, "Tenant changed, moving configuration");
    let config = merged_config(name, ctx).await?;
    remove_tenant(&previous, ctx).await?;
    // The old tenant is gone; later fragment events must target the new one
    ctx.registry.set(name, tenant.as_str());
    push_configuration(&tenant, &config, ctx).await?;

    ctx.notifier.notify(&tenant, name);
    Ok(())
}

async fn namespace_deleted(name: &str, snapshot: &Namespace, ctx: &Context) -> Result<()> {
    let tracked = ctx.registry.remove(name);
    let tenant = match tracked.clone() {
        Some(tenant) => tenant,
        None => {
            let tenant = declared_tenant(snapshot).unwrap_or_else(|| name.to_string());
            debug!(tenant = %tenant, "Namespace was not tracked, deleting its declared tenant");
            tenant
        }
    };

    cleanup_fragments(name, ctx).await;
    if let Err(e) = remove_tenant(&tenant, ctx).await {
        // The store still holds the tenant
        if tracked.is_some() {
            ctx.registry.set(name, tenant.as_str());
        }
        return Err(e);
    }

    info!(tenant = %tenant, "Removed tenant configuration");
    Ok(())
}

/// Best-effort removal of a deleted namespace's fragments
///
/// A namespace that merely lost its opt-in label still exists and keeps its
/// fragments; only a namespace that is gone or terminating is cleaned up.
async fn cleanup_fragments(name: &str, ctx: &Context) {
    match read_namespace(name, ctx).await {
        Ok(Some(live)) if live.metadata.deletion_timestamp.is_none() => {
            info!("Namespace opted out of monitoring, keeping its configuration fragments");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "Could not confirm namespace deletion, keeping configuration fragments");
            return;
        }
    }

    let cluster = &ctx.cluster;
    if let Err(e) = retry_cancellable(&ctx.retry, "delete_fragments", &ctx.shutdown, move || {
        cluster.delete_fragments(name)
    })
    .await
    {
        warn!(error = %e, "Failed to delete configuration fragments");
    }
}

async fn fragment_added(name: &str, ctx: &Context) -> Result<()> {
    let live = match read_namespace(name, ctx).await? {
        Some(ns) if ns.metadata.deletion_timestamp.is_none() => ns,
        Some(_) => {
            debug!("Namespace is terminating, ignoring fragment");
            return Ok(());
        }
        None => {
            info!("Namespace not found, ignoring fragment");
            return Ok(());
        }
    };
    if !is_opted_in(&live) {
        debug!("Namespace is not opted in, ignoring fragment");
        return Ok(());
    }

    let tenant = declared_tenant(&live).unwrap_or_else(|| name.to_string());
    let config = merged_config(name, ctx).await?;

    if let Some(previous) = ctx.registry.get(name).filter(|p| *p != tenant) {
        info!(from = %previous, to = %tenant, "Registered tenant is stale, removing it first");
        remove_tenant(&previous, ctx).await?;
    }
    push_configuration(&tenant, &config, ctx).await?;

    ctx.registry.set(name, tenant.as_str());
    ctx.notifier.notify(&tenant, name);
    info!(tenant = %tenant, services = config.services.len(), "Configured tenant");
    Ok(())
}

async fn fragment_modified(name: &str, ctx: &Context) -> Result<()> {
    match ctx.registry.get(name) {
        Some(tenant) => {
            let config = merged_config(name, ctx).await?;
            push_configuration(&tenant, &config, ctx).await
        }
        None => fragment_added(name, ctx).await,
    }
}

async fn fragment_deleted(name: &str, ctx: &Context) -> Result<()> {
    let Some(tenant) = ctx.registry.get(name) else {
        debug!("Namespace has no active configuration, nothing to update");
        return Ok(());
    };

    let config = merged_config(name, ctx).await?;
    push_configuration(&tenant, &config, ctx).await
}

async fn read_namespace(name: &str, ctx: &Context) -> Result<Option<Namespace>> {
    let cluster = &ctx.cluster;
    retry_cancellable(&ctx.retry, "get_namespace", &ctx.shutdown, move || {
        cluster.get_namespace(name)
    })
    .await
}

/// Merge the namespace's live fragments
async fn merged_config(name: &str, ctx: &Context) -> Result<ServiceHierarchyConfiguration> {
    let cluster = &ctx.cluster;
    let fragments = retry_cancellable(&ctx.retry, "list_fragments", &ctx.shutdown, move || {
        cluster.list_fragments(name)
    })
    .await?;

    let report = merge_with_report(&fragments);
    if !report.rejected.is_empty() {
        metrics::FRAGMENTS_REJECTED.add(report.rejected.len() as u64, &[]);
    }
    debug!(
        fragments = fragments.len(),
        rejected = report.rejected.len(),
        services = report.config.services.len(),
        "Merged configuration fragments"
    );
    Ok(report.config)
}

async fn push_configuration(
    tenant: &str,
    config: &ServiceHierarchyConfiguration,
    ctx: &Context,
) -> Result<()> {
    let store = &ctx.store;
    let result = retry_cancellable(&ctx.retry, "configure_services", &ctx.shutdown, move || {
        store.configure_services(tenant, config)
    })
    .await;
    metrics::record_remote_call("configure", metrics::result_label(&result));
    result
}

async fn remove_tenant(tenant: &str, ctx: &Context) -> Result<()> {
    let store = &ctx.store;
    let result = retry_cancellable(&ctx.retry, "delete_services", &ctx.shutdown, move || {
        store.delete_services(tenant)
    })
    .await;
    metrics::record_remote_call("delete", metrics::result_label(&result));
    result
}
