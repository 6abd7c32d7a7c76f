//! SONAR agent - keeps the SONAR configuration store in sync with the cluster

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sonar_agent::watch::{watch_fragments, watch_namespaces};
use sonar_agent::{
    AgentConfig, Context, Dispatcher, KubeClusterClient, SonarApiClient, TenantCreated,
    TenantNotifier, TenantRegistry,
};
use sonar_common::telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let config = AgentConfig::parse();
    config.validate()?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let store = SonarApiClient::new(&config.api_config())?;

    let shutdown = CancellationToken::new();
    let registry = Arc::new(TenantRegistry::new());
    let notifier = TenantNotifier::new();
    let notifications = notifier.subscribe();

    let ctx = Context::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        Arc::new(store),
        registry.clone(),
    )
    .with_notifier(notifier)
    .with_retry(config.retry_config())
    .with_shutdown(shutdown.clone());

    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let dispatcher = Dispatcher::new(Arc::new(ctx), config.dispatcher_config(), shutdown.clone());

    let tasks = [
        ("dispatcher", tokio::spawn(dispatcher.run(rx))),
        (
            "namespace watcher",
            tokio::spawn(watch_namespaces(client.clone(), tx.clone(), shutdown.clone())),
        ),
        (
            "fragment watcher",
            tokio::spawn(watch_fragments(client, tx, shutdown.clone())),
        ),
        (
            "tenant notifications",
            tokio::spawn(log_tenant_notifications(notifications, shutdown.clone())),
        ),
    ];

    info!(
        environment = %config.environment,
        api_url = %config.api_url,
        "SONAR agent started"
    );

    wait_for_signal().await;
    info!("Shutdown signal received");
    shutdown.cancel();

    for (name, task) in tasks {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "Task ended abnormally");
        }
    }
    registry.clear();

    info!("SONAR agent stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}

/// Hand-off point for the health-check scheduler
async fn log_tenant_notifications(
    mut notifications: broadcast::Receiver<TenantCreated>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => return,
            received = notifications.recv() => received,
        };

        match received {
            Ok(created) => info!(
                tenant = %created.tenant,
                namespace = %created.namespace,
                "Tenant configuration active"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Tenant notifications dropped")
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
