//! Cluster reads and writes used during reconciliation

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::api::{Api, DeleteParams, ListParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use sonar_common::{Error, CONFIG_LABEL_SELECTOR};
use sonar_config::ConfigFragment;

/// Trait abstracting the cluster operations the controller needs
///
/// The watchers deliver snapshots; reconciliation always re-reads live
/// state through this trait so a handler acts on the cluster as it is now.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Get a namespace by name, None if it does not exist
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error>;

    /// List the configuration fragments currently present in a namespace
    async fn list_fragments(&self, namespace: &str) -> Result<Vec<ConfigFragment>, Error>;

    /// Delete every configuration fragment in a namespace
    async fn delete_fragments(&self, namespace: &str) -> Result<(), Error>;
}

/// Real cluster client implementation backed by kube-rs
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_fragments(&self, namespace: &str) -> Result<Vec<ConfigFragment>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(CONFIG_LABEL_SELECTOR))
            .await?;

        Ok(live_fragments(&list.items))
    }

    async fn delete_fragments(&self, namespace: &str) -> Result<(), Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api
            .delete_collection(
                &DeleteParams::default(),
                &ListParams::default().labels(CONFIG_LABEL_SELECTOR),
            )
            .await
        {
            Ok(_) => {
                debug!(namespace = %namespace, "Deleted configuration fragments");
                Ok(())
            }
            // The namespace finished terminating first; nothing left to clean up
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Fragments from listed ConfigMaps, skipping objects already being deleted
fn live_fragments(items: &[ConfigMap]) -> Vec<ConfigFragment> {
    items
        .iter()
        .filter(|cm| cm.metadata.deletion_timestamp.is_none())
        .filter_map(ConfigFragment::from_config_map)
        .collect()
}
