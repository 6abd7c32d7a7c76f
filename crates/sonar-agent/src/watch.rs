//! Namespace and configuration fragment watchers
//!
//! Each watcher is a long-lived task over a kube-rs watch stream that turns
//! raw watch events into [`ReconciliationEvent`]s. kube-rs only reports
//! applies and deletes, so an [`EventClassifier`] remembers every object it
//! has seen to tell an add from a modification. When the stream re-lists
//! (after a desync or reconnect) the classifier rebases on the fresh listing
//! and synthesizes deletions for objects that vanished while disconnected.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sonar_common::{metrics, CONFIG_LABEL_SELECTOR, MONITORING_LABEL_SELECTOR};

use crate::event::{ChangeKind, ReconciliationEvent};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client times out.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Pause before resubscribing after the stream ends
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Derives Added/Modified/Deleted from kube-rs watch events
#[derive(Debug)]
pub struct EventClassifier<K> {
    /// Last snapshot seen for every live object, by namespace/name
    known: HashMap<String, K>,
    /// Keys seen since the current re-list started
    relist: Option<HashSet<String>>,
}

impl<K> Default for EventClassifier<K> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relist: None,
        }
    }
}

impl<K: Resource + Clone> EventClassifier<K> {
    /// Create a classifier that has seen nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently considered live
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// True when no object is considered live
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Classify one watch event into zero or more changes
    pub fn classify(&mut self, event: watcher::Event<K>) -> Vec<(ChangeKind, K)> {
        match event {
            watcher::Event::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(seen) = self.relist.as_mut() {
                    seen.insert(object_key(&obj));
                }
                self.apply(obj).into_iter().collect()
            }
            watcher::Event::InitDone => self.finish_relist(),
            watcher::Event::Apply(obj) => self.apply(obj).into_iter().collect(),
            watcher::Event::Delete(obj) => {
                self.known.remove(&object_key(&obj));
                vec![(ChangeKind::Deleted, obj)]
            }
        }
    }

    fn apply(&mut self, obj: K) -> Option<(ChangeKind, K)> {
        let key = object_key(&obj);
        let change = match self.known.get(&key) {
            None => ChangeKind::Added,
            // Re-list of an object we already processed at this version
            Some(prev) if prev.meta().resource_version == obj.meta().resource_version => {
                return None
            }
            Some(_) => ChangeKind::Modified,
        };
        self.known.insert(key, obj.clone());
        Some((change, obj))
    }

    fn finish_relist(&mut self) -> Vec<(ChangeKind, K)> {
        let Some(seen) = self.relist.take() else {
            return Vec::new();
        };

        let vanished: Vec<String> = self
            .known
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();

        vanished
            .into_iter()
            .filter_map(|key| self.known.remove(&key))
            .map(|obj| (ChangeKind::Deleted, obj))
            .collect()
    }
}

fn object_key<K: Resource>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.meta().namespace.as_deref().unwrap_or_default(),
        obj.meta().name.as_deref().unwrap_or_default()
    )
}

/// Watch opted-in namespaces and forward their changes
pub async fn watch_namespaces(
    client: Client,
    tx: mpsc::Sender<ReconciliationEvent>,
    token: CancellationToken,
) {
    let api: Api<Namespace> = Api::all(client);
    let config = watcher::Config::default()
        .labels(MONITORING_LABEL_SELECTOR)
        .timeout(WATCH_TIMEOUT_SECS);
    run_watcher(api, config, "namespace", ReconciliationEvent::namespace, tx, token).await;
}

/// Watch configuration fragment ConfigMaps cluster-wide and forward their changes
pub async fn watch_fragments(
    client: Client,
    tx: mpsc::Sender<ReconciliationEvent>,
    token: CancellationToken,
) {
    let api: Api<ConfigMap> = Api::all(client);
    let config = watcher::Config::default()
        .labels(CONFIG_LABEL_SELECTOR)
        .timeout(WATCH_TIMEOUT_SECS);
    run_watcher(
        api,
        config,
        "config_fragment",
        ReconciliationEvent::config_fragment,
        tx,
        token,
    )
    .await;
}

/// Drive one watch stream until cancelled or the receiver goes away
///
/// Stream errors are logged and counted; kube-rs backs off and re-lists on
/// its own. If the stream ends, the watcher resubscribes after a short pause.
async fn run_watcher<K>(
    api: Api<K>,
    config: watcher::Config,
    resource: &'static str,
    to_event: fn(ChangeKind, K) -> ReconciliationEvent,
    tx: mpsc::Sender<ReconciliationEvent>,
    token: CancellationToken,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let mut classifier = EventClassifier::<K>::new();
    info!(resource = resource, "Starting watcher");

    loop {
        let mut stream = watcher(api.clone(), config.clone())
            .default_backoff()
            .boxed();

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => {
                    info!(resource = resource, "Watcher stopped");
                    return;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    for (change, obj) in classifier.classify(event) {
                        debug!(
                            resource = resource,
                            change = %change,
                            name = %obj.name_any(),
                            namespace = ?obj.namespace(),
                            "Observed change"
                        );
                        if tx.send(to_event(change, obj)).await.is_err() {
                            info!(resource = resource, "Event receiver closed, watcher exiting");
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    metrics::record_watch_error(resource);
                    warn!(resource = resource, error = %e, "Watch stream error");
                }
                None => {
                    info!(resource = resource, "Watch stream closed, resubscribing");
                    break;
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
        }
    }
}
