//! SONAR agent: dynamic configuration reconciliation
//!
//! Watches opted-in namespaces and their configuration fragment ConfigMaps,
//! merges each namespace's fragments into one service hierarchy and keeps the
//! SONAR configuration store in sync, one tenant per namespace.

#![deny(missing_docs)]

pub mod client;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod event;
pub mod notifier;
pub mod registry;
pub mod watch;

pub use client::{ServiceConfigStore, SonarApiClient, SonarApiConfig};
pub use cluster::{ClusterClient, KubeClusterClient};
pub use config::AgentConfig;
pub use controller::{handle_event, reconcile, Context};
pub use dispatcher::{Dispatcher, DispatcherConfig, EventHandler};
pub use event::{ChangeKind, ReconciliationEvent};
pub use notifier::{TenantCreated, TenantNotifier};
pub use registry::TenantRegistry;
