//! Agent configuration from command-line flags and environment

use std::time::Duration;

use clap::Parser;

use sonar_common::retry::RetryConfig;
use sonar_common::{Error, Result};

use crate::client::SonarApiConfig;
use crate::dispatcher::DispatcherConfig;

/// SONAR agent - keeps the SONAR configuration store in sync with the cluster
#[derive(Parser, Debug, Clone)]
#[command(name = "sonar-agent", version, about, long_about = None)]
pub struct AgentConfig {
    /// Base URL of the SONAR API
    #[arg(long, env = "SONAR_API_URL")]
    pub api_url: String,

    /// API key sent with every SONAR API request
    #[arg(long, env = "SONAR_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Environment this agent reports configuration for
    #[arg(long, env = "SONAR_ENVIRONMENT")]
    pub environment: String,

    /// Queue depth of each per-namespace worker
    #[arg(long, env = "SONAR_QUEUE_CAPACITY", default_value_t = 64)]
    pub queue_capacity: usize,

    /// Seconds a worker may sit idle before it is retired
    #[arg(long, env = "SONAR_WORKER_IDLE_SECS", default_value_t = 300)]
    pub worker_idle_secs: u64,

    /// Attempts per remote call before an event is given up (0 = until shutdown)
    #[arg(long, env = "SONAR_REMOTE_RETRY_ATTEMPTS", default_value_t = 0)]
    pub remote_retry_attempts: u32,

    /// Timeout of a single SONAR API request, in seconds
    #[arg(long, env = "SONAR_REMOTE_TIMEOUT_SECS", default_value_t = 30)]
    pub remote_timeout_secs: u64,
}

impl AgentConfig {
    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(Error::validation("api_url", "must not be empty"));
        }
        if self.environment.trim().is_empty() {
            return Err(Error::validation("environment", "must not be empty"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::validation("queue_capacity", "must be at least 1"));
        }
        if self.worker_idle_secs == 0 {
            return Err(Error::validation("worker_idle_secs", "must be at least 1"));
        }
        if self.remote_timeout_secs == 0 {
            return Err(Error::validation("remote_timeout_secs", "must be at least 1"));
        }
        Ok(())
    }

    /// SONAR API connection settings
    pub fn api_config(&self) -> SonarApiConfig {
        SonarApiConfig {
            base_url: self.api_url.trim().to_string(),
            environment: self.environment.trim().to_string(),
            api_key: self.api_key.clone().filter(|k| !k.is_empty()),
            timeout: Duration::from_secs(self.remote_timeout_secs),
        }
    }

    /// Dispatcher tuning
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: self.queue_capacity,
            idle_timeout: Duration::from_secs(self.worker_idle_secs),
        }
    }

    /// Backoff for remote and cluster calls
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.remote_retry_attempts)
    }
}
