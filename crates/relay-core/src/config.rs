//! Provider configuration, resolved once at startup and shared read-only.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CoreError;
use crate::types::{NetworkAddress, ProviderIdentity, RpcProviderEndpoint};

pub const DEFAULT_STICKINESS_HEADER: &str = "x-relay-stickiness";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// In configuration order. An empty network address means "same listener
    /// as the previous endpoint".
    pub endpoints: Vec<RpcProviderEndpoint>,
    pub identity: Option<ProviderIdentity>,
    /// Concurrent requests per endpoint towards its nodes.
    pub parallel_connections: usize,
    pub reward_storage_path: Option<PathBuf>,
    pub reward_ttl: Duration,
    pub snapshot_threshold: usize,
    pub snapshot_timeout: Duration,
    pub reward_maintenance_interval: Duration,
    pub shard_id: u32,
    pub health_check: HealthCheckConfig,
    pub metrics_interval: Duration,
    pub stickiness_header: String,
    pub spec_validation_interval: Duration,
    /// Retry attempt `n` waits `n` times this long.
    pub retry_backoff_unit: Duration,
    /// `None` retries disabled endpoints until shutdown.
    pub max_retry_attempts: Option<u32>,
    /// How long each listener gets to drain in-flight requests.
    pub shutdown_grace: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            identity: None,
            parallel_connections: 4,
            reward_storage_path: None,
            reward_ttl: Duration::from_secs(24 * 60 * 60),
            snapshot_threshold: 1000,
            snapshot_timeout: Duration::from_secs(60),
            reward_maintenance_interval: Duration::from_secs(30),
            shard_id: 0,
            health_check: HealthCheckConfig::default(),
            metrics_interval: Duration::from_secs(60),
            stickiness_header: DEFAULT_STICKINESS_HEADER.to_owned(),
            spec_validation_interval: Duration::from_secs(30 * 60),
            retry_backoff_unit: Duration::from_secs(1),
            max_retry_attempts: None,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl ProviderConfig {
    /// Check process-wide settings and freeze the configuration.
    ///
    /// Individual endpoints are validated during their own setup so that one
    /// bad entry disables only itself.
    pub fn validate(self) -> Result<Arc<Self>, CoreError> {
        if self.endpoints.is_empty() {
            return Err(CoreError::Config("no endpoints configured".into()));
        }
        if self.endpoints[0].network_address.is_empty() {
            return Err(CoreError::Config(
                "the first endpoint must name a network address".into(),
            ));
        }
        if self.parallel_connections == 0 {
            return Err(CoreError::Config("parallel connections must be positive".into()));
        }
        if self.stickiness_header.trim().is_empty() {
            return Err(CoreError::Config("stickiness header name is empty".into()));
        }
        for (name, interval) in [
            ("metrics interval", self.metrics_interval),
            ("health check interval", self.health_check.interval),
            ("spec validation interval", self.spec_validation_interval),
            ("reward maintenance interval", self.reward_maintenance_interval),
        ] {
            if interval.is_zero() {
                return Err(CoreError::Config(format!("{name} must be positive")));
            }
        }
        Ok(Arc::new(self))
    }

    /// Endpoints with empty network addresses filled from their predecessor.
    pub fn resolved_endpoints(&self) -> Vec<Arc<RpcProviderEndpoint>> {
        let mut previous: Option<NetworkAddress> = None;
        let mut resolved = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let mut endpoint = endpoint.clone();
            if endpoint.network_address.is_empty() {
                if let Some(address) = &previous {
                    endpoint.network_address = address.clone();
                }
            } else {
                previous = Some(endpoint.network_address.clone());
            }
            resolved.push(Arc::new(endpoint));
        }
        resolved
    }

    /// Distinct chain ids, in first-seen order.
    pub fn chain_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for endpoint in &self.endpoints {
            if !ids.contains(&endpoint.chain_id) {
                ids.push(endpoint.chain_id.clone());
            }
        }
        ids
    }
}
