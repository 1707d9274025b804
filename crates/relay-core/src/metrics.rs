use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::types::RpcEndpoint;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStatus {
    pub enabled: bool,
    pub relays: u64,
    pub compute_units: u64,
    pub relay_errors: u64,
    /// `None` until a health probe has run.
    pub healthy: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStatus {
    pub latest_block: i64,
    pub spec_valid: bool,
}

impl Default for ChainStatus {
    fn default() -> Self {
        Self {
            latest_block: 0,
            spec_valid: true,
        }
    }
}

/// In-process counters. Nothing is exported; a reporter task logs snapshots.
#[derive(Default)]
pub struct ProviderMetrics {
    relays: AtomicU64,
    compute_units: AtomicU64,
    relay_errors: AtomicU64,
    endpoints: Mutex<BTreeMap<RpcEndpoint, EndpointStatus>>,
    chains: Mutex<BTreeMap<String, ChainStatus>>,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, endpoint: &RpcEndpoint) {
        self.endpoint(endpoint, |status| status.enabled = true);
    }

    pub fn set_disabled(&self, endpoint: &RpcEndpoint) {
        self.endpoint(endpoint, |status| status.enabled = false);
    }

    pub fn add_relay(&self, endpoint: &RpcEndpoint, compute_units: u64) {
        self.relays.fetch_add(1, Ordering::Relaxed);
        self.compute_units.fetch_add(compute_units, Ordering::Relaxed);
        self.endpoint(endpoint, |status| {
            status.relays += 1;
            status.compute_units += compute_units;
        });
    }

    pub fn add_relay_error(&self, endpoint: &RpcEndpoint) {
        self.relay_errors.fetch_add(1, Ordering::Relaxed);
        self.endpoint(endpoint, |status| status.relay_errors += 1);
    }

    pub fn set_health(&self, endpoint: &RpcEndpoint, healthy: bool) {
        self.endpoint(endpoint, |status| status.healthy = Some(healthy));
    }

    pub fn set_latest_block(&self, chain_id: &str, block: i64) {
        self.chains()
            .entry(chain_id.to_owned())
            .or_default()
            .latest_block = block;
    }

    pub fn set_spec_valid(&self, chain_id: &str, valid: bool) {
        self.chains()
            .entry(chain_id.to_owned())
            .or_default()
            .spec_valid = valid;
    }

    pub fn endpoint_status(&self, endpoint: &RpcEndpoint) -> Option<EndpointStatus> {
        self.endpoints().get(endpoint).copied()
    }

    pub fn chain_status(&self, chain_id: &str) -> Option<ChainStatus> {
        self.chains().get(chain_id).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let endpoints = self.endpoints();
        let (enabled, disabled): (Vec<_>, Vec<_>) =
            endpoints.iter().partition(|(_, status)| status.enabled);
        MetricsSnapshot {
            relays: self.relays.load(Ordering::Relaxed),
            compute_units: self.compute_units.load(Ordering::Relaxed),
            relay_errors: self.relay_errors.load(Ordering::Relaxed),
            enabled_endpoints: enabled.len(),
            disabled_endpoints: disabled.iter().map(|(key, _)| (*key).clone()).collect(),
        }
    }

    fn endpoint(&self, endpoint: &RpcEndpoint, update: impl FnOnce(&mut EndpointStatus)) {
        update(self.endpoints().entry(endpoint.clone()).or_default());
    }

    fn endpoints(&self) -> MutexGuard<'_, BTreeMap<RpcEndpoint, EndpointStatus>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn chains(&self) -> MutexGuard<'_, BTreeMap<String, ChainStatus>> {
        self.chains.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub relays: u64,
    pub compute_units: u64,
    pub relay_errors: u64,
    pub enabled_endpoints: usize,
    pub disabled_endpoints: Vec<RpcEndpoint>,
}

/// Spawns a background task that periodically logs relay throughput and
/// endpoint availability.
pub fn spawn_metrics_reporter(
    metrics: Arc<ProviderMetrics>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last = metrics.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "relay::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = metrics.snapshot();
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let delta = current.relays.saturating_sub(last.relays);
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        delta as f64 / elapsed
                    };
                    let disabled: Vec<String> =
                        current.disabled_endpoints.iter().map(ToString::to_string).collect();

                    tracing::info!(
                        target: "relay::metrics",
                        throughput = format!("{throughput:.2}"),
                        relays = current.relays,
                        compute_units = current.compute_units,
                        relay_errors = current.relay_errors,
                        enabled = current.enabled_endpoints,
                        disabled = ?disabled,
                        "provider metrics snapshot"
                    );

                    last = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
