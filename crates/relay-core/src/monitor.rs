use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chain::ChainFetcher;
use crate::metrics::ProviderMetrics;
use crate::types::RpcEndpoint;

/// Health loop for one `(chain, api_interface)`. Served relays count as proof
/// of life; only an idle interval triggers a probe of the node.
pub struct RelaysMonitor {
    endpoint: RpcEndpoint,
    fetcher: Arc<dyn ChainFetcher>,
    metrics: Arc<ProviderMetrics>,
    interval: Duration,
    active: AtomicBool,
}

impl RelaysMonitor {
    pub fn new(
        endpoint: RpcEndpoint,
        fetcher: Arc<dyn ChainFetcher>,
        metrics: Arc<ProviderMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            endpoint,
            fetcher,
            metrics,
            interval,
            active: AtomicBool::new(false),
        }
    }

    pub fn record_activity(&self) {
        self.active.store(true, Ordering::Relaxed);
    }

    pub async fn check(&self) -> bool {
        if self.active.swap(false, Ordering::Relaxed) {
            self.metrics.set_health(&self.endpoint, true);
            return true;
        }
        let healthy = match self.fetcher.fetch_latest_block_num().await {
            Ok(block) => {
                debug!(endpoint = %self.endpoint, block, "health probe ok");
                true
            }
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "health probe failed");
                false
            }
        };
        self.metrics.set_health(&self.endpoint, healthy);
        healthy
    }

    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + monitor.interval, monitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.check().await;
                    }
                }
            }
            debug!(endpoint = %monitor.endpoint, "relays monitor stopped");
        })
    }
}
