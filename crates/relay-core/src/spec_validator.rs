use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chain::ChainFetcher;
use crate::error::CoreError;
use crate::metrics::ProviderMetrics;
use crate::state::SpecVerifier;
use crate::types::RpcEndpoint;

/// Re-runs spec verifications for every registered fetcher, periodically and
/// whenever the state tracker asks. Failing endpoints are reported disabled
/// in metrics until they pass again.
pub struct SpecValidator {
    fetchers: Mutex<BTreeMap<String, BTreeMap<RpcEndpoint, Arc<dyn ChainFetcher>>>>,
    metrics: Arc<ProviderMetrics>,
}

impl SpecValidator {
    pub fn new(metrics: Arc<ProviderMetrics>) -> Self {
        Self {
            fetchers: Mutex::new(BTreeMap::new()),
            metrics,
        }
    }

    /// Replaces any fetcher already registered for the same endpoint.
    pub async fn add_chain_fetcher(&self, fetcher: Arc<dyn ChainFetcher>) {
        let endpoint = fetcher.endpoint().clone();
        self.fetchers
            .lock()
            .await
            .entry(endpoint.chain_id.clone())
            .or_default()
            .insert(endpoint, fetcher);
    }

    pub async fn fetcher_count(&self, chain_id: &str) -> usize {
        self.fetchers.lock().await.get(chain_id).map_or(0, BTreeMap::len)
    }

    /// Validate every fetcher of `chain_id`. All fetchers run; the first
    /// failure is returned.
    pub async fn validate_chain(&self, chain_id: &str) -> Result<(), CoreError> {
        let fetchers: Vec<Arc<dyn ChainFetcher>> = self
            .fetchers
            .lock()
            .await
            .get(chain_id)
            .map(|by_endpoint| by_endpoint.values().cloned().collect())
            .unwrap_or_default();

        let mut first_error = None;
        for fetcher in fetchers {
            let endpoint = fetcher.endpoint().clone();
            match fetcher.validate().await {
                Ok(()) => self.metrics.set_enabled(&endpoint),
                Err(err) => {
                    warn!(endpoint = %endpoint, error = %err, "spec validation failed");
                    self.metrics.set_disabled(&endpoint);
                    first_error.get_or_insert(err);
                }
            }
        }
        self.metrics.set_spec_valid(chain_id, first_error.is_none());
        first_error.map_or(Ok(()), Err)
    }

    pub async fn validate_all(&self) {
        let chains: Vec<String> = self.fetchers.lock().await.keys().cloned().collect();
        // Failures are logged and recorded in metrics by `validate_chain`.
        join_all(chains.iter().map(|chain_id| self.validate_chain(chain_id))).await;
    }

    pub fn start(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let validator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => validator.validate_all().await,
                }
            }
            debug!("spec validator stopped");
        })
    }
}

#[async_trait]
impl SpecVerifier for SpecValidator {
    async fn verify_spec(&self, chain_id: &str) -> Result<(), CoreError> {
        self.validate_chain(chain_id).await
    }
}
