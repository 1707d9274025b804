//! The endpoint orchestrator.
//!
//! [`RpcProvider::start`] bootstraps process-wide resources, sets up every
//! configured endpoint in parallel, keeps retrying the ones that failed, and
//! serves until cancelled or interrupted. Shutdown drains every listener and
//! closes the reward stores.

mod backend;
mod retry;
mod setup;

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ProviderConfig;
use crate::error::CoreError;
use crate::listener::Listener;
use crate::metrics::{spawn_metrics_reporter, ProviderMetrics};
use crate::registry::{ListenerRegistry, PerChainRegistry};
use crate::rewards::{RewardServer, RewardServerConfig};
use crate::spec_validator::SpecValidator;
use crate::state::{EpochSubscriber, ProviderStateTracker};
use crate::types::version_at_least;

pub use backend::{HttpBackend, ProviderBackend};
pub use retry::{retry_disabled_endpoints, spawn_retry_loop};
pub use setup::{ProviderContext, ServedEndpoint, SetupOutcome};

/// Version this build reports to the state tracker.
pub const PROVIDER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPhase {
    Init,
    SettingUpEndpoints,
    Serving,
    ShuttingDown,
    Stopped,
}

pub struct RpcProvider {
    config: Arc<ProviderConfig>,
    state_tracker: Arc<dyn ProviderStateTracker>,
    backend: Arc<dyn ProviderBackend>,
    phase: watch::Sender<ProviderPhase>,
}

impl RpcProvider {
    pub fn new(
        config: Arc<ProviderConfig>,
        state_tracker: Arc<dyn ProviderStateTracker>,
        backend: Arc<dyn ProviderBackend>,
    ) -> Self {
        let (phase, _) = watch::channel(ProviderPhase::Init);
        Self {
            config,
            state_tracker,
            backend,
            phase,
        }
    }

    pub fn phase(&self) -> ProviderPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProviderPhase> {
        self.phase.subscribe()
    }

    /// Run the provider until `shutdown` is cancelled or the process is
    /// interrupted. Fails only if bootstrap fails or no endpoint could be set
    /// up on the first pass.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<(), CoreError> {
        let background = shutdown.child_token();
        let ctx = match self.bootstrap(&background).await {
            Ok(ctx) => ctx,
            Err(err) => {
                background.cancel();
                self.phase.send_replace(ProviderPhase::Stopped);
                return Err(err);
            }
        };

        self.phase.send_replace(ProviderPhase::Serving);
        wait_for_shutdown(&shutdown).await;
        self.teardown(&ctx).await;
        Ok(())
    }

    /// Everything up to the serving wait: shared resources, the first setup
    /// pass, the retry loop and the spec validator.
    pub async fn bootstrap(
        &self,
        background: &CancellationToken,
    ) -> Result<Arc<ProviderContext>, CoreError> {
        let ctx = self.prepare(background).await?;
        let endpoints = self.config.resolved_endpoints();

        self.phase.send_replace(ProviderPhase::SettingUpEndpoints);
        info!(endpoints = endpoints.len(), provider = %ctx.identity.address, "setting up endpoints");
        let total = endpoints.len();
        let outcome = ctx.setup_all(endpoints, true).await;

        if outcome.active.is_empty() {
            error!(endpoints = total, "every endpoint failed setup");
            self.teardown(&ctx).await;
            return Err(CoreError::NoUsableEndpoints(total));
        }

        let active: Vec<String> = outcome.active.iter().map(ToString::to_string).collect();
        info!(active = ?active, "endpoints serving");
        if !outcome.disabled.is_empty() {
            let disabled: Vec<String> = outcome
                .disabled
                .iter()
                .map(|(endpoint, err)| format!("{endpoint} ({})", err.stage))
                .collect();
            warn!(disabled = ?disabled, "some endpoints are disabled; retrying in the background");
            spawn_retry_loop(
                ctx.clone(),
                outcome.disabled.into_iter().map(|(endpoint, _)| endpoint).collect(),
                background.child_token(),
            );
        }
        ctx.spec_validator
            .start(self.config.spec_validation_interval, background.child_token());
        Ok(ctx)
    }

    /// Process-wide resources only: metrics, the protocol version check, the
    /// reward ledger, identity and the session window. No endpoint is set up.
    pub async fn prepare(
        &self,
        background: &CancellationToken,
    ) -> Result<Arc<ProviderContext>, CoreError> {
        let config = &self.config;

        let metrics = Arc::new(ProviderMetrics::new());
        spawn_metrics_reporter(metrics.clone(), config.metrics_interval, background.child_token());

        let version = self.state_tracker.protocol_version().await.map_err(|err| {
            CoreError::Connectivity(format!("state tracker unreachable: {err}"))
        })?;
        if !version_at_least(PROVIDER_VERSION, &version.provider_min)? {
            return Err(CoreError::Config(format!(
                "provider version {PROVIDER_VERSION} is below the required minimum {}",
                version.provider_min
            )));
        }
        if !version_at_least(PROVIDER_VERSION, &version.provider_target)? {
            warn!(
                ours = PROVIDER_VERSION,
                target = %version.provider_target,
                "provider version is behind the protocol target"
            );
        }

        let rewards = Arc::new(RewardServer::new(
            RewardServerConfig {
                storage_path: config.reward_storage_path.clone(),
                ttl: config.reward_ttl,
                snapshot_threshold: config.snapshot_threshold,
                snapshot_timeout: config.snapshot_timeout,
            },
            self.state_tracker.clone(),
        ));
        self.state_tracker
            .register_for_epoch_updates(rewards.clone(), EpochSubscriber::Provider("rewards"))
            .await;
        rewards.spawn_maintenance(config.reward_maintenance_interval, background.child_token());

        let identity = config
            .identity
            .clone()
            .ok_or_else(|| CoreError::Config("no provider identity configured".into()))?;
        let block_memory_size = self.state_tracker.block_memory_size().await?;

        Ok(Arc::new(ProviderContext {
            config: config.clone(),
            state_tracker: self.state_tracker.clone(),
            backend: self.backend.clone(),
            metrics: metrics.clone(),
            rewards,
            spec_validator: Arc::new(SpecValidator::new(metrics)),
            trackers: PerChainRegistry::new(config.chain_ids()),
            listeners: ListenerRegistry::new(),
            identity,
            block_memory_size,
            served: Default::default(),
            background: background.clone(),
        }))
    }

    /// Stop background loops, drain listeners, then close reward stores.
    /// Errors are logged; teardown always completes.
    pub async fn teardown(&self, ctx: &ProviderContext) {
        self.phase.send_replace(ProviderPhase::ShuttingDown);
        ctx.background.cancel();

        let grace = self.config.shutdown_grace;
        let drains = ctx
            .listeners
            .snapshot()
            .await
            .into_iter()
            .map(|(address, listener)| async move {
                match listener.shutdown(grace).await {
                    Ok(()) => info!(address = %address, "listener drained"),
                    Err(err) => warn!(address = %address, error = %err, "listener shutdown failed"),
                }
            });
        join_all(drains).await;
        if let Err(err) = ctx.rewards.close_all_databases().await {
            warn!(error = %err, "closing reward stores failed");
        }

        self.phase.send_replace(ProviderPhase::Stopped);
        info!("provider stopped");
    }
}

async fn wait_for_shutdown(shutdown: &CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => info!("shutdown requested"),
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("interrupt received"),
            Err(err) => {
                warn!(error = %err, "cannot listen for interrupts; waiting for cancellation");
                shutdown.cancelled().await;
            }
        },
    }
}
