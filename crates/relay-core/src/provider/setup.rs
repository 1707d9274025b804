use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::{
    ChainParser, ChainTracker, ChainTrackerConfig, FetcherMode, ProviderPolicy, TrackerCallbacks,
};
use crate::config::ProviderConfig;
use crate::error::{CoreError, SetupError, SetupStage};
use crate::listener::Listener;
use crate::metrics::ProviderMetrics;
use crate::monitor::RelaysMonitor;
use crate::registry::{ListenerRegistry, PerChainRegistry};
use crate::reliability::ReliabilityManager;
use crate::rewards::{RewardServer, RewardStoreKey};
use crate::server::{RpcProviderServer, ServerComponents};
use crate::session::ProviderSessionManager;
use crate::spec_validator::SpecValidator;
use crate::state::{EpochSubscriber, EpochUpdatable, ProviderStateTracker};
use crate::types::{ProviderIdentity, RpcProviderEndpoint};

use super::ProviderBackend;

/// An endpoint that completed setup and is serving.
#[derive(Clone)]
pub struct ServedEndpoint {
    pub endpoint: Arc<RpcProviderEndpoint>,
    pub tracker: Arc<ChainTracker>,
    pub server: Arc<RpcProviderServer>,
}

/// Result of one setup pass over a set of endpoints.
#[derive(Default)]
pub struct SetupOutcome {
    pub active: Vec<Arc<RpcProviderEndpoint>>,
    pub disabled: Vec<(Arc<RpcProviderEndpoint>, SetupError)>,
}

/// Process-wide resources every endpoint setup draws from.
pub struct ProviderContext {
    pub(crate) config: Arc<ProviderConfig>,
    pub(crate) state_tracker: Arc<dyn ProviderStateTracker>,
    pub(crate) backend: Arc<dyn ProviderBackend>,
    pub(crate) metrics: Arc<ProviderMetrics>,
    pub(crate) rewards: Arc<RewardServer>,
    pub(crate) spec_validator: Arc<SpecValidator>,
    pub(crate) trackers: PerChainRegistry<ChainTracker>,
    pub(crate) listeners: ListenerRegistry<dyn Listener>,
    pub(crate) identity: ProviderIdentity,
    pub(crate) block_memory_size: u64,
    pub(crate) served: Mutex<Vec<ServedEndpoint>>,
    /// Parent of every loop started during setup.
    pub(crate) background: CancellationToken,
}

impl ProviderContext {
    pub async fn served(&self) -> Vec<ServedEndpoint> {
        self.served.lock().await.clone()
    }

    /// Set up `endpoints`, concurrently when `parallel` is set, and wait for
    /// all of them. A failed endpoint never affects the others.
    pub async fn setup_all(
        self: &Arc<Self>,
        endpoints: Vec<Arc<RpcProviderEndpoint>>,
        parallel: bool,
    ) -> SetupOutcome {
        let mut results: Vec<Option<Result<(), SetupError>>> =
            std::iter::repeat_with(|| None).take(endpoints.len()).collect();

        if parallel {
            let mut tasks = JoinSet::new();
            for (index, endpoint) in endpoints.iter().enumerate() {
                let ctx = Arc::clone(self);
                let endpoint = Arc::clone(endpoint);
                tasks.spawn(async move { (index, ctx.setup_endpoint(endpoint).await) });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((index, result)) => results[index] = Some(result),
                    Err(err) => error!(error = %err, "endpoint setup task failed"),
                }
            }
        } else {
            for (index, endpoint) in endpoints.iter().enumerate() {
                results[index] = Some(Arc::clone(self).setup_endpoint(Arc::clone(endpoint)).await);
            }
        }

        let mut outcome = SetupOutcome::default();
        for (endpoint, result) in endpoints.into_iter().zip(results) {
            match result {
                Some(Ok(())) => outcome.active.push(endpoint),
                Some(Err(err)) => {
                    warn!(endpoint = %endpoint, stage = %err.stage, error = %err.source, "endpoint disabled");
                    self.metrics.set_disabled(&endpoint.key());
                    outcome.disabled.push((endpoint, err));
                }
                None => {
                    let err = SetupError::new(
                        endpoint.as_ref(),
                        SetupStage::Validate,
                        CoreError::Registry("setup task aborted".into()),
                    );
                    self.metrics.set_disabled(&endpoint.key());
                    outcome.disabled.push((endpoint, err));
                }
            }
        }
        outcome
    }

    /// Bring one endpoint from its descriptor to a registered receiver.
    ///
    /// Shared collaborators only learn about the endpoint once its receiver
    /// is registered, so a failed attempt leaves no epoch, vote or validator
    /// subscription behind. The spec subscription is keyed by endpoint and
    /// replaced by the next attempt.
    pub async fn setup_endpoint(
        self: Arc<Self>,
        endpoint: Arc<RpcProviderEndpoint>,
    ) -> Result<(), SetupError> {
        let fail = |stage: SetupStage| {
            let endpoint = Arc::clone(&endpoint);
            move |source: CoreError| SetupError::new(endpoint.as_ref(), stage, source)
        };
        let key = endpoint.key();
        debug!(endpoint = %endpoint, "setting up endpoint");

        // 1. Descriptor shape.
        endpoint.validate().map_err(fail(SetupStage::Validate))?;

        // 2. Sessions, scoped to the shared epoch memory window.
        let epoch = self
            .state_tracker
            .current_epoch()
            .await
            .map_err(fail(SetupStage::SessionManager))?;
        let sessions = Arc::new(ProviderSessionManager::new(key.clone(), self.block_memory_size, epoch));

        // 3. Chain parser fed by spec updates.
        let parser = Arc::new(
            ChainParser::new(&endpoint.api_interface).map_err(fail(SetupStage::SpecRegistration))?,
        );
        self.state_tracker
            .register_for_spec_updates(parser.clone(), &key)
            .await
            .map_err(fail(SetupStage::SpecRegistration))?;

        // 4. Addon policy from the node urls.
        parser
            .set_policy(ProviderPolicy::from_endpoint(&endpoint))
            .map_err(fail(SetupStage::AddonPolicy))?;

        // 5. Router.
        let router = self
            .backend
            .chain_router(&endpoint, self.config.parallel_connections)
            .map_err(fail(SetupStage::ChainRouter))?;

        // 6. Fetcher, validated against the nodes before anything else runs.
        let mode = if parser.data_reliability_enabled() {
            FetcherMode::Full
        } else {
            FetcherMode::VerificationsOnly
        };
        let fetcher = self
            .backend
            .chain_fetcher(&endpoint, router.clone(), parser.clone(), mode);
        fetcher.validate().await.map_err(fail(SetupStage::FetcherValidation))?;

        // 7. One tracker per chain. The chain's lock is released on return.
        let stats = parser.chain_block_stats().map_err(fail(SetupStage::ChainTracker))?;
        let (tracker, created) = self
            .trackers
            .get_or_try_create(&endpoint.chain_id, || {
                let fetcher = fetcher.clone();
                let metrics = Arc::clone(&self.metrics);
                let chain_id = endpoint.chain_id.clone();
                let shutdown = self.background.child_token();
                async move {
                    let callbacks = TrackerCallbacks {
                        on_new_latest: Some(Box::new({
                            let chain_id = chain_id.clone();
                            move |_, latest| metrics.set_latest_block(&chain_id, latest)
                        })),
                        on_consistency_issue: Some(Box::new(move |previous, current| {
                            warn!(chain = %chain_id, previous, current, "chain consistency issue");
                        })),
                    };
                    ChainTracker::start(fetcher, ChainTrackerConfig::from_stats(&stats), callbacks, shutdown)
                        .await
                }
            })
            .await
            .map_err(fail(SetupStage::ChainTracker))?;
        if created {
            self.state_tracker
                .register_for_spec_verifications(self.spec_validator.clone(), &endpoint.chain_id)
                .await;
            info!(chain = %endpoint.chain_id, "chain tracker created");
        }

        // 8-9. Spec validation and reliability votes; both subscribe on commit.
        let reliability = Arc::new(ReliabilityManager::new(
            key.clone(),
            tracker.clone(),
            self.state_tracker.clone(),
            router.clone(),
            parser.clone(),
        ));

        // 10. Reward sub-store.
        let reward_key = RewardStoreKey::new(
            &endpoint.chain_id,
            &self.identity.address,
            self.config.shard_id,
        );
        self.rewards
            .add_database(&reward_key)
            .await
            .map_err(fail(SetupStage::RewardStore))?;

        // 11. Health monitor, started on commit.
        let monitor = self.config.health_check.enabled.then(|| {
            Arc::new(RelaysMonitor::new(
                key.clone(),
                fetcher.clone(),
                self.metrics.clone(),
                self.config.health_check.interval,
            ))
        });

        // 12. Serving unit on the shared listener. The parser is frozen
        // before the receiver becomes reachable.
        let server = Arc::new(RpcProviderServer::new(ServerComponents {
            sessions: sessions.clone(),
            parser: parser.clone(),
            router,
            tracker: tracker.clone(),
            rewards: self.rewards.clone(),
            reward_key,
            metrics: self.metrics.clone(),
            monitor: monitor.clone(),
        }));
        let (listener, _) = self
            .listeners
            .get_or_try_create(&endpoint.network_address, || {
                self.backend
                    .listener(&endpoint.network_address, &self.config.stickiness_header)
            })
            .await
            .map_err(fail(SetupStage::ServingUnit))?;
        parser.activate().map_err(fail(SetupStage::Activation))?;
        listener
            .register_receiver(server.clone(), &key)
            .await
            .map_err(fail(SetupStage::ServingUnit))?;

        // 13. Commit. Nothing from here on fails.
        self.state_tracker
            .register_for_epoch_updates(sessions.clone(), EpochSubscriber::Endpoint(key.clone()))
            .await;
        if let Ok(current) = self.state_tracker.current_epoch().await {
            if current > epoch {
                sessions.update_epoch(current).await;
            }
        }
        self.spec_validator.add_chain_fetcher(fetcher).await;
        self.state_tracker
            .register_for_vote_updates(reliability, &key)
            .await;
        if let Some(monitor) = &monitor {
            monitor.start(self.background.child_token());
        }
        tracker.register_for_block_time_updates(parser).await;
        self.metrics.set_enabled(&key);
        self.served.lock().await.push(ServedEndpoint {
            endpoint: Arc::clone(&endpoint),
            tracker,
            server,
        });
        info!(endpoint = %endpoint, mode = ?mode, "endpoint enabled");
        Ok(())
    }
}
