use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::spec::ChainSpec;
use crate::types::{ProtocolVersion, RelayProof, RpcEndpoint, VoteData, VoteParams};

use super::{
    EpochSubscriber, EpochUpdatable, ProviderStateTracker, SpecUpdatable, SpecVerifier,
    VoteUpdatable,
};

/// Chain-global parameters a [`LocalStateTracker`] serves verbatim.
#[derive(Debug, Clone)]
pub struct LocalChainParams {
    pub protocol_version: ProtocolVersion,
    pub block_memory_size: u64,
    pub epoch_duration: Duration,
    pub initial_epoch: u64,
}

impl Default for LocalChainParams {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion {
                provider_target: env!("CARGO_PKG_VERSION").to_owned(),
                provider_min: env!("CARGO_PKG_VERSION").to_owned(),
            },
            block_memory_size: 3,
            epoch_duration: Duration::from_secs(15 * 60),
            initial_epoch: 1,
        }
    }
}

/// A state tracker with no chain behind it: specs come from files, epochs
/// advance on a local timer, payments and votes are recorded and logged.
pub struct LocalStateTracker {
    params: LocalChainParams,
    epoch: AtomicU64,
    specs: RwLock<HashMap<String, Arc<ChainSpec>>>,
    /// In registration order.
    epoch_updatables: RwLock<Vec<(EpochSubscriber, Arc<dyn EpochUpdatable>)>>,
    spec_updatables: RwLock<HashMap<String, BTreeMap<RpcEndpoint, Arc<dyn SpecUpdatable>>>>,
    spec_verifiers: RwLock<HashMap<String, Vec<Arc<dyn SpecVerifier>>>>,
    vote_updatables: RwLock<HashMap<RpcEndpoint, Arc<dyn VoteUpdatable>>>,
    payments: RwLock<Vec<(String, Vec<RelayProof>)>>,
    votes: RwLock<Vec<String>>,
}

impl LocalStateTracker {
    pub fn new(specs: Vec<ChainSpec>, params: LocalChainParams) -> Self {
        let specs = specs
            .into_iter()
            .map(|spec| (spec.index.clone(), Arc::new(spec)))
            .collect();
        Self {
            epoch: AtomicU64::new(params.initial_epoch),
            params,
            specs: RwLock::new(specs),
            epoch_updatables: RwLock::new(Vec::new()),
            spec_updatables: RwLock::new(HashMap::new()),
            spec_verifiers: RwLock::new(HashMap::new()),
            vote_updatables: RwLock::new(HashMap::new()),
            payments: RwLock::new(Vec::new()),
            votes: RwLock::new(Vec::new()),
        }
    }

    /// Replace a chain's spec and push it to every subscriber of that chain.
    /// Subscribers that reject it keep their previous spec.
    pub async fn update_spec(&self, spec: ChainSpec) {
        let spec = Arc::new(spec);
        self.specs
            .write()
            .await
            .insert(spec.index.clone(), spec.clone());

        let subscribers: Vec<Arc<dyn SpecUpdatable>> = self
            .spec_updatables
            .read()
            .await
            .get(&spec.index)
            .map(|by_endpoint| by_endpoint.values().cloned().collect())
            .unwrap_or_default();
        for updatable in subscribers {
            if let Err(err) = updatable.set_spec(spec.clone()) {
                warn!(chain = %spec.index, error = %err, "spec update rejected");
            }
        }
    }

    /// Advance one epoch, notify epoch subscribers, then run spec verifications.
    pub async fn advance_epoch(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        info!(epoch, "new epoch");

        let updatables: Vec<Arc<dyn EpochUpdatable>> = self
            .epoch_updatables
            .read()
            .await
            .iter()
            .map(|(_, updatable)| updatable.clone())
            .collect();
        for updatable in updatables {
            updatable.update_epoch(epoch).await;
        }

        let verifiers: Vec<(String, Arc<dyn SpecVerifier>)> = self
            .spec_verifiers
            .read()
            .await
            .iter()
            .flat_map(|(chain, list)| list.iter().map(move |v| (chain.clone(), v.clone())))
            .collect();
        for (chain, verifier) in verifiers {
            if let Err(err) = verifier.verify_spec(&chain).await {
                warn!(chain = %chain, error = %err, "spec verification failed");
            }
        }
        epoch
    }

    /// Deliver a vote to every subscriber of its `(chain, api_interface)`.
    pub async fn emit_vote(&self, params: VoteParams) {
        let key = RpcEndpoint::new(&params.chain_id, &params.api_interface);
        let subscriber = self.vote_updatables.read().await.get(&key).cloned();
        if let Some(updatable) = subscriber {
            updatable.vote_update(params).await;
        }
    }

    pub fn spawn_epoch_ticker(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let period = tracker.params.epoch_duration;
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        tracker.advance_epoch().await;
                    }
                }
            }
            debug!("epoch ticker stopped");
        })
    }

    pub async fn payments(&self) -> Vec<(String, Vec<RelayProof>)> {
        self.payments.read().await.clone()
    }

    pub async fn votes(&self) -> Vec<String> {
        self.votes.read().await.clone()
    }

    pub async fn epoch_subscriber_count(&self) -> usize {
        self.epoch_updatables.read().await.len()
    }

    pub async fn spec_subscriber_count(&self, chain_id: &str) -> usize {
        self.spec_updatables
            .read()
            .await
            .get(chain_id)
            .map_or(0, BTreeMap::len)
    }

    pub async fn has_vote_subscriber(&self, endpoint: &RpcEndpoint) -> bool {
        self.vote_updatables.read().await.contains_key(endpoint)
    }

    pub async fn spec_verifier_count(&self, chain_id: &str) -> usize {
        self.spec_verifiers
            .read()
            .await
            .get(chain_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl ProviderStateTracker for LocalStateTracker {
    async fn protocol_version(&self) -> Result<ProtocolVersion, CoreError> {
        Ok(self.params.protocol_version.clone())
    }

    async fn block_memory_size(&self) -> Result<u64, CoreError> {
        Ok(self.params.block_memory_size)
    }

    async fn current_epoch(&self) -> Result<u64, CoreError> {
        Ok(self.epoch.load(Ordering::SeqCst))
    }

    async fn register_for_epoch_updates(
        &self,
        updatable: Arc<dyn EpochUpdatable>,
        subscriber: EpochSubscriber,
    ) {
        let mut updatables = self.epoch_updatables.write().await;
        match updatables.iter_mut().find(|(owner, _)| *owner == subscriber) {
            Some(slot) => slot.1 = updatable,
            None => updatables.push((subscriber, updatable)),
        }
    }

    async fn register_for_spec_updates(
        &self,
        updatable: Arc<dyn SpecUpdatable>,
        endpoint: &RpcEndpoint,
    ) -> Result<(), CoreError> {
        let spec = self
            .specs
            .read()
            .await
            .get(&endpoint.chain_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::Spec(format!("no spec loaded for chain {}", endpoint.chain_id))
            })?;
        updatable.set_spec(spec)?;
        self.spec_updatables
            .write()
            .await
            .entry(endpoint.chain_id.clone())
            .or_default()
            .insert(endpoint.clone(), updatable);
        Ok(())
    }

    async fn register_for_spec_verifications(&self, verifier: Arc<dyn SpecVerifier>, chain_id: &str) {
        self.spec_verifiers
            .write()
            .await
            .entry(chain_id.to_owned())
            .or_default()
            .push(verifier);
    }

    async fn register_for_vote_updates(
        &self,
        updatable: Arc<dyn VoteUpdatable>,
        endpoint: &RpcEndpoint,
    ) {
        self.vote_updatables
            .write()
            .await
            .insert(endpoint.clone(), updatable);
    }

    async fn tx_relay_payment(
        &self,
        proofs: Vec<RelayProof>,
        description: &str,
    ) -> Result<(), CoreError> {
        let compute_units: u64 = proofs.iter().map(|p| p.compute_units).sum();
        info!(
            proofs = proofs.len(),
            compute_units,
            description,
            "relay payment submitted"
        );
        self.payments
            .write()
            .await
            .push((description.to_owned(), proofs));
        Ok(())
    }

    async fn send_vote_commitment(&self, vote_id: &str, commit_hash: &str) -> Result<(), CoreError> {
        debug!(vote_id, commit_hash, "vote commitment");
        self.votes.write().await.push(format!("commit:{vote_id}"));
        Ok(())
    }

    async fn send_vote_reveal(&self, vote: &VoteData) -> Result<(), CoreError> {
        debug!(vote_id = %vote.vote_id, block = vote.block_height, "vote reveal");
        self.votes
            .write()
            .await
            .push(format!("reveal:{}", vote.vote_id));
        Ok(())
    }
}
