//! Relay proof storage and payment settlement.
//!
//! Proofs are kept per `(chain, identity, shard)` sub-store and per consumer
//! session, expire after a TTL, and are snapshotted to JSON files so a restart
//! does not lose unpaid work. On every epoch boundary, proofs of finished
//! epochs are handed to the state tracker for payment.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::state::{EpochUpdatable, ProviderStateTracker};
use crate::types::RelayProof;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RewardStoreKey {
    pub chain_id: String,
    pub identity: String,
    pub shard_id: u32,
}

impl RewardStoreKey {
    pub fn new(chain_id: &str, identity: &str, shard_id: u32) -> Self {
        Self {
            chain_id: chain_id.to_owned(),
            identity: identity.to_owned(),
            shard_id,
        }
    }

    fn file_name(&self) -> String {
        let identity: String = self
            .identity
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}_{identity}_{}.json", self.chain_id, self.shard_id)
    }
}

impl fmt::Display for RewardStoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.chain_id, self.identity, self.shard_id)
    }
}

#[derive(Debug, Clone)]
pub struct RewardServerConfig {
    /// Snapshot directory. `None` keeps proofs in memory only.
    pub storage_path: Option<PathBuf>,
    pub ttl: Duration,
    /// Unsaved proofs that trigger a snapshot.
    pub snapshot_threshold: usize,
    /// Maximum time unsaved proofs wait for a snapshot.
    pub snapshot_timeout: Duration,
}

struct StoredProof {
    proof: RelayProof,
    stored_at: Instant,
}

struct RewardStore {
    proofs: HashMap<(String, u64), StoredProof>,
    unsaved: usize,
    last_snapshot: Instant,
}

impl RewardStore {
    fn new() -> Self {
        Self {
            proofs: HashMap::new(),
            unsaved: 0,
            last_snapshot: Instant::now(),
        }
    }
}

pub struct RewardServer {
    config: RewardServerConfig,
    state_tracker: Arc<dyn ProviderStateTracker>,
    stores: Mutex<HashMap<RewardStoreKey, RewardStore>>,
}

impl RewardServer {
    pub fn new(config: RewardServerConfig, state_tracker: Arc<dyn ProviderStateTracker>) -> Self {
        Self {
            config,
            state_tracker,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Ensure a sub-store exists, loading its last snapshot if one is on
    /// disk. Returns `true` when the store was created by this call.
    pub async fn add_database(&self, key: &RewardStoreKey) -> Result<bool, CoreError> {
        let mut stores = self.stores.lock().await;
        if stores.contains_key(key) {
            return Ok(false);
        }

        let mut store = RewardStore::new();
        if let Some(dir) = &self.config.storage_path {
            for proof in load_snapshot(&dir.join(key.file_name())).await? {
                store.proofs.insert(
                    (proof.consumer.clone(), proof.session_id),
                    StoredProof {
                        proof,
                        stored_at: Instant::now(),
                    },
                );
            }
        }
        info!(store = %key, restored = store.proofs.len(), "reward store opened");
        stores.insert(key.clone(), store);
        Ok(true)
    }

    /// Record a served relay. Compute units accumulate per consumer session.
    pub async fn save_proof(&self, key: &RewardStoreKey, proof: RelayProof) -> Result<(), CoreError> {
        let mut stores = self.stores.lock().await;
        let store = stores
            .get_mut(key)
            .ok_or_else(|| CoreError::Registry(format!("no reward store for {key}")))?;

        let session = (proof.consumer.clone(), proof.session_id);
        match store.proofs.get_mut(&session) {
            Some(existing) if existing.proof.epoch == proof.epoch => {
                existing.proof.compute_units += proof.compute_units;
                existing.proof.relay_num = existing.proof.relay_num.max(proof.relay_num);
                existing.stored_at = Instant::now();
            }
            _ => {
                store.proofs.insert(
                    session,
                    StoredProof {
                        proof,
                        stored_at: Instant::now(),
                    },
                );
            }
        }
        store.unsaved += 1;
        Ok(())
    }

    pub async fn proofs(&self, key: &RewardStoreKey) -> Vec<RelayProof> {
        self.stores
            .lock()
            .await
            .get(key)
            .map(|store| store.proofs.values().map(|p| p.proof.clone()).collect())
            .unwrap_or_default()
    }

    /// Expire old proofs and snapshot stores that crossed the threshold or
    /// the timeout.
    pub async fn run_maintenance(&self) -> Result<(), CoreError> {
        let mut stores = self.stores.lock().await;
        for (key, store) in stores.iter_mut() {
            let before = store.proofs.len();
            store
                .proofs
                .retain(|_, stored| stored.stored_at.elapsed() < self.config.ttl);
            let expired = before - store.proofs.len();
            if expired > 0 {
                debug!(store = %key, expired, "expired relay proofs");
                store.unsaved += expired;
            }

            let due = store.unsaved >= self.config.snapshot_threshold
                || (store.unsaved > 0
                    && store.last_snapshot.elapsed() >= self.config.snapshot_timeout);
            if due {
                self.snapshot(key, store).await?;
            }
        }
        Ok(())
    }

    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = server.run_maintenance().await {
                            warn!(error = %err, "reward store maintenance failed");
                        }
                    }
                }
            }
            debug!("reward store maintenance stopped");
        })
    }

    /// Snapshot and drop every sub-store. Every store is attempted; the
    /// first error is returned.
    pub async fn close_all_databases(&self) -> Result<(), CoreError> {
        let mut stores = self.stores.lock().await;
        let mut first_error = None;
        for (key, store) in stores.iter_mut() {
            if let Err(err) = self.snapshot(key, store).await {
                warn!(store = %key, error = %err, "failed to snapshot reward store on close");
                first_error.get_or_insert(err);
            }
        }
        stores.clear();
        first_error.map_or(Ok(()), Err)
    }

    async fn snapshot(&self, key: &RewardStoreKey, store: &mut RewardStore) -> Result<(), CoreError> {
        if let Some(dir) = &self.config.storage_path {
            let proofs: Vec<&RelayProof> = store.proofs.values().map(|p| &p.proof).collect();
            let bytes = serde_json::to_vec_pretty(&proofs)
                .map_err(|e| CoreError::Config(format!("encode reward snapshot: {e}")))?;
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(dir.join(key.file_name()), bytes).await?;
            debug!(store = %key, proofs = proofs.len(), "reward store snapshot written");
        }
        store.unsaved = 0;
        store.last_snapshot = Instant::now();
        Ok(())
    }
}

async fn load_snapshot(path: &Path) -> Result<Vec<RelayProof>, CoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            CoreError::Config(format!("corrupt reward snapshot {}: {e}", path.display()))
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl EpochUpdatable for RewardServer {
    /// Pay out every proof from an epoch before `epoch`. Proofs whose payment
    /// fails are kept for the next boundary.
    async fn update_epoch(&self, epoch: u64) {
        let mut stores = self.stores.lock().await;
        for (key, store) in stores.iter_mut() {
            let settled: Vec<(String, u64)> = store
                .proofs
                .iter()
                .filter(|(_, stored)| stored.proof.epoch < epoch)
                .map(|(session, _)| session.clone())
                .collect();
            if settled.is_empty() {
                continue;
            }

            let proofs: Vec<RelayProof> = settled
                .iter()
                .filter_map(|session| store.proofs.get(session).map(|p| p.proof.clone()))
                .collect();
            let description = format!("{key} epoch {epoch}");
            match self.state_tracker.tx_relay_payment(proofs, &description).await {
                Ok(()) => {
                    for session in &settled {
                        store.proofs.remove(session);
                    }
                    store.unsaved += settled.len();
                }
                Err(err) => warn!(store = %key, epoch, error = %err, "relay payment failed"),
            }
        }
    }
}
