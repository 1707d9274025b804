use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::state::BlockTimeUpdatable;
use crate::types::ChainBlockStats;

use super::fetcher::ChainFetcher;

/// Extra block slots a tracker's consumers keep on top of the hash window.
pub const DEFAULT_TRACKER_MEMORY: u64 = 100;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTrackerConfig {
    /// Hashes kept for the most recent blocks.
    pub blocks_to_save: u64,
    pub average_block_time: Duration,
    /// Block window the serving path may ask about.
    pub server_block_memory: u64,
}

impl ChainTrackerConfig {
    pub fn from_stats(stats: &ChainBlockStats) -> Self {
        let blocks_to_save = stats.blocks_to_save().max(1);
        Self {
            blocks_to_save,
            average_block_time: stats.average_block_time,
            server_block_memory: DEFAULT_TRACKER_MEMORY + blocks_to_save,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        (self.average_block_time / 4).max(MIN_POLL_INTERVAL)
    }
}

type BlockCallback = Box<dyn Fn(i64, i64) + Send + Sync>;

/// Hooks fired from the polling loop. Both receive `(previous, current)`.
#[derive(Default)]
pub struct TrackerCallbacks {
    pub on_new_latest: Option<BlockCallback>,
    /// The node reported a lower latest block, or a different hash for a
    /// height already seen.
    pub on_consistency_issue: Option<BlockCallback>,
}

struct TrackerState {
    latest: i64,
    /// `(height, hash)`, oldest first.
    hashes: VecDeque<(i64, String)>,
    last_advance: Instant,
}

/// Follows one chain's head through a fetcher and keeps recent block hashes.
///
/// Exactly one tracker exists per chain id; every endpoint of that chain
/// shares it.
pub struct ChainTracker {
    chain_id: String,
    fetcher: Arc<dyn ChainFetcher>,
    config: ChainTrackerConfig,
    callbacks: TrackerCallbacks,
    state: RwLock<TrackerState>,
    block_time_subscribers: RwLock<Vec<Arc<dyn BlockTimeUpdatable>>>,
}

impl ChainTracker {
    /// Fetch the initial window and spawn the polling loop.
    pub async fn start(
        fetcher: Arc<dyn ChainFetcher>,
        config: ChainTrackerConfig,
        callbacks: TrackerCallbacks,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, CoreError> {
        let chain_id = fetcher.endpoint().chain_id.clone();
        let latest = fetcher.fetch_latest_block_num().await?;
        if latest < 0 {
            return Err(CoreError::Rpc(format!(
                "chain {chain_id} reported an invalid latest block {latest}"
            )));
        }

        let first = (latest - config.blocks_to_save as i64 + 1).max(0);
        let mut hashes = VecDeque::with_capacity(config.blocks_to_save as usize);
        for height in first..=latest {
            hashes.push_back((height, fetcher.fetch_block_hash_by_num(height).await?));
        }
        info!(chain = %chain_id, latest, window = hashes.len(), "chain tracker started");

        let tracker = Arc::new(Self {
            chain_id,
            fetcher,
            config,
            callbacks,
            state: RwLock::new(TrackerState {
                latest,
                hashes,
                last_advance: Instant::now(),
            }),
            block_time_subscribers: RwLock::new(Vec::new()),
        });
        tracker.spawn_poll_loop(shutdown);
        Ok(tracker)
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn config(&self) -> &ChainTrackerConfig {
        &self.config
    }

    pub async fn latest_block(&self) -> i64 {
        self.state.read().await.latest
    }

    pub async fn block_hash(&self, height: i64) -> Option<String> {
        self.state
            .read()
            .await
            .hashes
            .iter()
            .find(|(h, _)| *h == height)
            .map(|(_, hash)| hash.clone())
    }

    pub async fn register_for_block_time_updates(&self, subscriber: Arc<dyn BlockTimeUpdatable>) {
        self.block_time_subscribers.write().await.push(subscriber);
    }

    fn spawn_poll_loop(self: &Arc<Self>, shutdown: CancellationToken) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(tracker.config.poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = tracker.poll().await {
                            warn!(chain = %tracker.chain_id, error = %err, "chain tracker poll failed");
                        }
                    }
                }
            }
            debug!(chain = %tracker.chain_id, "chain tracker stopped");
        });
    }

    async fn poll(&self) -> Result<(), CoreError> {
        let latest = self.fetcher.fetch_latest_block_num().await?;
        let previous = self.latest_block().await;

        if latest < previous {
            warn!(chain = %self.chain_id, previous, latest, "latest block went backwards");
            self.fire(&self.callbacks.on_consistency_issue, previous, latest);
            let hash = self.fetcher.fetch_block_hash_by_num(latest).await?;
            let mut state = self.state.write().await;
            state.hashes.retain(|(h, _)| *h < latest);
            state.hashes.push_back((latest, hash));
            state.latest = latest;
            return Ok(());
        }

        if latest == previous {
            let hash = self.fetcher.fetch_block_hash_by_num(latest).await?;
            let known = self.block_hash(latest).await;
            if known.as_deref().is_some_and(|k| k != hash) {
                warn!(chain = %self.chain_id, block = latest, "block hash changed under the same height");
                self.fire(&self.callbacks.on_consistency_issue, previous, latest);
                let mut state = self.state.write().await;
                if let Some(entry) = state.hashes.iter_mut().find(|(h, _)| *h == latest) {
                    entry.1 = hash;
                }
            }
            return Ok(());
        }

        let first = (previous + 1).max(latest - self.config.blocks_to_save as i64 + 1);
        let mut fresh = Vec::with_capacity((latest - first + 1) as usize);
        for height in first..=latest {
            fresh.push((height, self.fetcher.fetch_block_hash_by_num(height).await?));
        }

        let elapsed = {
            let mut state = self.state.write().await;
            state.hashes.extend(fresh);
            while state.hashes.len() as u64 > self.config.blocks_to_save {
                state.hashes.pop_front();
            }
            state.latest = latest;
            let elapsed = state.last_advance.elapsed();
            state.last_advance = Instant::now();
            elapsed
        };

        debug!(chain = %self.chain_id, previous, latest, "new latest block");
        self.fire(&self.callbacks.on_new_latest, previous, latest);

        if let Some(measured) = average_block_time(elapsed, latest - previous) {
            for subscriber in self.block_time_subscribers.read().await.iter() {
                subscriber.update_block_time(measured);
            }
        }
        Ok(())
    }

    fn fire(&self, callback: &Option<BlockCallback>, previous: i64, current: i64) {
        if let Some(callback) = callback {
            callback(previous, current);
        }
    }
}

/// Time per block over an advance of `blocks`. `None` when the advance does
/// not fit a `u32` divisor or the result rounds to zero.
fn average_block_time(elapsed: Duration, blocks: i64) -> Option<Duration> {
    let blocks = u32::try_from(blocks).ok().filter(|blocks| *blocks > 0)?;
    Some(elapsed / blocks).filter(|measured| !measured.is_zero())
}
