use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chain::fetcher::fetch_block_hash;
use crate::chain::{ChainParser, ChainRouter, ChainTracker};
use crate::error::CoreError;
use crate::spec::FunctionTag;
use crate::state::{ProviderStateTracker, VoteUpdatable};
use crate::types::{RpcEndpoint, VoteData, VotePhase, VoteParams};

/// Takes part in data-reliability conflict votes for one endpoint.
///
/// Commit publishes a digest of the block hash and a random nonce; reveal
/// publishes both. Votes are ignored when the chain spec disables data
/// reliability.
pub struct ReliabilityManager {
    endpoint: RpcEndpoint,
    tracker: Arc<ChainTracker>,
    state_tracker: Arc<dyn ProviderStateTracker>,
    router: Arc<dyn ChainRouter>,
    parser: Arc<ChainParser>,
    pending: Mutex<HashMap<String, VoteData>>,
}

impl ReliabilityManager {
    pub fn new(
        endpoint: RpcEndpoint,
        tracker: Arc<ChainTracker>,
        state_tracker: Arc<dyn ProviderStateTracker>,
        router: Arc<dyn ChainRouter>,
        parser: Arc<ChainParser>,
    ) -> Self {
        Self {
            endpoint,
            tracker,
            state_tracker,
            router,
            parser,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Hash of `height` from the tracker window, falling back to the node.
    async fn block_hash(&self, height: i64) -> Result<String, CoreError> {
        if let Some(hash) = self.tracker.block_hash(height).await {
            return Ok(hash);
        }
        let directive = self
            .parser
            .directive(FunctionTag::GetBlockByNum)
            .ok_or_else(|| CoreError::Spec("spec has no GetBlockByNum directive".into()))?;
        fetch_block_hash(self.router.as_ref(), &directive, height).await
    }

    async fn commit(&self, params: &VoteParams) -> Result<(), CoreError> {
        let block_hash = self.block_hash(params.block_height).await?;
        let nonce: u64 = rand::thread_rng().gen();
        let vote = VoteData {
            vote_id: params.vote_id.clone(),
            block_height: params.block_height,
            block_hash,
            nonce,
        };
        let commit_hash = commitment(&vote);
        self.state_tracker
            .send_vote_commitment(&vote.vote_id, &commit_hash)
            .await?;
        self.pending.lock().await.insert(vote.vote_id.clone(), vote);
        Ok(())
    }

    async fn reveal(&self, params: &VoteParams) -> Result<(), CoreError> {
        let vote = self
            .pending
            .lock()
            .await
            .remove(&params.vote_id)
            .ok_or_else(|| CoreError::Registry(format!("no commitment for vote {}", params.vote_id)))?;
        self.state_tracker.send_vote_reveal(&vote).await
    }

    pub async fn pending_votes(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Hex SHA-256 of the block hash bytes followed by the big-endian nonce.
fn commitment(vote: &VoteData) -> String {
    let mut hasher = Sha256::new();
    hasher.update(vote.block_hash.as_bytes());
    hasher.update(vote.nonce.to_be_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl VoteUpdatable for ReliabilityManager {
    async fn vote_update(&self, params: VoteParams) {
        if !self.parser.data_reliability_enabled() {
            debug!(endpoint = %self.endpoint, vote = %params.vote_id, "data reliability disabled; ignoring vote");
            return;
        }
        let result = match params.phase {
            VotePhase::Commit => self.commit(&params).await,
            VotePhase::Reveal => self.reveal(&params).await,
        };
        match result {
            Ok(()) => info!(endpoint = %self.endpoint, vote = %params.vote_id, phase = ?params.phase, "vote sent"),
            Err(err) => warn!(endpoint = %self.endpoint, vote = %params.vote_id, error = %err, "vote failed"),
        }
    }
}
