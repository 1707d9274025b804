//! State tracker abstraction.
//!
//! The provider learns everything chain-global (protocol version, epochs,
//! specs, votes) from a [`ProviderStateTracker`] and settles payments through
//! it. Components subscribe by implementing the small `*Updatable` traits and
//! registering themselves. [`LocalStateTracker`] is a standalone
//! implementation driven by spec files and a local epoch clock.

pub mod local;

pub use local::{LocalChainParams, LocalStateTracker};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::spec::ChainSpec;
use crate::types::{ProtocolVersion, RelayProof, RpcEndpoint, VoteData, VoteParams};

// ==============================================================================
// Subscriber Traits
// ==============================================================================

#[async_trait]
pub trait EpochUpdatable: Send + Sync {
    async fn update_epoch(&self, epoch: u64);
}

/// Receives chain specs. A spec the receiver cannot serve is rejected with
/// [`CoreError::Spec`].
pub trait SpecUpdatable: Send + Sync {
    fn set_spec(&self, spec: Arc<ChainSpec>) -> Result<(), CoreError>;
}

/// Re-checks a chain against its spec when asked to by the state tracker.
#[async_trait]
pub trait SpecVerifier: Send + Sync {
    async fn verify_spec(&self, chain_id: &str) -> Result<(), CoreError>;
}

#[async_trait]
pub trait VoteUpdatable: Send + Sync {
    async fn vote_update(&self, params: VoteParams);
}

pub trait BlockTimeUpdatable: Send + Sync {
    fn update_block_time(&self, block_time: Duration);
}

/// Owner of an epoch subscription. Registering again under the same owner
/// replaces the earlier subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EpochSubscriber {
    /// A process-wide component, by name.
    Provider(&'static str),
    Endpoint(RpcEndpoint),
}

// ==============================================================================
// State Tracker
// ==============================================================================

#[async_trait]
pub trait ProviderStateTracker: Send + Sync {
    /// Fails with [`CoreError::Connectivity`] when the chain cannot be reached.
    async fn protocol_version(&self) -> Result<ProtocolVersion, CoreError>;

    /// How many epochs back a consumer session stays valid.
    async fn block_memory_size(&self) -> Result<u64, CoreError>;

    async fn current_epoch(&self) -> Result<u64, CoreError>;

    async fn register_for_epoch_updates(
        &self,
        updatable: Arc<dyn EpochUpdatable>,
        subscriber: EpochSubscriber,
    );

    /// Delivers the current spec for `endpoint.chain_id` before returning and
    /// keeps `updatable` subscribed to later spec changes. At most one
    /// subscription per endpoint is kept.
    async fn register_for_spec_updates(
        &self,
        updatable: Arc<dyn SpecUpdatable>,
        endpoint: &RpcEndpoint,
    ) -> Result<(), CoreError>;

    async fn register_for_spec_verifications(&self, verifier: Arc<dyn SpecVerifier>, chain_id: &str);

    /// Replaces any earlier subscription for `endpoint`.
    async fn register_for_vote_updates(
        &self,
        updatable: Arc<dyn VoteUpdatable>,
        endpoint: &RpcEndpoint,
    );

    async fn tx_relay_payment(&self, proofs: Vec<RelayProof>, description: &str)
        -> Result<(), CoreError>;

    async fn send_vote_commitment(&self, vote_id: &str, commit_hash: &str) -> Result<(), CoreError>;

    async fn send_vote_reveal(&self, vote: &VoteData) -> Result<(), CoreError>;
}
