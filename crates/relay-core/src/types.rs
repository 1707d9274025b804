use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ==============================================================================
// Endpoint Descriptors
// ==============================================================================

/// One upstream node the provider forwards relays to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUrl {
    pub url: String,
    /// Addons (extra API sets) this node can serve, e.g. `archive`, `debug`.
    #[serde(default)]
    pub addons: Vec<String>,
}

impl NodeUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            addons: Vec::new(),
        }
    }

    pub fn supports(&self, addon: &str) -> bool {
        addon.is_empty() || self.addons.iter().any(|a| a == addon)
    }
}

/// The socket address a listener binds to. Endpoints with equal addresses
/// share one listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub address: String,
}

impl NetworkAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_empty()
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// A configured serving unit: one chain and API interface exposed on one
/// listener address, backed by one or more node URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcProviderEndpoint {
    pub network_address: NetworkAddress,
    pub chain_id: String,
    pub api_interface: String,
    #[serde(default)]
    pub geolocation: u64,
    pub node_urls: Vec<NodeUrl>,
}

impl RpcProviderEndpoint {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.chain_id.is_empty() {
            return Err(CoreError::Config("endpoint is missing a chain id".into()));
        }
        if self.api_interface.is_empty() {
            return Err(CoreError::Config(format!(
                "endpoint for chain {} is missing an api interface",
                self.chain_id
            )));
        }
        if self.network_address.is_empty() {
            return Err(CoreError::Config(format!(
                "endpoint {self} has no listen address"
            )));
        }
        if self.node_urls.is_empty() {
            return Err(CoreError::Config(format!("endpoint {self} has no node urls")));
        }
        if let Some(bad) = self
            .node_urls
            .iter()
            .find(|node| !(node.url.starts_with("http://") || node.url.starts_with("https://")))
        {
            return Err(CoreError::Config(format!(
                "endpoint {self} has an unsupported node url {:?}",
                bad.url
            )));
        }
        Ok(())
    }

    pub fn key(&self) -> RpcEndpoint {
        RpcEndpoint {
            chain_id: self.chain_id.clone(),
            api_interface: self.api_interface.clone(),
        }
    }

    /// Every addon any node of this endpoint advertises.
    pub fn addons(&self) -> Vec<String> {
        let mut addons: Vec<String> = self
            .node_urls
            .iter()
            .flat_map(|node| node.addons.iter().cloned())
            .collect();
        addons.sort();
        addons.dedup();
        addons
    }
}

impl fmt::Display for RpcProviderEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.chain_id, self.api_interface, self.network_address
        )
    }
}

/// `(chain_id, api_interface)`: the identity of a serving unit on a listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RpcEndpoint {
    pub chain_id: String,
    pub api_interface: String,
}

impl RpcEndpoint {
    pub fn new(chain_id: impl Into<String>, api_interface: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            api_interface: api_interface.into(),
        }
    }
}

impl fmt::Display for RpcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.api_interface)
    }
}

// ==============================================================================
// Provider Identity and Protocol
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub address: String,
}

/// Version numbers are `major.minor.patch` strings compared numerically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub provider_target: String,
    pub provider_min: String,
}

/// Compare dotted version strings component by component. Missing components
/// count as zero; non-numeric components are an error.
pub fn version_at_least(version: &str, minimum: &str) -> Result<bool, CoreError> {
    let parse = |text: &str| -> Result<Vec<u64>, CoreError> {
        text.trim_start_matches('v')
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| CoreError::Config(format!("invalid version string {text:?}")))
            })
            .collect()
    };
    let ours = parse(version)?;
    let theirs = parse(minimum)?;
    let len = ours.len().max(theirs.len());
    for i in 0..len {
        let a = ours.get(i).copied().unwrap_or(0);
        let b = theirs.get(i).copied().unwrap_or(0);
        if a != b {
            return Ok(a > b);
        }
    }
    Ok(true)
}

/// Block-timing facts of a chain as the tracker and the session layer need them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBlockStats {
    pub average_block_time: std::time::Duration,
    pub allowed_block_lag_for_qos_sync: i64,
    pub block_distance_for_finalized_data: u32,
    pub blocks_in_finalization_proof: u32,
}

impl ChainBlockStats {
    /// Number of recent block hashes a tracker keeps.
    pub fn blocks_to_save(&self) -> u64 {
        u64::from(self.block_distance_for_finalized_data)
            + u64::from(self.blocks_in_finalization_proof)
    }
}

// ==============================================================================
// Relay Messages
// ==============================================================================

/// A consumer request as it arrives on a listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub chain_id: String,
    pub api_interface: String,
    pub consumer: String,
    pub session_id: u64,
    pub epoch: u64,
    pub relay_num: u64,
    /// The chain RPC payload forwarded to a node, e.g. a JSON-RPC request.
    pub data: serde_json::Value,
    /// Addon the consumer asks for. Empty for the base API set.
    #[serde(default)]
    pub addon: String,
}

impl RelayRequest {
    pub fn endpoint(&self) -> RpcEndpoint {
        RpcEndpoint::new(&self.chain_id, &self.api_interface)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayReply {
    pub data: serde_json::Value,
    /// Latest block the provider's tracker saw when the reply was produced.
    pub latest_block: i64,
    /// The block the request referenced, or a sentinel.
    pub requested_block: i64,
    /// Hash of `requested_block` when the tracker still holds it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_block_hash: Option<String>,
}

/// Evidence of one served relay, later settled through the state tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayProof {
    pub chain_id: String,
    pub consumer: String,
    pub session_id: u64,
    pub epoch: u64,
    pub relay_num: u64,
    pub compute_units: u64,
}

// ==============================================================================
// Data Reliability Votes
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VotePhase {
    Commit,
    Reveal,
}

/// A conflict vote the provider was selected to take part in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteParams {
    pub vote_id: String,
    pub chain_id: String,
    pub api_interface: String,
    pub block_height: i64,
    pub phase: VotePhase,
}

/// What the provider commits to (hash + nonce) and later reveals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteData {
    pub vote_id: String,
    pub block_height: i64,
    pub block_hash: String,
    pub nonce: u64,
}
