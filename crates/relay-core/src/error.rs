use std::fmt;

// ==============================================================================
// Parse Errors
// ==============================================================================

/// Failure of a single block-extraction attempt. Never fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The location the parser was told to read does not exist in the payload.
    /// Recoverable when the block parser carries a default value.
    #[error("value not set")]
    ValueNotSet,

    #[error("payload shape mismatch: {0}")]
    StructuralMismatch(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid parser arguments: {0}")]
    InvalidArgument(String),

    #[error("result payload is empty")]
    EmptyResult,

    #[error("invalid block value: {0}")]
    InvalidBlock(String),
}

// ==============================================================================
// Core Errors
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed endpoint descriptor or missing required option.
    #[error("configuration error: {0}")]
    Config(String),

    /// State tracker or an upstream node could not be reached.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The chain spec does not describe what the caller needs.
    #[error("chain spec error: {0}")]
    Spec(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A node answered, but with an error or an undecodable body.
    #[error("RPC failure: {0}")]
    Rpc(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("no usable endpoint: all {0} configured endpoints failed setup")]
    NoUsableEndpoints(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ==============================================================================
// Endpoint Setup Errors
// ==============================================================================

/// The step of endpoint setup that failed. Used as log context so an operator
/// can tell a dead node from a bad spec mapping.
/// The `setup_endpoint` step an endpoint failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetupStage {
    Validate,
    SessionManager,
    SpecRegistration,
    AddonPolicy,
    ChainRouter,
    FetcherValidation,
    ChainTracker,
    SpecValidator,
    Reliability,
    RewardStore,
    ServingUnit,
    Activation,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::SessionManager => "session_manager",
            Self::SpecRegistration => "spec_registration",
            Self::AddonPolicy => "addon_policy",
            Self::ChainRouter => "chain_router",
            Self::FetcherValidation => "fetcher_validation",
            Self::ChainTracker => "chain_tracker",
            Self::SpecValidator => "spec_validator",
            Self::Reliability => "reliability",
            Self::RewardStore => "reward_store",
            Self::ServingUnit => "serving_unit",
            Self::Activation => "activation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("endpoint {endpoint} failed setup at {stage}: {source}")]
pub struct SetupError {
    pub endpoint: String,
    pub stage: SetupStage,
    #[source]
    pub source: CoreError,
}

impl SetupError {
    pub fn new(endpoint: impl fmt::Display, stage: SetupStage, source: CoreError) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            stage,
            source,
        }
    }
}

// ==============================================================================
// Relay Errors
// ==============================================================================

/// Errors on the request-serving path. The listener maps these to HTTP
/// status codes.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("bad relay request: {0}")]
    BadRequest(String),

    #[error("no receiver registered for {0}")]
    UnknownEndpoint(String),

    #[error("session rejected: {0}")]
    Session(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("upstream node failure: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for RelayError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Parse(parse) => Self::Parse(parse),
            CoreError::Connectivity(msg) | CoreError::Rpc(msg) => Self::Upstream(msg),
            CoreError::Spec(msg) => Self::BadRequest(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_error_display_carries_stage_and_cause() {
        let err = SetupError::new(
            "ETH1:jsonrpc",
            SetupStage::FetcherValidation,
            CoreError::Connectivity("connection refused".into()),
        );
        let text = err.to_string();
        assert!(text.contains("ETH1:jsonrpc"));
        assert!(text.contains("fetcher_validation"));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn core_connectivity_maps_to_upstream_relay_error() {
        let relay: RelayError = CoreError::Connectivity("timeout".into()).into();
        assert!(matches!(relay, RelayError::Upstream(msg) if msg == "timeout"));
    }
}
